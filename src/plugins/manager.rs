use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::traits::{TrackerPlugin, NotifierPlugin};
use super::trackers::{PriceTracker, VersionTracker, NumberTracker};
use super::notifiers::{EmailNotifier, DiscordNotifier};
use crate::config::AppConfig;
use crate::models::TrackerType;
use crate::utils::error::AppError;

pub type TrackerPluginRef = Arc<dyn TrackerPlugin>;
pub type NotifierPluginRef = Arc<dyn NotifierPlugin>;

const BUILTIN_NOTIFIERS: &[&str] = &["email", "discord"];

/// Registry of tracker and notifier plugins keyed by their `plugin_type`.
#[derive(Clone)]
pub struct PluginManager {
    trackers: Arc<RwLock<HashMap<String, TrackerPluginRef>>>,
    notifiers: Arc<RwLock<HashMap<String, NotifierPluginRef>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            trackers: Arc::new(RwLock::new(HashMap::new())),
            notifiers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry with the built-in trackers and notifiers, configured from `config`.
    pub async fn with_defaults(config: &AppConfig) -> Result<Self, AppError> {
        let manager = Self::new();

        manager
            .register_tracker(Arc::new(PriceTracker::with_default_currency(&config.scraper.default_currency)))
            .await?;
        manager.register_tracker(Arc::new(VersionTracker::new())).await?;
        manager.register_tracker(Arc::new(NumberTracker::new())).await?;

        manager
            .register_notifier(Arc::new(EmailNotifier::with_defaults(config.notifications.smtp.clone())))
            .await?;
        manager
            .register_notifier(Arc::new(DiscordNotifier::with_defaults(config.notifications.discord.clone())))
            .await?;

        manager.ensure_builtins().await?;
        Ok(manager)
    }

    /// Register a tracker plugin, replacing any previous one of the same type
    pub async fn register_tracker(&self, plugin: TrackerPluginRef) -> Result<(), AppError> {
        let plugin_type = plugin.plugin_type().to_string();
        plugin.initialize().await.map_err(|e| AppError::Plugin {
            plugin_type: plugin_type.clone(),
            message: format!("Failed to initialize tracker: {}", e),
        })?;

        let mut trackers = self.trackers.write().await;
        if trackers.insert(plugin_type.clone(), plugin).is_some() {
            debug!("Replaced tracker plugin {}", plugin_type);
        }
        Ok(())
    }

    /// Register a notifier plugin, replacing any previous one of the same type
    pub async fn register_notifier(&self, plugin: NotifierPluginRef) -> Result<(), AppError> {
        let plugin_type = plugin.plugin_type().to_string();

        let mut notifiers = self.notifiers.write().await;
        if notifiers.insert(plugin_type.clone(), plugin).is_some() {
            debug!("Replaced notifier plugin {}", plugin_type);
        }
        Ok(())
    }

    pub async fn get_tracker(&self, plugin_type: &str) -> Result<TrackerPluginRef, AppError> {
        let trackers = self.trackers.read().await;
        trackers
            .get(plugin_type)
            .cloned()
            .ok_or_else(|| AppError::tracker_not_found(plugin_type))
    }

    pub async fn get_notifier(&self, plugin_type: &str) -> Result<NotifierPluginRef, AppError> {
        let notifiers = self.notifiers.read().await;
        notifiers
            .get(plugin_type)
            .cloned()
            .ok_or_else(|| AppError::notifier_not_found(plugin_type))
    }

    pub async fn has_tracker(&self, plugin_type: &str) -> bool {
        let trackers = self.trackers.read().await;
        trackers.contains_key(plugin_type)
    }

    pub async fn has_notifier(&self, plugin_type: &str) -> bool {
        let notifiers = self.notifiers.read().await;
        notifiers.contains_key(plugin_type)
    }

    /// Sorted list of registered tracker types
    pub async fn list_tracker_types(&self) -> Vec<String> {
        let trackers = self.trackers.read().await;
        let mut types: Vec<String> = trackers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Sorted list of registered notifier types
    pub async fn list_notifier_types(&self) -> Vec<String> {
        let notifiers = self.notifiers.read().await;
        let mut types: Vec<String> = notifiers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Every tracker type a product can name and every built-in notifier must be present.
    pub async fn ensure_builtins(&self) -> Result<(), AppError> {
        for tracker_type in [TrackerType::Price, TrackerType::Version, TrackerType::Number] {
            if !self.has_tracker(tracker_type.as_str()).await {
                return Err(AppError::tracker_not_found(tracker_type.as_str()));
            }
        }
        for notifier_type in BUILTIN_NOTIFIERS {
            if !self.has_notifier(notifier_type).await {
                return Err(AppError::notifier_not_found(notifier_type));
            }
        }
        Ok(())
    }

    /// Shutdown all plugins
    pub async fn shutdown(&self) -> Result<(), AppError> {
        let mut trackers = self.trackers.write().await;
        for (plugin_type, plugin) in trackers.drain() {
            if let Err(e) = plugin.shutdown().await {
                warn!("Error shutting down tracker plugin {}: {}", plugin_type, e);
            }
        }

        let mut notifiers = self.notifiers.write().await;
        for (plugin_type, plugin) in notifiers.drain() {
            if let Err(e) = plugin.shutdown().await {
                warn!("Error shutting down notifier plugin {}: {}", plugin_type, e);
            }
        }

        Ok(())
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}
