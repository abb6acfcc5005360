use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::config::AppConfig;
use crate::models::{
    FalsePositive, NewFalsePositive, NewNotificationConfig, NewProduct, NewSource, NotificationAction,
    NotificationConfig, NotificationLog, NotificationStatus, NotifyOn, Product, SelectorType, Source,
    SourceComparison, ThresholdType, TrackerType, UpdateProduct, UpdateSource, ValueComparison, ValueHistory,
};
use crate::notification::{triggering_change, EventBuilder};
use crate::plugins::traits::{BestDirection, ChangeType, NotificationEvent, TrackerPlugin};
use crate::plugins::PluginManager;
use crate::renderer::Renderer;
use crate::source_tracker::{SourceCheckResult, SourceTracker};
use crate::store::Store;
use crate::utils::error::AppError;
use crate::utils::schedule::{is_valid_cron, next_check_after};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceRequest {
    #[validate(url)]
    pub url: String,
    pub store_name: Option<String>,
    #[validate(length(min = 1, message = "Selector is required"))]
    pub selector: String,
    pub selector_type: Option<SelectorType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProductRequest {
    #[validate(length(min = 1, max = 200, message = "Product name must be 1-200 characters"))]
    pub name: String,
    pub description: Option<String>,
    pub tracker_type: TrackerType,
    pub notify_on: Option<NotifyOn>,
    pub threshold_type: Option<ThresholdType>,
    #[validate(range(min = 0.0))]
    pub threshold_value: Option<f64>,
    /// 5-field cron; the configured default when absent.
    pub check_interval: Option<String>,
    #[validate(nested)]
    #[serde(default)]
    pub sources: Vec<SourceRequest>,
    #[serde(default)]
    pub notifications: Vec<NewNotificationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCheckResult {
    pub product_id: String,
    pub success: bool,
    /// Inactive or paused; nothing was fetched.
    pub skipped: bool,
    pub sources_checked: usize,
    pub sources_succeeded: usize,
    pub changes_detected: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub best_source_id: Option<String>,
    pub best_value: Option<serde_json::Value>,
    pub source_results: Vec<SourceCheckResult>,
    pub comparison: Option<ValueComparison>,
    pub error: Option<String>,
    pub total_time_ms: u64,
}

impl ProductCheckResult {
    fn empty(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            success: true,
            skipped: false,
            sources_checked: 0,
            sources_succeeded: 0,
            changes_detected: 0,
            notifications_sent: 0,
            notifications_failed: 0,
            best_source_id: None,
            best_value: None,
            source_results: Vec::new(),
            comparison: None,
            error: None,
            total_time_ms: 0,
        }
    }

    /// Outcome for a product whose check could not run at all.
    pub fn failed(product_id: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::empty(product_id)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStats {
    pub total_sources: usize,
    pub active_sources: usize,
    pub healthy_sources: usize,
    pub observations: usize,
    pub comparisons: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub last_check: Option<DateTime<Utc>>,
    pub last_change: Option<DateTime<Utc>>,
    pub health_score: f64, // 0.0 to 1.0
}

/// Product lifecycle and the per-product tracking pass.
pub struct ProductManager {
    store: Arc<dyn Store>,
    plugins: PluginManager,
    source_tracker: SourceTracker,
    config: AppConfig,
}

impl ProductManager {
    pub fn new(store: Arc<dyn Store>, plugins: PluginManager, renderer: Arc<dyn Renderer>, config: AppConfig) -> Self {
        let source_tracker = SourceTracker::new(renderer, store.clone(), config.scraper.clone());
        Self::with_source_tracker(store, plugins, source_tracker, config)
    }

    pub fn with_source_tracker(
        store: Arc<dyn Store>,
        plugins: PluginManager,
        source_tracker: SourceTracker,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            plugins,
            source_tracker,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    async fn require_product(&self, product_id: &str) -> Result<Product, AppError> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Product {}", product_id)))
    }

    async fn require_source(&self, source_id: &str) -> Result<Source, AppError> {
        self.store
            .get_source(source_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Source {}", source_id)))
    }

    fn check_cron(expression: &str) -> Result<(), AppError> {
        if is_valid_cron(expression) {
            Ok(())
        } else {
            Err(AppError::Validation(format!("Invalid cron expression: {}", expression)))
        }
    }

    pub async fn create_product(&self, request: ProductRequest) -> Result<Product, AppError> {
        request.validate()?;

        let check_interval = request
            .check_interval
            .clone()
            .unwrap_or_else(|| self.config.scheduler.default_check_interval.clone());
        Self::check_cron(&check_interval)?;

        // Unknown kinds are rejected up front rather than on the first cycle
        self.plugins.get_tracker(request.tracker_type.as_str()).await?;
        for notification in &request.notifications {
            self.check_notifier_config(notification).await?;
        }

        for (i, source) in request.sources.iter().enumerate() {
            if request.sources[..i].iter().any(|s| s.url == source.url) {
                return Err(AppError::Conflict(format!("Duplicate source URL: {}", source.url)));
            }
        }

        let product = Product::new(NewProduct {
            name: request.name.trim().to_string(),
            description: request.description,
            tracker_type: request.tracker_type,
            notify_on: request.notify_on,
            threshold_type: request.threshold_type,
            threshold_value: request.threshold_value,
            check_interval: Some(check_interval),
        });
        self.store.save_product(&product).await?;

        for source in request.sources {
            self.store.save_source(&Self::new_source(&product.id, source)).await?;
        }
        for notification in request.notifications {
            let config = NotificationConfig::new(product.id.clone(), notification);
            self.store.save_notification_config(&config).await?;
        }

        info!("Created product {} ({})", product.name, product.id);
        Ok(product)
    }

    fn new_source(product_id: &str, request: SourceRequest) -> Source {
        Source::new(NewSource {
            product_id: product_id.to_string(),
            url: request.url,
            store_name: request.store_name,
            title: None,
            selector: request.selector,
            selector_type: request.selector_type,
        })
    }

    pub async fn get_product(&self, product_id: &str) -> Result<Option<Product>, AppError> {
        self.store.get_product(product_id).await
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        self.store.list_products().await
    }

    /// Active, unpaused products whose next check is not in the future.
    pub async fn due_products(&self, now: DateTime<Utc>) -> Result<Vec<Product>, AppError> {
        Ok(self
            .store
            .list_products()
            .await?
            .into_iter()
            .filter(|p| p.is_due(now))
            .collect())
    }

    pub async fn update_product(&self, product_id: &str, update: UpdateProduct) -> Result<Product, AppError> {
        if let Some(interval) = &update.check_interval {
            Self::check_cron(interval)?;
        }
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("Product name is required".to_string()));
            }
        }
        if update.threshold_value.is_some_and(|v| v < 0.0) {
            return Err(AppError::Validation("Threshold value must not be negative".to_string()));
        }

        let mut product = self.require_product(product_id).await?;
        product.update(update);
        self.store.save_product(&product).await?;

        debug!("Updated product {}", product.id);
        Ok(product)
    }

    /// Removes the product and everything recorded about it.
    pub async fn delete_product(&self, product_id: &str) -> Result<(), AppError> {
        if !self.store.delete_product(product_id).await? {
            return Err(AppError::not_found(format!("Product {}", product_id)));
        }
        info!("Deleted product {}", product_id);
        Ok(())
    }

    pub async fn list_sources(&self, product_id: &str) -> Result<Vec<Source>, AppError> {
        self.store.list_sources(product_id).await
    }

    pub async fn add_source(&self, product_id: &str, request: SourceRequest) -> Result<Source, AppError> {
        request.validate()?;
        self.require_product(product_id).await?;

        let existing = self.store.list_sources(product_id).await?;
        if existing.iter().any(|s| s.url == request.url) {
            return Err(AppError::Conflict(format!(
                "Product {} already tracks {}",
                product_id, request.url
            )));
        }

        let source = Self::new_source(product_id, request);
        self.store.save_source(&source).await?;
        debug!("Added source {} to product {}", source.id, product_id);
        Ok(source)
    }

    pub async fn update_source(&self, source_id: &str, update: UpdateSource) -> Result<Source, AppError> {
        if update.selector.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(AppError::Validation("Selector is required".to_string()));
        }

        let mut source = self.require_source(source_id).await?;
        source.update(update);
        self.store.save_source(&source).await?;
        Ok(source)
    }

    /// Removes one source. If it held the product's best value, the best value is
    /// recomputed from the remaining sources.
    pub async fn delete_source(&self, source_id: &str) -> Result<(), AppError> {
        let source = self.require_source(source_id).await?;
        self.store.delete_source(source_id).await?;

        let Some(mut product) = self.store.get_product(&source.product_id).await? else {
            return Ok(());
        };
        if product.best_source_id.as_deref() != Some(source_id) {
            return Ok(());
        }

        let plugin = self.plugins.get_tracker(product.tracker_type.as_str()).await?;
        let remaining = self.store.list_sources(&product.id).await?;
        let usable: Vec<&Source> = remaining
            .iter()
            .filter(|s| s.is_active && s.current_value.is_some())
            .collect();

        match select_best(plugin.as_ref(), &usable) {
            Some(best) => {
                let value = best.current_value.clone().unwrap_or_default();
                product.set_best(best.id.clone(), value);
            }
            None => product.clear_best(),
        }
        self.store.save_product(&product).await?;
        Ok(())
    }

    /// Puts a deactivated source back into rotation with a clean error count.
    pub async fn reactivate_source(&self, source_id: &str) -> Result<Source, AppError> {
        let mut source = self.require_source(source_id).await?;
        source.reactivate();
        self.store.save_source(&source).await?;
        info!("Reactivated source {}", source_id);
        Ok(source)
    }

    async fn check_notifier_config(&self, config: &NewNotificationConfig) -> Result<(), AppError> {
        let notifier = self.plugins.get_notifier(&config.notifier_type).await?;
        if !notifier.validate_config(&config.config) {
            return Err(AppError::Validation(format!(
                "Invalid {} notification settings",
                config.notifier_type
            )));
        }
        Ok(())
    }

    pub async fn add_notification_config(
        &self,
        product_id: &str,
        request: NewNotificationConfig,
    ) -> Result<NotificationConfig, AppError> {
        self.require_product(product_id).await?;
        self.check_notifier_config(&request).await?;

        let config = NotificationConfig::new(product_id.to_string(), request);
        self.store.save_notification_config(&config).await?;
        Ok(config)
    }

    pub async fn list_notification_configs(&self, product_id: &str) -> Result<Vec<NotificationConfig>, AppError> {
        self.store.list_notification_configs(product_id).await
    }

    pub async fn set_notification_enabled(&self, config_id: &str, enabled: bool) -> Result<NotificationConfig, AppError> {
        let mut config = self
            .store
            .get_notification_config(config_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Notification config {}", config_id)))?;
        config.set_enabled(enabled);
        self.store.save_notification_config(&config).await?;
        Ok(config)
    }

    pub async fn remove_notification_config(&self, config_id: &str) -> Result<(), AppError> {
        if !self.store.delete_notification_config(config_id).await? {
            return Err(AppError::not_found(format!("Notification config {}", config_id)));
        }
        Ok(())
    }

    /// Records the user's response to a notification.
    ///
    /// A false positive also stores the value currently held by the best source; a
    /// purchase pauses the product.
    pub async fn record_action(&self, product_id: &str, action: NotificationAction) -> Result<NotificationLog, AppError> {
        let mut product = self.require_product(product_id).await?;

        match action {
            NotificationAction::Dismissed => {}
            NotificationAction::FalsePositive => {
                let source_id = product.best_source_id.clone().ok_or_else(|| {
                    AppError::Validation("Product has no detected value to report".to_string())
                })?;
                let source = self.require_source(&source_id).await?;
                let entry = FalsePositive::new(NewFalsePositive {
                    product_id: product.id.clone(),
                    source_id: source.id.clone(),
                    detected_text: source.current_text.clone().unwrap_or_default(),
                    detected_value: source.current_value.clone().unwrap_or_default(),
                    notes: None,
                });
                self.store.save_false_positive(&entry).await?;
            }
            NotificationAction::Purchased => {
                product.update(UpdateProduct {
                    is_paused: Some(true),
                    ..UpdateProduct::default()
                });
                self.store.save_product(&product).await?;
            }
        }

        let log = NotificationLog::actioned(product_id, action);
        self.store.append_notification_log(&log).await?;
        info!("Recorded {:?} for product {}", action, product_id);
        Ok(log)
    }

    pub async fn get_value_history(&self, source_id: &str, limit: Option<usize>) -> Result<Vec<ValueHistory>, AppError> {
        self.store.list_history(source_id, limit).await
    }

    /// Drops observations older than `before` for every source of the product.
    pub async fn prune_history(&self, product_id: &str, before: DateTime<Utc>) -> Result<usize, AppError> {
        let mut removed = 0;
        for source in self.store.list_sources(product_id).await? {
            removed += self.store.prune_history(&source.id, before).await?;
        }
        if removed > 0 {
            debug!("Pruned {} observation(s) for product {}", removed, product_id);
        }
        Ok(removed)
    }

    pub async fn get_comparisons(&self, product_id: &str, limit: Option<usize>) -> Result<Vec<ValueComparison>, AppError> {
        self.store.list_comparisons(product_id, limit).await
    }

    pub async fn get_notification_logs(&self, product_id: &str, limit: Option<usize>) -> Result<Vec<NotificationLog>, AppError> {
        self.store.list_notification_logs(product_id, limit).await
    }

    pub async fn get_product_stats(&self, product_id: &str) -> Result<ProductStats, AppError> {
        let product = self.require_product(product_id).await?;
        let sources = self.store.list_sources(product_id).await?;

        let mut observations = 0;
        let mut last_change: Option<DateTime<Utc>> = None;
        for source in &sources {
            // Newest first
            observations += self.store.count_history(&source.id).await?;
            let history = self.store.list_history(&source.id, None).await?;
            let changed_at = history
                .windows(2)
                .find(|pair| pair[0].value != pair[1].value)
                .map(|pair| pair[0].timestamp);
            last_change = last_change.max(changed_at);
        }

        let logs = self.store.list_notification_logs(product_id, None).await?;
        let healthy_sources = sources.iter().filter(|s| s.is_healthy()).count();

        Ok(ProductStats {
            total_sources: sources.len(),
            active_sources: sources.iter().filter(|s| s.is_active).count(),
            healthy_sources,
            observations,
            comparisons: self.store.list_comparisons(product_id, None).await?.len(),
            notifications_sent: logs.iter().filter(|l| l.status == NotificationStatus::Sent).count(),
            notifications_failed: logs.iter().filter(|l| l.status == NotificationStatus::Failed).count(),
            last_check: product.last_checked,
            last_change,
            health_score: if sources.is_empty() {
                0.0
            } else {
                healthy_sources as f64 / sources.len() as f64
            },
        })
    }

    /// One tracking pass for one product.
    ///
    /// Only setup problems (unknown product, unknown tracker kind, store failures)
    /// are errors; per-source failures are part of the returned result.
    ///
    /// A cross-source comparison needs at least two sources with a value from this pass.
    /// Sources that failed this pass are left out even if they hold an older value, so when
    /// only one source succeeds no comparison is stored and the event's savings are `None`.
    pub async fn check_product(&self, product_id: &str) -> Result<ProductCheckResult, AppError> {
        let started = Instant::now();
        let product = self.require_product(product_id).await?;
        let mut result = ProductCheckResult::empty(&product.id);

        if !product.is_active || product.is_paused {
            debug!("Skipping product {} (inactive or paused)", product.id);
            result.skipped = true;
            return Ok(result);
        }

        let plugin = self.plugins.get_tracker(product.tracker_type.as_str()).await?;
        counter!("uatu_products_checked_total").increment(1);

        // Sources run one after another; each one's writes finish before the next starts
        let sources = self.store.list_sources(&product.id).await?;
        for source in sources.iter().filter(|s| s.is_active) {
            let source_result = self.source_tracker.check_source(source, plugin.as_ref()).await;
            result.sources_checked += 1;
            if source_result.success {
                result.sources_succeeded += 1;
            }
            if source_result.changed {
                result.changes_detected += 1;
            }
            result.source_results.push(source_result);
        }

        let sources = self.store.list_sources(&product.id).await?;
        let Some(mut product) = self.store.get_product(&product.id).await? else {
            warn!("Product {} was deleted during its check", product_id);
            result.success = false;
            result.error = Some("Product deleted during check".to_string());
            return Ok(result);
        };

        let now = Utc::now();
        let next = next_check_after(&product.check_interval, now, self.config.scheduler.fallback_interval());
        product.record_check(now, next);

        // Sources that failed this cycle are left out of the aggregate
        let failed_now: Vec<&str> = result
            .source_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.source_id.as_str())
            .collect();
        let usable: Vec<&Source> = sources
            .iter()
            .filter(|s| s.is_active && s.current_value.is_some() && !failed_now.contains(&s.id.as_str()))
            .collect();

        let best = select_best(plugin.as_ref(), &usable);
        if let Some(best) = best {
            let value = best.current_value.clone().unwrap_or_default();
            product.set_best(best.id.clone(), value);
        }
        self.store.save_product(&product).await?;

        result.best_source_id = product.best_source_id.clone();
        result.best_value = product.best_value.clone();

        if let (Some(best), true) = (best, usable.len() >= 2) {
            let comparison = build_comparison(plugin.as_ref(), &product.id, &usable, &best.id)?;
            self.store.save_comparison(&comparison).await?;
            result.comparison = Some(comparison);
        }

        if let Some(trigger) = triggering_change(&product, &result.source_results) {
            let event = EventBuilder::new(plugin.as_ref(), &self.config.notifications.base_url).build(
                &product,
                trigger,
                &sources,
                &result.source_results,
                result.comparison.as_ref(),
            );
            let (sent, failed) = self.dispatch(&product, &event).await?;
            result.notifications_sent = sent;
            result.notifications_failed = failed;
        }

        if result.sources_checked > 0 && result.sources_succeeded == 0 {
            result.success = false;
            result.error = Some(format!("All {} source(s) failed", result.sources_checked));
        }

        result.total_time_ms = started.elapsed().as_millis() as u64;
        histogram!("uatu_product_check_duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            "Checked product {}: {}/{} sources ok, {} changed, {} notification(s)",
            product.id,
            result.sources_succeeded,
            result.sources_checked,
            result.changes_detected,
            result.notifications_sent
        );
        Ok(result)
    }

    /// Sends the event through every enabled notification config. Returns (sent, failed).
    async fn dispatch(&self, product: &Product, event: &NotificationEvent) -> Result<(usize, usize), AppError> {
        let configs = self.store.list_notification_configs(&product.id).await?;
        let mut sent = 0;
        let mut failed = 0;

        for config in configs.iter().filter(|c| c.is_enabled) {
            let log = match self.plugins.get_notifier(&config.notifier_type).await {
                Err(e) => NotificationLog::failed(&product.id, &config.notifier_type, e.to_string()),
                Ok(notifier) => match notifier.notify(event, &config.config).await {
                    Ok(outcome) if outcome.success => {
                        NotificationLog::sent(&product.id, &config.notifier_type, outcome.message_id)
                    }
                    Ok(outcome) => NotificationLog::failed(
                        &product.id,
                        &config.notifier_type,
                        outcome.error.unwrap_or_else(|| "Notifier reported failure".to_string()),
                    ),
                    Err(e) => NotificationLog::failed(&product.id, &config.notifier_type, e.to_string()),
                },
            };

            if log.status == NotificationStatus::Sent {
                sent += 1;
                counter!("uatu_notifications_sent_total").increment(1);
            } else {
                failed += 1;
                counter!("uatu_notifications_failed_total").increment(1);
                warn!(
                    "{} notification for product {} failed: {}",
                    config.notifier_type,
                    product.id,
                    log.error.as_deref().unwrap_or_default()
                );
            }

            if let Err(e) = self.store.append_notification_log(&log).await {
                error!("Failed to record notification log for product {}: {}", product.id, e);
            }
        }

        Ok((sent, failed))
    }
}

/// Pairwise reduction with the tracker's own comparison. A later source replaces the
/// current best only when strictly better, so ties keep the earlier source.
pub fn select_best<'a>(plugin: &dyn TrackerPlugin, sources: &[&'a Source]) -> Option<&'a Source> {
    let better = match plugin.best_direction() {
        BestDirection::Lowest => ChangeType::Decreased,
        BestDirection::Highest => ChangeType::Increased,
    };
    select_extreme(plugin, sources, better)
}

/// Mirror of [`select_best`]; versions are ordered component-wise rather than by scalar.
pub fn select_worst<'a>(plugin: &dyn TrackerPlugin, sources: &[&'a Source]) -> Option<&'a Source> {
    let worse = match plugin.best_direction() {
        BestDirection::Lowest => ChangeType::Increased,
        BestDirection::Highest => ChangeType::Decreased,
    };
    select_extreme(plugin, sources, worse)
}

fn select_extreme<'a>(plugin: &dyn TrackerPlugin, sources: &[&'a Source], replace_on: ChangeType) -> Option<&'a Source> {
    sources.iter().copied().fold(None, |held: Option<&'a Source>, candidate| {
        let Some(current) = held else {
            return Some(candidate);
        };
        match (&current.current_value, &candidate.current_value) {
            (Some(kept), Some(challenger)) if plugin.compare(kept, challenger).change_type == replace_on => {
                Some(candidate)
            }
            _ => Some(current),
        }
    })
}

fn build_comparison(
    plugin: &dyn TrackerPlugin,
    product_id: &str,
    sources: &[&Source],
    best_source_id: &str,
) -> Result<ValueComparison, AppError> {
    let entries = sources
        .iter()
        .filter_map(|s| {
            let value = s.current_value.clone()?;
            Some(SourceComparison {
                source_id: s.id.clone(),
                store_name: s.get_store_display_name(),
                formatted_value: plugin.format(&value),
                scalar: plugin.scalar(&value),
                value,
                url: s.url.clone(),
            })
        })
        .collect();

    let mut comparison = ValueComparison::new(product_id.to_string(), entries, best_source_id, plugin.best_direction())
        .map_err(AppError::Internal)?;

    if let Some(worst) = select_worst(plugin, sources) {
        comparison.worst_source_id = Some(worst.id.clone());
        comparison.worst_value = worst.current_value.clone();
    }
    Ok(comparison)
}
