use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::utils::schedule::is_valid_cron;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Consecutive failures after which a source is deactivated.
    pub retry_attempts: u32,
    /// Seconds.
    pub request_timeout: u64,
    pub user_agent: String,
    pub capture_screenshots: bool,
    pub default_currency: String,
    /// Parses scoring below this are "low confidence".
    pub min_confidence: f32,
    /// Whether a low-confidence parse counts as a failure for deactivation purposes.
    pub count_low_confidence_as_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub cycle_interval: String,
    pub default_check_interval: String,
    pub fallback_interval_minutes: u64,
    pub inter_product_delay_ms: u64,
    pub max_concurrent_products: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub base_url: String,
    pub smtp: SmtpConfig,
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            request_timeout: 30,
            user_agent: "UatuEngine/0.1".to_string(),
            capture_screenshots: false,
            default_currency: "AUD".to_string(),
            min_confidence: 50.0,
            count_low_confidence_as_error: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: "*/5 * * * *".to_string(),
            default_check_interval: "0 */6 * * *".to_string(),
            fallback_interval_minutes: 60,
            inter_product_delay_ms: 2000,
            max_concurrent_products: 1,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            smtp: SmtpConfig::default(),
            discord: DiscordConfig::default(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 587,
            username: None,
            password: None,
            from_address: None,
            from_name: "Uatu Watcher".to_string(),
            use_tls: true,
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            username: "Uatu Watcher".to_string(),
            avatar_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl SchedulerConfig {
    pub fn inter_product_delay(&self) -> Duration {
        Duration::from_millis(self.inter_product_delay_ms)
    }

    pub fn fallback_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.fallback_interval_minutes as i64)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("UATU").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file, still allowing `UATU__*` overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("UATU").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scraper.retry_attempts == 0 {
            return Err(ConfigError::Message("Scraper retry_attempts must be greater than 0".into()));
        }

        if self.scraper.request_timeout == 0 {
            return Err(ConfigError::Message("Scraper request_timeout must be greater than 0".into()));
        }

        if !(0.0..=100.0).contains(&self.scraper.min_confidence) {
            return Err(ConfigError::Message("Scraper min_confidence must be between 0 and 100".into()));
        }

        if !is_valid_cron(&self.scheduler.cycle_interval) {
            return Err(ConfigError::Message("Invalid cron expression in scheduler.cycle_interval".into()));
        }

        if !is_valid_cron(&self.scheduler.default_check_interval) {
            return Err(ConfigError::Message(
                "Invalid cron expression in scheduler.default_check_interval".into(),
            ));
        }

        if self.scheduler.fallback_interval_minutes == 0 {
            return Err(ConfigError::Message(
                "Scheduler fallback_interval_minutes must be greater than 0".into(),
            ));
        }

        if self.scheduler.max_concurrent_products == 0 {
            return Err(ConfigError::Message(
                "Scheduler max_concurrent_products must be greater than 0".into(),
            ));
        }

        if Url::parse(&self.notifications.base_url).is_err() {
            return Err(ConfigError::Message("Invalid notifications base URL format".into()));
        }

        if self.notifications.smtp.port == 0 {
            return Err(ConfigError::Message("SMTP port must be greater than 0".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}
