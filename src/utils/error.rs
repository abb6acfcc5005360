use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plugin error: {plugin_type}: {message}")]
    Plugin { plugin_type: String, message: String },

    #[error("No {kind} plugin registered for '{name}'")]
    PluginNotFound { kind: String, name: String },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("A tracking cycle is already running")]
    CycleInProgress,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn tracker_not_found(name: &str) -> Self {
        AppError::PluginNotFound {
            kind: "tracker".to_string(),
            name: name.to_string(),
        }
    }

    pub fn notifier_not_found(name: &str) -> Self {
        AppError::PluginNotFound {
            kind: "notifier".to_string(),
            name: name.to_string(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: resource.into(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("{}", err))
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for AppError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        AppError::Scheduler(format!("{:?}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
