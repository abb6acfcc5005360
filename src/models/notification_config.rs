use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::generate_id;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    pub id: String,
    pub product_id: String,
    pub notifier_type: String, // "email", "discord", etc.
    pub config: serde_json::Value, // Plugin-specific settings
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotificationConfig {
    pub notifier_type: String,
    pub config: serde_json::Value,
    pub is_enabled: Option<bool>,
}

impl NotificationConfig {
    pub fn new(product_id: String, new_config: NewNotificationConfig) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            product_id,
            notifier_type: new_config.notifier_type,
            config: new_config.config,
            is_enabled: new_config.is_enabled.unwrap_or(true),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update_config(&mut self, config: serde_json::Value) {
        self.config = config;
        self.updated_at = Utc::now();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.is_enabled = enabled;
        self.updated_at = Utc::now();
    }
}
