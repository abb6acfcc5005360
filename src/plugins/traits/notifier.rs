use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tracker::{ConfigSchema, ChangeType};
use crate::models::{ThresholdType, TrackerType};

pub type NotifierError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub product: ProductInfo,
    pub source: Option<SourceInfo>,
    /// Present when the product tracks more than one active source.
    pub comparison: Option<ComparisonInfo>,
    pub change_type: ChangeType,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub formatted_old: String,
    pub formatted_new: String,
    pub difference: String,
    pub percent_change: Option<f64>,
    pub threshold: Option<ThresholdInfo>,
    pub action_urls: ActionUrls,
    pub screenshot: Option<String>, // Base64 PNG
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: String,
    pub name: String,
    pub tracker_type: TrackerType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub url: String,
    pub store_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonInfo {
    pub best: BestDealInfo,
    pub all_sources: Vec<SourceComparisonInfo>,
    pub savings: Option<SavingsInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestDealInfo {
    pub source_id: String,
    pub store_name: String,
    pub value: serde_json::Value,
    pub formatted_value: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceComparisonInfo {
    pub source_id: String,
    pub store_name: String,
    pub value: serde_json::Value,
    pub formatted_value: String,
    pub url: String,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsInfo {
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdInfo {
    pub threshold_type: ThresholdType,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionUrls {
    pub dismiss: String,
    pub false_positive: String,
    pub purchased: String,
    pub view_product: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn delivered(message_id: Option<String>) -> Self {
        Self { success: true, message_id, error: None }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self { success: false, message_id: None, error: Some(error.into()) }
    }
}

/// Outbound notification transports (email, Discord, etc.). The per-product settings
/// blob from the notification config is handed to every call.
#[async_trait]
pub trait NotifierPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn plugin_type(&self) -> &str;
    fn description(&self) -> &str;

    async fn initialize(&self, config: &serde_json::Value) -> Result<(), NotifierError>;
    async fn notify(&self, event: &NotificationEvent, config: &serde_json::Value) -> Result<NotificationResult, NotifierError>;
    async fn test_connection(&self, config: &serde_json::Value) -> Result<bool, NotifierError>;

    fn get_config_schema(&self) -> ConfigSchema;
    fn validate_config(&self, config: &serde_json::Value) -> bool;

    async fn shutdown(&self) -> Result<(), NotifierError> {
        Ok(())
    }
}
