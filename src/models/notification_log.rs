use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::{NotificationStatus, NotificationAction, generate_id};

/// One dispatch attempt or one user action. Entries are never modified; acting on a
/// notification appends a new `Actioned` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationLog {
    pub id: String,
    pub product_id: String,
    pub notification_type: String,
    pub status: NotificationStatus,
    pub action: Option<NotificationAction>,
    pub error: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationLog {
    pub fn sent(product_id: &str, notification_type: &str, message_id: Option<String>) -> Self {
        Self::build(product_id, notification_type, NotificationStatus::Sent, None, None, message_id)
    }

    pub fn failed(product_id: &str, notification_type: &str, error: String) -> Self {
        Self::build(product_id, notification_type, NotificationStatus::Failed, None, Some(error), None)
    }

    pub fn actioned(product_id: &str, action: NotificationAction) -> Self {
        Self::build(product_id, "user_action", NotificationStatus::Actioned, Some(action), None, None)
    }

    fn build(
        product_id: &str,
        notification_type: &str,
        status: NotificationStatus,
        action: Option<NotificationAction>,
        error: Option<String>,
        message_id: Option<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            product_id: product_id.to_string(),
            notification_type: notification_type.to_string(),
            status,
            action,
            error,
            message_id,
            timestamp: Utc::now(),
        }
    }
}
