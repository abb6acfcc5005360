use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::generate_id;

/// Immutable snapshot of one successful fetch and parse of a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueHistory {
    pub id: String,
    pub source_id: String,
    pub value: serde_json::Value,
    pub text: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl ValueHistory {
    pub fn new(source_id: String, value: serde_json::Value, text: String, confidence: f32, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            source_id,
            value,
            text,
            confidence,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_history_creation() {
        let value = json!({"amount": "19.99", "currency": "USD"});
        let now = Utc::now();
        let history = ValueHistory::new("source123".to_string(), value.clone(), "$19.99".to_string(), 85.0, now);

        assert_eq!(history.source_id, "source123");
        assert_eq!(history.text, "$19.99");
        assert_eq!(history.value, value);
        assert_eq!(history.timestamp, now);
        assert_eq!(history.id.len(), 32);
    }
}
