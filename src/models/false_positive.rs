use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::generate_id;

/// A value the user reported as wrongly detected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FalsePositive {
    pub id: String,
    pub product_id: String,
    pub source_id: String,
    pub detected_text: String,
    pub detected_value: serde_json::Value,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFalsePositive {
    pub product_id: String,
    pub source_id: String,
    pub detected_text: String,
    pub detected_value: serde_json::Value,
    pub notes: Option<String>,
}

impl FalsePositive {
    pub fn new(new_fp: NewFalsePositive) -> Self {
        Self {
            id: generate_id(),
            product_id: new_fp.product_id,
            source_id: new_fp.source_id,
            detected_text: new_fp.detected_text,
            detected_value: new_fp.detected_value,
            notes: new_fp.notes,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_false_positive_creation() {
        let fp = FalsePositive::new(NewFalsePositive {
            product_id: "product123".to_string(),
            source_id: "source123".to_string(),
            detected_text: "$99.99".to_string(),
            detected_value: json!({"amount": "99.99", "currency": "USD"}),
            notes: Some("Detected old price in cache".to_string()),
        });

        assert_eq!(fp.source_id, "source123");
        assert_eq!(fp.detected_text, "$99.99");
        assert_eq!(fp.detected_value["amount"], "99.99");
    }
}
