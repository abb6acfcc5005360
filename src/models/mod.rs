use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod product;
pub mod source;
pub mod value_history;
pub mod value_comparison;
pub mod notification_config;
pub mod notification_log;
pub mod false_positive;

pub use product::*;
pub use source::*;
pub use value_history::*;
pub use value_comparison::*;
pub use notification_config::*;
pub use notification_log::*;
pub use false_positive::*;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackerType {
    Price,
    Version,
    Number,
}

impl TrackerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerType::Price => "price",
            TrackerType::Version => "version",
            TrackerType::Number => "number",
        }
    }
}

impl fmt::Display for TrackerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "price" => Ok(TrackerType::Price),
            "version" => Ok(TrackerType::Version),
            "number" => Ok(TrackerType::Number),
            other => Err(format!("Unknown tracker type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOn {
    AnyChange,
    Decrease,
    Increase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectorType {
    Css,
    Xpath,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Failed,
    Actioned,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Dismissed,
    FalsePositive,
    Purchased,
}

pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
