use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::{TrackerType, NotifyOn, ThresholdType, generate_id};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tracker_type: TrackerType,

    // Notification rules
    pub notify_on: NotifyOn,
    pub threshold_type: Option<ThresholdType>,
    pub threshold_value: Option<f64>,

    // Schedule
    pub check_interval: String, // Cron expression
    pub last_checked: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,

    // Status
    pub is_active: bool,
    pub is_paused: bool,

    // Best value across sources, owned by the tracker plugin for `tracker_type`
    pub best_source_id: Option<String>,
    pub best_value: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub tracker_type: TrackerType,
    pub notify_on: Option<NotifyOn>,
    pub threshold_type: Option<ThresholdType>,
    pub threshold_value: Option<f64>,
    pub check_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub notify_on: Option<NotifyOn>,
    pub threshold_type: Option<ThresholdType>,
    pub threshold_value: Option<f64>,
    pub check_interval: Option<String>,
    pub is_active: Option<bool>,
    pub is_paused: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub threshold_type: ThresholdType,
    pub value: f64,
}

impl Product {
    pub fn new(new_product: NewProduct) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: new_product.name,
            description: new_product.description,
            tracker_type: new_product.tracker_type,
            notify_on: new_product.notify_on.unwrap_or(NotifyOn::AnyChange),
            threshold_type: new_product.threshold_type,
            threshold_value: new_product.threshold_value,
            check_interval: new_product.check_interval.unwrap_or_else(|| "0 0 * * *".to_string()),
            last_checked: None,
            next_check: None,
            is_active: true,
            is_paused: false,
            best_source_id: None,
            best_value: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update(&mut self, update: UpdateProduct) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(notify_on) = update.notify_on {
            self.notify_on = notify_on;
        }
        if let Some(threshold_type) = update.threshold_type {
            self.threshold_type = Some(threshold_type);
        }
        if let Some(threshold_value) = update.threshold_value {
            self.threshold_value = Some(threshold_value);
        }
        if let Some(check_interval) = update.check_interval {
            self.check_interval = check_interval;
            // Reschedule from the new expression on the next cycle
            self.next_check = None;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        if let Some(is_paused) = update.is_paused {
            self.is_paused = is_paused;
        }

        self.updated_at = Utc::now();
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active || self.is_paused {
            return false;
        }

        match self.next_check {
            Some(next_check) => now >= next_check,
            None => true,
        }
    }

    /// A threshold value without a type is treated as absolute.
    pub fn threshold(&self) -> Option<Threshold> {
        self.threshold_value.map(|value| Threshold {
            threshold_type: self.threshold_type.unwrap_or(ThresholdType::Absolute),
            value,
        })
    }

    pub fn record_check(&mut self, checked_at: DateTime<Utc>, next_check: DateTime<Utc>) {
        self.last_checked = Some(checked_at);
        self.next_check = Some(next_check);
        self.updated_at = checked_at;
    }

    pub fn set_best(&mut self, source_id: String, value: serde_json::Value) {
        self.best_source_id = Some(source_id);
        self.best_value = Some(value);
    }

    pub fn clear_best(&mut self) {
        self.best_source_id = None;
        self.best_value = None;
    }
}
