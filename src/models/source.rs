use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::{SelectorType, generate_id};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: String,
    pub product_id: String,

    pub url: String,
    pub store_name: Option<String>,
    pub title: Option<String>,

    pub selector: String,
    pub selector_type: SelectorType,

    // Original values are written once, on the first successful parse
    pub original_value: Option<serde_json::Value>,
    pub current_value: Option<serde_json::Value>,
    pub original_text: Option<String>,
    pub current_text: Option<String>,

    pub is_active: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub product_id: String,
    pub url: String,
    pub store_name: Option<String>,
    pub title: Option<String>,
    pub selector: String,
    pub selector_type: Option<SelectorType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSource {
    pub store_name: Option<String>,
    pub title: Option<String>,
    pub selector: Option<String>,
    pub selector_type: Option<SelectorType>,
    pub is_active: Option<bool>,
}

impl Source {
    pub fn new(new_source: NewSource) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            product_id: new_source.product_id,
            url: new_source.url,
            store_name: new_source.store_name,
            title: new_source.title,
            selector: new_source.selector,
            selector_type: new_source.selector_type.unwrap_or(SelectorType::Css),
            original_value: None,
            current_value: None,
            original_text: None,
            current_text: None,
            is_active: true,
            last_checked: None,
            error_count: 0,
            last_error: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update(&mut self, update: UpdateSource) {
        if let Some(store_name) = update.store_name {
            self.store_name = Some(store_name);
        }
        if let Some(title) = update.title {
            self.title = Some(title);
        }
        if let Some(selector) = update.selector {
            self.selector = selector;
        }
        if let Some(selector_type) = update.selector_type {
            self.selector_type = selector_type;
        }
        if let Some(is_active) = update.is_active {
            if is_active {
                self.reactivate();
            } else {
                self.is_active = false;
            }
        }

        self.updated_at = Utc::now();
    }

    pub fn update_value(&mut self, text: String, value: serde_json::Value, checked_at: DateTime<Utc>) {
        if self.original_value.is_none() {
            self.original_text = Some(text.clone());
            self.original_value = Some(value.clone());
        }

        self.current_text = Some(text);
        self.current_value = Some(value);
        self.last_checked = Some(checked_at);
        self.updated_at = checked_at;
        self.clear_error();
    }

    /// Returns the new consecutive error count.
    pub fn record_error(&mut self, error: String, at: DateTime<Utc>) -> u32 {
        self.error_count += 1;
        self.last_error = Some(error);
        self.last_error_at = Some(at);
        self.last_checked = Some(at);
        self.updated_at = at;
        self.error_count
    }

    pub fn clear_error(&mut self) {
        self.error_count = 0;
        self.last_error = None;
        self.last_error_at = None;
    }

    pub fn reactivate(&mut self) {
        self.is_active = true;
        self.clear_error();
        self.updated_at = Utc::now();
    }

    pub fn get_store_display_name(&self) -> String {
        self.store_name
            .clone()
            .unwrap_or_else(|| {
                if let Ok(url) = url::Url::parse(&self.url) {
                    url.host_str().unwrap_or("Unknown Store").to_string()
                } else {
                    "Unknown Store".to_string()
                }
            })
    }

    pub fn is_healthy(&self) -> bool {
        self.is_active && self.error_count == 0
    }
}
