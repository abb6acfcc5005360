use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub success: bool,
    pub value: serde_json::Value,
    pub normalized: String,
    /// 0..=100
    pub confidence: f32,
    pub metadata: HashMap<String, String>,
}

impl ParseResult {
    pub fn failed() -> Self {
        Self {
            success: false,
            value: serde_json::Value::Null,
            normalized: String::new(),
            confidence: 0.0,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonResult {
    pub changed: bool,
    pub change_type: ChangeType,
    /// Magnitude of the change, never negative.
    pub difference: f64,
    /// Relative magnitude in percent, never negative. `None` when undefined.
    pub percent_change: Option<f64>,
}

impl ComparisonResult {
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            change_type: ChangeType::Unchanged,
            difference: 0.0,
            percent_change: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Increased,
    Decreased,
    Unchanged,
}

impl ChangeType {
    pub fn sign(&self) -> &'static str {
        match self {
            ChangeType::Increased => "+",
            ChangeType::Decreased => "-",
            ChangeType::Unchanged => "",
        }
    }
}

/// Which end of a tracker's ordering counts as the best value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BestDirection {
    Lowest,
    Highest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementMatch {
    pub selector: String,
    pub text: String,
    pub html: String,
    pub context: String,
    pub confidence: f32,
    /// Index among all matches in document order.
    pub position: usize,
}

/// Hints about the page a value was extracted from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseContext {
    pub url: Option<String>,
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub field_type: ConfigFieldType,
    pub label: String,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    pub options: Option<Vec<ConfigOption>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigFieldType {
    Text,
    Number,
    Select,
    Checkbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    /// Checks required fields are present and typed fields hold the right JSON kind.
    pub fn validate(&self, config: &serde_json::Value) -> bool {
        let Some(obj) = config.as_object() else {
            return false;
        };

        self.fields.iter().all(|field| match obj.get(&field.name) {
            None | Some(serde_json::Value::Null) => !field.required,
            Some(value) => match field.field_type {
                ConfigFieldType::Text => value.is_string(),
                ConfigFieldType::Number => value.is_number(),
                ConfigFieldType::Checkbox => value.is_boolean(),
                ConfigFieldType::Select => value.as_str().is_some_and(|v| {
                    field
                        .options
                        .as_ref()
                        .is_none_or(|options| options.iter().any(|o| o.value == v))
                }),
            },
        })
    }
}

/// Value trackers (price, version, number). Everything except the lifecycle hooks is pure.
#[async_trait]
pub trait TrackerPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn plugin_type(&self) -> &str;
    fn description(&self) -> &str;

    fn parse(&self, text: &str) -> ParseResult;

    /// Parse with page hints. Trackers that can use the page's locale override this.
    fn parse_in_context(&self, text: &str, _context: &ParseContext) -> ParseResult {
        self.parse(text)
    }

    fn format(&self, value: &serde_json::Value) -> String;
    fn compare(&self, old_value: &serde_json::Value, new_value: &serde_json::Value) -> ComparisonResult;

    /// Whether a persisted value has the shape this tracker produces.
    fn validate_value(&self, value: &serde_json::Value) -> bool;

    /// Comparable scalar for aggregates (average, savings). `None` if not representable.
    fn scalar(&self, value: &serde_json::Value) -> Option<f64>;

    fn best_direction(&self) -> BestDirection {
        BestDirection::Highest
    }

    /// Human-readable difference for notifications, e.g. `-15.00 (-15.0%)`.
    fn describe_change(
        &self,
        _old_value: &serde_json::Value,
        _new_value: &serde_json::Value,
        comparison: &ComparisonResult,
    ) -> String {
        let sign = comparison.change_type.sign();
        match comparison.percent_change {
            Some(pct) => format!("{}{:.2} ({}{:.1}%)", sign, comparison.difference, sign, pct),
            None => format!("{}{:.2}", sign, comparison.difference),
        }
    }

    fn get_search_variations(&self, input: &str) -> Vec<String>;
    fn rank_matches(&self, input: &str, matches: &[ElementMatch]) -> Vec<ElementMatch>;

    fn get_config_schema(&self) -> ConfigSchema;
    fn validate_config(&self, config: &serde_json::Value) -> bool {
        self.get_config_schema().validate(config)
    }

    async fn initialize(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    async fn shutdown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Stable descending sort by confidence; equal scores keep their incoming order.
pub fn sort_by_confidence(matches: &mut [ElementMatch]) {
    matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
}
