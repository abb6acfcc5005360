use crate::plugins::traits::{
    TrackerPlugin, ParseResult, ComparisonResult, ElementMatch, ConfigSchema, BestDirection,
};
use crate::plugins::traits::tracker::{ConfigField, ConfigFieldType};
use super::common::{
    self, CandidateVerdict, EXACT_MATCH_BONUS, NUMBER_PATTERN, compare_scalars, normalize_number,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;

const NUMBER_KEYWORDS: &[&str] = &["count", "quantity", "stock", "available", "inventory", "qty"];

const WORD_UNITS: &str = "items?|units?|pcs|pieces|left|in stock|sold|reviews?|ratings?|stars?|users?|views?|downloads?|followers|kg|g|lbs?|ml|l|gb|mb|tb";

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Option<String>,
}

impl Quantity {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        Some(Quantity {
            value: value.get("value")?.as_f64()?,
            unit: value.get("unit").and_then(|u| u.as_str()).map(str::to_string),
        })
    }

    pub fn to_value(&self) -> serde_json::Value {
        json!({"value": self.value, "unit": self.unit})
    }
}

fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub struct NumberTracker {
    number_regex: Option<Regex>,
    any_number: Option<Regex>,
}

impl Default for NumberTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NumberTracker {
    pub fn new() -> Self {
        let pattern = format!(
            r"(?i)(?P<sign>[-−])?(?P<num>{})(?:\s*(?P<unit>%|(?:{})\b))?",
            NUMBER_PATTERN, WORD_UNITS
        );

        NumberTracker {
            number_regex: Regex::new(&pattern).ok(),
            any_number: Regex::new(NUMBER_PATTERN).ok(),
        }
    }

    /// First number in the text. A hyphen glued to a preceding letter or digit belongs to
    /// an identifier such as "X-200" or "COVID-19"; such numbers are passed over in favour of
    /// a later one and only used, unsigned, when nothing else matches.
    fn extract_number(&self, text: &str) -> Option<Quantity> {
        let mut fallback = None;

        for captures in self.number_regex.as_ref()?.captures_iter(text) {
            let start = captures.get(0).map(|m| m.start()).unwrap_or(0);
            let in_identifier = captures.name("sign").is_some()
                && text[..start].chars().next_back().is_some_and(char::is_alphanumeric);

            let Some(normalized) = captures.name("num").and_then(|m| normalize_number(m.as_str())) else {
                continue;
            };
            let Ok(mut value) = normalized.parse::<f64>() else {
                continue;
            };
            if captures.name("sign").is_some() && !in_identifier {
                value = -value;
            }

            let quantity = Quantity {
                value,
                unit: captures.name("unit").map(|u| u.as_str().to_lowercase()),
            };
            if !in_identifier {
                return Some(quantity);
            }
            fallback.get_or_insert(quantity);
        }

        fallback
    }

    fn score(&self, text: &str, quantity: &Quantity) -> f32 {
        let mut confidence: f32 = 50.0;

        if quantity.unit.is_some() {
            confidence += 15.0;
        }
        if common::mentions_any(text, NUMBER_KEYWORDS) {
            confidence += 10.0;
        }
        // Several numbers in one string make it unclear which one is meant
        let numbers = self.any_number.as_ref().map(|r| r.find_iter(text).count()).unwrap_or(0);
        if numbers > 2 {
            confidence -= 15.0;
        }

        confidence.clamp(0.0, 100.0)
    }
}

#[async_trait]
impl TrackerPlugin for NumberTracker {
    fn name(&self) -> &str {
        "Number Tracker"
    }

    fn plugin_type(&self) -> &str {
        "number"
    }

    fn description(&self) -> &str {
        "Tracks numeric changes on web pages"
    }

    fn parse(&self, text: &str) -> ParseResult {
        let Some(quantity) = self.extract_number(text) else {
            return ParseResult::failed();
        };

        let mut metadata = HashMap::new();
        if let Some(unit) = &quantity.unit {
            metadata.insert("unit".to_string(), unit.clone());
        }

        ParseResult {
            success: true,
            value: quantity.to_value(),
            normalized: render_number(quantity.value),
            confidence: self.score(text, &quantity),
            metadata,
        }
    }

    fn format(&self, value: &serde_json::Value) -> String {
        let Some(quantity) = Quantity::from_value(value) else {
            return "N/A".to_string();
        };

        match quantity.unit.as_deref() {
            Some("%") => format!("{}%", render_number(quantity.value)),
            Some(unit) => format!("{} {}", render_number(quantity.value), unit),
            None => render_number(quantity.value),
        }
    }

    fn compare(&self, old_value: &serde_json::Value, new_value: &serde_json::Value) -> ComparisonResult {
        match (Quantity::from_value(old_value), Quantity::from_value(new_value)) {
            (Some(old), Some(new)) => compare_scalars(old.value, new.value),
            _ => ComparisonResult::unchanged(),
        }
    }

    fn validate_value(&self, value: &serde_json::Value) -> bool {
        Quantity::from_value(value).is_some_and(|q| q.value.is_finite())
    }

    fn scalar(&self, value: &serde_json::Value) -> Option<f64> {
        Quantity::from_value(value).map(|q| q.value)
    }

    fn best_direction(&self) -> BestDirection {
        BestDirection::Highest
    }

    fn get_search_variations(&self, input: &str) -> Vec<String> {
        let mut variations = vec![input.trim().to_string()];

        let Some(quantity) = self.extract_number(input) else {
            return common::dedupe(variations);
        };

        let plain = render_number(quantity.value);
        let mut numbers = vec![
            plain.clone(),
            common::group_thousands(&plain, ',', '.'),
            common::group_thousands(&plain, '.', ','),
            common::group_thousands(&plain, ' ', ','),
        ];
        if quantity.value.fract() != 0.0 {
            numbers.push(format!("{:.2}", quantity.value));
        }

        for number in &numbers {
            variations.push(number.clone());
            if let Some(unit) = &quantity.unit {
                variations.push(format!("{} {}", number, unit));
                variations.push(format!("{}{}", number, unit));
            }
        }

        common::dedupe(variations)
    }

    fn rank_matches(&self, input: &str, matches: &[ElementMatch]) -> Vec<ElementMatch> {
        let target = self.extract_number(input).map(|q| q.value);

        common::rerank(matches, NUMBER_KEYWORDS, |candidate| {
            match (self.extract_number(&candidate.text), target) {
                (Some(found), Some(target)) if (found.value - target).abs() < 1e-9 => {
                    CandidateVerdict::Keep(EXACT_MATCH_BONUS)
                }
                _ => CandidateVerdict::Keep(0.0),
            }
        })
    }

    fn get_config_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![
                ConfigField {
                    name: "decimal_places".to_string(),
                    field_type: ConfigFieldType::Number,
                    label: "Decimal Places".to_string(),
                    required: false,
                    default: Some(json!(2)),
                    options: None,
                },
            ],
        }
    }

    fn validate_config(&self, config: &serde_json::Value) -> bool {
        if !self.get_config_schema().validate(config) {
            return false;
        }
        match config.get("decimal_places") {
            Some(places) if !places.is_null() => places.as_i64().is_some_and(|p| (0..=10).contains(&p)),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::traits::ChangeType;
    use rstest::rstest;

    #[test]
    fn test_number_parsing_integer() {
        let tracker = NumberTracker::new();
        let result = tracker.parse("42");

        assert!(result.success);
        assert_eq!(result.value["value"], 42.0);
        assert!(result.value["unit"].is_null());
        assert_eq!(result.normalized, "42");
        assert_eq!(result.confidence, 50.0);
    }

    #[test]
    fn test_number_parsing_decimal() {
        let tracker = NumberTracker::new();
        let result = tracker.parse("42.5");

        assert!(result.success);
        assert_eq!(result.value["value"], 42.5);
        assert_eq!(result.normalized, "42.5");
    }

    #[rstest]
    #[case("1,234,567", 1234567.0)]
    #[case("1,234.56", 1234.56)]
    #[case("1.234,56", 1234.56)]
    #[case("1.234.567", 1234567.0)]
    #[case("12,5", 12.5)]
    fn test_number_parsing_with_separators(#[case] input: &str, #[case] expected: f64) {
        let tracker = NumberTracker::new();
        let result = tracker.parse(input);

        assert!(result.success);
        assert!((result.value["value"].as_f64().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_number_parsing_with_units() {
        let tracker = NumberTracker::new();

        let items = tracker.parse("The count is 25 items");
        assert!(items.success);
        assert_eq!(items.value["value"], 25.0);
        assert_eq!(items.value["unit"], "items");
        assert_eq!(items.confidence, 75.0);

        let percent = tracker.parse("45%");
        assert_eq!(percent.value["unit"], "%");

        let negative = tracker.parse("-12 units");
        assert_eq!(negative.value["value"], -12.0);
    }

    #[rstest]
    #[case("Model X-200: 45 in stock", 45.0)]
    #[case("COVID-19 cases: 1,234", 1234.0)]
    #[case("SKU-42", 42.0)]
    #[case("Change: -3.5%", -3.5)]
    #[case("Balance (-20)", -20.0)]
    fn test_hyphenated_identifiers_are_not_negative(#[case] input: &str, #[case] expected: f64) {
        let tracker = NumberTracker::new();
        let result = tracker.parse(input);

        assert!(result.success, "failed to parse {}", input);
        assert!((result.value["value"].as_f64().unwrap() - expected).abs() < 1e-9, "{}", input);
    }

    #[test]
    fn test_crowded_text_lowers_confidence() {
        let tracker = NumberTracker::new();
        let result = tracker.parse("3 of 10 out of 25");

        assert!(result.success);
        assert_eq!(result.value["value"], 3.0);
        assert_eq!(result.confidence, 35.0);
    }

    #[test]
    fn test_number_parsing_failure() {
        let tracker = NumberTracker::new();
        let result = tracker.parse("no numbers here");

        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_number_formatting() {
        let tracker = NumberTracker::new();

        assert_eq!(tracker.format(&json!({"value": 123.45, "unit": null})), "123.45");
        assert_eq!(tracker.format(&json!({"value": 1500.0, "unit": "items"})), "1500 items");
        assert_eq!(tracker.format(&json!({"value": 12.0, "unit": "%"})), "12%");
        assert_eq!(tracker.format(&json!("garbage")), "N/A");
    }

    #[rstest]
    #[case("1,234.5 items")]
    #[case("87%")]
    #[case("42")]
    #[case("-3.25")]
    fn test_format_round_trip(#[case] input: &str) {
        let tracker = NumberTracker::new();
        let first = tracker.parse(input);
        let second = tracker.parse(&tracker.format(&first.value));

        assert_eq!(
            Quantity::from_value(&first.value),
            Quantity::from_value(&second.value)
        );
    }

    #[test]
    fn test_number_comparison() {
        let tracker = NumberTracker::new();
        let old_number = json!({"value": 100.0});
        let new_number = json!({"value": 150.0});

        let result = tracker.compare(&old_number, &new_number);
        assert!(result.changed);
        assert_eq!(result.change_type, ChangeType::Increased);
        assert_eq!(result.difference, 50.0);
        assert_eq!(result.percent_change, Some(50.0));

        let result = tracker.compare(&new_number, &old_number);
        assert_eq!(result.change_type, ChangeType::Decreased);
        assert_eq!(result.difference, 50.0);
    }

    #[test]
    fn test_comparison_with_absent_values() {
        let tracker = NumberTracker::new();
        assert!(!tracker.compare(&json!(null), &json!({"value": 1.0})).changed);
        assert!(!tracker.compare(&json!({"value": 1.0}), &json!({"value": 1.0})).changed);
    }

    #[test]
    fn test_search_variations() {
        let tracker = NumberTracker::new();
        let variations = tracker.get_search_variations("1234 items");

        assert!(variations.contains(&"1234 items".to_string()));
        assert!(variations.contains(&"1234".to_string()));
        assert!(variations.contains(&"1,234".to_string()));
        assert!(variations.contains(&"1.234".to_string()));
        assert!(variations.contains(&"1,234 items".to_string()));
    }

    #[test]
    fn test_rank_matches_prefers_stock_markup() {
        let tracker = NumberTracker::new();
        let matches = vec![
            ElementMatch {
                selector: "span.rating".to_string(),
                text: "4.5".to_string(),
                html: "<span class=\"rating\">4.5</span>".to_string(),
                context: String::new(),
                confidence: 60.0,
                position: 0,
            },
            ElementMatch {
                selector: "span.stock-count".to_string(),
                text: "12 left".to_string(),
                html: "<span class=\"stock-count\">12 left</span>".to_string(),
                context: String::new(),
                confidence: 40.0,
                position: 1,
            },
        ];

        let ranked = tracker.rank_matches("12", &matches);
        assert_eq!(ranked[0].selector, "span.stock-count");
        assert_eq!(ranked[0].confidence, 70.0);
        assert_eq!(ranked[1].confidence, 60.0);
    }

    #[test]
    fn test_config_validation() {
        let tracker = NumberTracker::new();
        assert!(tracker.validate_config(&json!({"decimal_places": 2})));
        assert!(!tracker.validate_config(&json!({"decimal_places": 11})));
        assert!(!tracker.validate_config(&json!({"decimal_places": "two"})));
        assert!(tracker.validate_config(&json!({})));
    }
}
