use crate::plugins::traits::{
    TrackerPlugin, ParseResult, ParseContext, ComparisonResult, ElementMatch, ConfigSchema, BestDirection,
};
use crate::plugins::traits::tracker::{ConfigField, ConfigFieldType, ConfigOption};
use super::common::{
    self, CandidateVerdict, EXACT_MATCH_BONUS, NUMBER_PATTERN, compare_scalars, decimal_places,
    normalize_number,
};
use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;

const PRICE_KEYWORDS: &[&str] = &["price", "cost", "amount", "sale", "total", "rrp", "now"];
const DOLLAR_CURRENCIES: &[&str] = &["USD", "AUD", "CAD", "NZD"];
const MAX_PLAUSIBLE_PRICE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriceMatchKind {
    SymbolPrefix,
    SymbolSuffix,
    CodePrefix,
    CodeSuffix,
    Bare,
}

impl PriceMatchKind {
    fn label(&self) -> &'static str {
        match self {
            PriceMatchKind::SymbolPrefix => "symbol_prefix",
            PriceMatchKind::SymbolSuffix => "symbol_suffix",
            PriceMatchKind::CodePrefix => "code_prefix",
            PriceMatchKind::CodeSuffix => "code_suffix",
            PriceMatchKind::Bare => "bare",
        }
    }
}

struct PricePattern {
    kind: PriceMatchKind,
    regex: Regex,
}

#[derive(Debug, Clone, PartialEq)]
struct PriceCandidate {
    amount: Decimal,
    /// The amount exactly as normalized from the page, before rounding.
    normalized: String,
    marker: Option<String>,
    kind: PriceMatchKind,
}

/// Parsed price value as stored in `current_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    pub amount: Decimal,
    pub currency: String,
    pub symbol: Option<String>,
}

impl Price {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let amount = match value.get("amount")? {
            serde_json::Value::String(s) => Decimal::from_str(s).ok()?,
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok()?,
            _ => return None,
        };
        let currency = value.get("currency")?.as_str()?.to_string();
        let symbol = value
            .get("symbol")
            .and_then(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Some(Price { amount, currency, symbol })
    }

    pub fn to_value(&self) -> serde_json::Value {
        json!({
            "amount": self.amount.to_string(),
            "currency": self.currency,
            "symbol": self.symbol,
        })
    }
}

/// A minus sign only counts when it touches the amount and is not itself part of a word,
/// so "Sale - $79.99" and "X-$5" stay positive while "-$5.00" and "(-$5.00)" do not.
fn has_attached_minus(prefix: &str) -> bool {
    let mut chars = prefix.chars().rev();
    match chars.next() {
        Some('-' | '−') => !chars.next().is_some_and(char::is_alphanumeric),
        _ => false,
    }
}

pub struct PriceTracker {
    patterns: Vec<PricePattern>,
    // Longest symbols first so "US$" wins over "$"
    currency_symbols: Vec<(String, String)>,
    default_currency: String,
    locale_currency_map: HashMap<String, String>,
    url_locale_patterns: Vec<(Regex, &'static str)>,
    tld_patterns: Vec<(Regex, &'static str)>,
}

impl Default for PriceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceTracker {
    pub fn new() -> Self {
        Self::with_default_currency("AUD")
    }

    pub fn with_default_currency(default_currency: &str) -> Self {
        let default_currency = default_currency.to_uppercase();

        let mut currency_symbols: Vec<(String, String)> = [
            ("US$", "USD"),
            ("USD$", "USD"),
            ("AU$", "AUD"),
            ("A$", "AUD"),
            ("CA$", "CAD"),
            ("C$", "CAD"),
            ("NZ$", "NZD"),
            ("£", "GBP"),
            ("€", "EUR"),
            ("¥", "JPY"),
            ("₹", "INR"),
            ("₩", "KRW"),
        ]
        .iter()
        .map(|(s, c)| (s.to_string(), c.to_string()))
        .collect();
        currency_symbols.push(("$".to_string(), default_currency.clone()));
        currency_symbols.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

        let mut locale_currency_map = HashMap::new();
        for (locale, currency) in [
            ("en-AU", "AUD"), ("en-US", "USD"), ("en-GB", "GBP"), ("en-CA", "CAD"),
            ("en-NZ", "NZD"), ("fr-FR", "EUR"), ("de-DE", "EUR"), ("es-ES", "EUR"),
            ("it-IT", "EUR"), ("ja-JP", "JPY"), ("ko-KR", "KRW"), ("zh-CN", "CNY"),
            ("hi-IN", "INR"), ("en-IN", "INR"),
        ] {
            locale_currency_map.insert(locale.to_lowercase(), currency.to_string());
        }

        let symbol_alternation = r"US\$|USD\$|AU\$|A\$|CA\$|C\$|NZ\$|\$|£|€|¥|₹|₩";
        let code_alternation = r"USD|AUD|EUR|GBP|CAD|NZD|JPY|INR|CNY|KRW";

        // Most specific first
        let pattern_specs = [
            (PriceMatchKind::SymbolPrefix, format!(r"(?P<marker>{})\s*(?P<num>{})", symbol_alternation, NUMBER_PATTERN)),
            (PriceMatchKind::SymbolSuffix, format!(r"(?P<num>{})\s*(?P<marker>€|£|¥|₹|₩|\$)", NUMBER_PATTERN)),
            (PriceMatchKind::CodePrefix, format!(r"\b(?P<marker>{})\s*(?P<num>{})", code_alternation, NUMBER_PATTERN)),
            (PriceMatchKind::CodeSuffix, format!(r"(?P<num>{})\s*(?P<marker>{})\b", NUMBER_PATTERN, code_alternation)),
            (PriceMatchKind::Bare, format!(r"(?P<num>{})", NUMBER_PATTERN)),
        ];

        let patterns = pattern_specs
            .into_iter()
            .filter_map(|(kind, pattern)| Regex::new(&pattern).ok().map(|regex| PricePattern { kind, regex }))
            .collect();

        let url_locale_patterns = [
            (r"/en-au/|/au/|/australia/", "AUD"),
            (r"/en-us/|/us/|/usa/", "USD"),
            (r"/en-gb/|/gb/|/uk/", "GBP"),
            (r"/en-ca/|/ca/|/canada/", "CAD"),
            (r"/en-nz/|/nz/", "NZD"),
            (r"/de/|/germany/|/fr/|/france/|/es/|/spain/|/it/|/italy/", "EUR"),
            (r"/jp/|/japan/", "JPY"),
            (r"/in/|/india/", "INR"),
        ]
        .into_iter()
        .filter_map(|(p, c)| Regex::new(p).ok().map(|r| (r, c)))
        .collect();

        let tld_patterns = [
            (r"\.com\.au$|\.au$", "AUD"),
            (r"\.co\.uk$|\.uk$", "GBP"),
            (r"\.co\.nz$|\.nz$", "NZD"),
            (r"\.ca$", "CAD"),
            (r"\.de$|\.fr$|\.es$|\.it$|\.nl$|\.ie$", "EUR"),
            (r"\.jp$", "JPY"),
            (r"\.in$", "INR"),
            (r"\.us$|\.com$", "USD"),
        ]
        .into_iter()
        .filter_map(|(p, c)| Regex::new(p).ok().map(|r| (r, c)))
        .collect();

        PriceTracker {
            patterns,
            currency_symbols,
            default_currency,
            locale_currency_map,
            url_locale_patterns,
            tld_patterns,
        }
    }

    pub fn default_currency(&self) -> &str {
        &self.default_currency
    }

    /// First structural match over the patterns, most specific first. Amounts are not
    /// checked for plausibility here.
    fn find_candidate(&self, text: &str) -> Option<PriceCandidate> {
        for pattern in &self.patterns {
            let Some(captures) = pattern.regex.captures(text) else {
                continue;
            };
            let Some(normalized) = captures.name("num").and_then(|m| normalize_number(m.as_str())) else {
                continue;
            };
            let Ok(mut amount) = Decimal::from_str(&normalized) else {
                continue;
            };

            let start = captures.get(0).map(|m| m.start()).unwrap_or(0);
            if has_attached_minus(&text[..start]) {
                amount = -amount;
            }

            return Some(PriceCandidate {
                amount,
                normalized,
                marker: captures.name("marker").map(|m| m.as_str().to_string()),
                kind: pattern.kind,
            });
        }
        None
    }

    fn currency_for_symbol(&self, symbol: &str) -> Option<&str> {
        self.currency_symbols
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, c)| c.as_str())
    }

    fn symbol_for_currency(&self, currency: &str) -> Option<&str> {
        match currency {
            "GBP" => Some("£"),
            "EUR" => Some("€"),
            "JPY" => Some("¥"),
            "INR" => Some("₹"),
            "KRW" => Some("₩"),
            c if c == self.default_currency && DOLLAR_CURRENCIES.contains(&c) => Some("$"),
            "USD" => Some("US$"),
            "AUD" => Some("A$"),
            "CAD" => Some("C$"),
            "NZD" => Some("NZ$"),
            _ => None,
        }
    }

    /// Infer currency from the page's URL and language.
    pub fn infer_currency(&self, context: &ParseContext) -> Option<String> {
        if let Some(url) = &context.url {
            let lower = url.to_lowercase();
            for (regex, currency) in &self.url_locale_patterns {
                if regex.is_match(&lower) {
                    return Some(currency.to_string());
                }
            }
        }

        if let Some(lang) = &context.lang {
            if let Some(currency) = self.locale_currency_map.get(&lang.to_lowercase()) {
                return Some(currency.clone());
            }
        }

        let host = context
            .url
            .as_deref()
            .and_then(|u| url::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_lowercase))?;
        self.tld_patterns
            .iter()
            .find(|(regex, _)| regex.is_match(&host))
            .map(|(_, currency)| currency.to_string())
    }

    fn resolve_currency(&self, candidate: &PriceCandidate, context: Option<&ParseContext>) -> (String, Option<String>) {
        let inferred = context.and_then(|c| self.infer_currency(c));

        match (candidate.kind, candidate.marker.as_deref()) {
            (PriceMatchKind::SymbolPrefix | PriceMatchKind::SymbolSuffix, Some("$")) => {
                // A bare dollar sign is ambiguous; trust the page if it points at a dollar currency
                let currency = inferred
                    .filter(|c| DOLLAR_CURRENCIES.contains(&c.as_str()))
                    .unwrap_or_else(|| self.default_currency.clone());
                (currency, Some("$".to_string()))
            }
            (PriceMatchKind::SymbolPrefix | PriceMatchKind::SymbolSuffix, Some(symbol)) => {
                let currency = self
                    .currency_for_symbol(symbol)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.default_currency.clone());
                (currency, Some(symbol.to_string()))
            }
            (PriceMatchKind::CodePrefix | PriceMatchKind::CodeSuffix, Some(code)) => (code.to_string(), None),
            _ => (inferred.unwrap_or_else(|| self.default_currency.clone()), None),
        }
    }

    fn score(&self, text: &str, candidate: &PriceCandidate) -> f32 {
        let mut confidence: f32 = match candidate.kind {
            PriceMatchKind::SymbolPrefix
            | PriceMatchKind::SymbolSuffix
            | PriceMatchKind::CodePrefix
            | PriceMatchKind::CodeSuffix => 45.0,
            PriceMatchKind::Bare if decimal_places(&candidate.normalized) > 0 => 20.0,
            PriceMatchKind::Bare => 10.0,
        };

        if candidate.amount <= Decimal::from(MAX_PLAUSIBLE_PRICE) {
            confidence += 20.0;
        } else {
            confidence -= 20.0;
        }

        match decimal_places(&candidate.normalized) {
            2 => confidence += 15.0,
            0 => confidence += 5.0,
            _ => {}
        }

        if common::mentions_any(text, PRICE_KEYWORDS) {
            confidence += 10.0;
        }

        confidence.clamp(0.0, 100.0)
    }

    fn parse_with(&self, text: &str, context: Option<&ParseContext>) -> ParseResult {
        let Some(candidate) = self.find_candidate(text) else {
            return ParseResult::failed();
        };

        if candidate.amount <= Decimal::ZERO {
            return ParseResult::failed();
        }

        let (currency, symbol) = self.resolve_currency(&candidate, context);
        let confidence = self.score(text, &candidate);
        let price = Price {
            amount: candidate.amount,
            currency: currency.clone(),
            symbol,
        };

        let mut metadata = HashMap::new();
        metadata.insert("currency".to_string(), currency.clone());
        metadata.insert("pattern".to_string(), candidate.kind.label().to_string());

        ParseResult {
            success: true,
            value: price.to_value(),
            normalized: format!("{:.2} {}", price.amount, currency),
            confidence,
            metadata,
        }
    }
}

#[async_trait]
impl TrackerPlugin for PriceTracker {
    fn name(&self) -> &str {
        "Price Tracker"
    }

    fn plugin_type(&self) -> &str {
        "price"
    }

    fn description(&self) -> &str {
        "Tracks price changes on web pages with multi-currency support"
    }

    fn parse(&self, text: &str) -> ParseResult {
        self.parse_with(text, None)
    }

    fn parse_in_context(&self, text: &str, context: &ParseContext) -> ParseResult {
        self.parse_with(text, Some(context))
    }

    fn format(&self, value: &serde_json::Value) -> String {
        let Some(price) = Price::from_value(value) else {
            return "N/A".to_string();
        };

        match price.symbol.as_deref().or_else(|| self.symbol_for_currency(&price.currency)) {
            Some(symbol) => format!("{}{:.2}", symbol, price.amount),
            None => format!("{:.2} {}", price.amount, price.currency),
        }
    }

    fn compare(&self, old_value: &serde_json::Value, new_value: &serde_json::Value) -> ComparisonResult {
        match (Price::from_value(old_value), Price::from_value(new_value)) {
            (Some(old), Some(new)) => match (old.amount.to_f64(), new.amount.to_f64()) {
                (Some(old_amount), Some(new_amount)) => compare_scalars(old_amount, new_amount),
                _ => ComparisonResult::unchanged(),
            },
            _ => ComparisonResult::unchanged(),
        }
    }

    fn validate_value(&self, value: &serde_json::Value) -> bool {
        Price::from_value(value).is_some_and(|p| p.amount > Decimal::ZERO && !p.currency.is_empty())
    }

    fn scalar(&self, value: &serde_json::Value) -> Option<f64> {
        Price::from_value(value).and_then(|p| p.amount.to_f64())
    }

    fn best_direction(&self) -> BestDirection {
        BestDirection::Lowest
    }

    fn get_search_variations(&self, input: &str) -> Vec<String> {
        let mut variations = vec![input.trim().to_string()];

        let Some(candidate) = self.find_candidate(input) else {
            return common::dedupe(variations);
        };

        let plain = format!("{:.2}", candidate.amount);
        let whole = candidate.amount.trunc().to_string();
        let english = common::group_thousands(&plain, ',', '.');
        let european = common::group_thousands(&plain, '.', ',');

        let mut numbers = vec![plain.clone(), english.clone(), european.clone()];
        if candidate.amount.fract().is_zero() {
            numbers.push(whole);
        }

        for number in &numbers {
            variations.push(number.clone());
        }
        for symbol in ["$", "£", "€", "¥", "₹"] {
            variations.push(format!("{}{}", symbol, english));
            variations.push(format!("{} {}", symbol, english));
        }
        variations.push(format!("{} €", european));
        variations.push(format!("{}€", european));
        for code in ["USD", "AUD", "EUR", "GBP"] {
            variations.push(format!("{} {}", english, code));
        }

        common::dedupe(variations)
    }

    fn rank_matches(&self, input: &str, matches: &[ElementMatch]) -> Vec<ElementMatch> {
        let target = self.find_candidate(input).map(|c| c.amount);

        common::rerank(matches, PRICE_KEYWORDS, |candidate| {
            match self.find_candidate(&candidate.text) {
                Some(found) if found.amount <= Decimal::ZERO => CandidateVerdict::Reject,
                Some(found) if Some(found.amount) == target => CandidateVerdict::Keep(EXACT_MATCH_BONUS),
                _ => CandidateVerdict::Keep(0.0),
            }
        })
    }

    fn describe_change(
        &self,
        _old_value: &serde_json::Value,
        new_value: &serde_json::Value,
        comparison: &ComparisonResult,
    ) -> String {
        let sign = comparison.change_type.sign();
        let symbol = Price::from_value(new_value)
            .and_then(|p| p.symbol.or_else(|| self.symbol_for_currency(&p.currency).map(str::to_string)))
            .unwrap_or_default();

        match comparison.percent_change {
            Some(pct) => format!("{}{}{:.2} ({}{:.1}%)", sign, symbol, comparison.difference, sign, pct),
            None => format!("{}{}{:.2}", sign, symbol, comparison.difference),
        }
    }

    fn get_config_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![
                ConfigField {
                    name: "default_currency".to_string(),
                    field_type: ConfigFieldType::Select,
                    label: "Default Currency".to_string(),
                    required: false,
                    default: Some(json!("AUD")),
                    options: Some(
                        [
                            ("AUD", "Australian Dollar (AUD)"),
                            ("USD", "US Dollar (USD)"),
                            ("EUR", "Euro (EUR)"),
                            ("GBP", "British Pound (GBP)"),
                            ("JPY", "Japanese Yen (JPY)"),
                            ("INR", "Indian Rupee (INR)"),
                        ]
                        .iter()
                        .map(|(value, label)| ConfigOption { value: value.to_string(), label: label.to_string() })
                        .collect(),
                    ),
                },
                ConfigField {
                    name: "auto_detect_currency".to_string(),
                    field_type: ConfigFieldType::Checkbox,
                    label: "Auto-detect Currency from Website".to_string(),
                    required: false,
                    default: Some(json!(true)),
                    options: None,
                },
            ],
        }
    }
}
