use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;

use crate::models::{NotifyOn, Product, Source, Threshold, ThresholdType, TrackerType, ValueComparison};
use crate::plugins::traits::notifier::{
    ActionUrls, BestDealInfo, ComparisonInfo, ProductInfo, SavingsInfo, SourceComparisonInfo, SourceInfo,
    ThresholdInfo,
};
use crate::plugins::traits::{ChangeType, ComparisonResult, NotificationEvent, TrackerPlugin};
use crate::source_tracker::SourceCheckResult;

/// Whether a single comparison passes the product's threshold. No threshold always passes.
pub fn meets_threshold(threshold: Option<&Threshold>, comparison: &ComparisonResult) -> bool {
    match threshold {
        None => true,
        Some(t) => match t.threshold_type {
            ThresholdType::Absolute => comparison.difference >= t.value,
            ThresholdType::Relative => comparison.percent_change.is_some_and(|pct| pct >= t.value),
        },
    }
}

fn matches_rule(rule: NotifyOn, change_type: ChangeType) -> bool {
    match rule {
        NotifyOn::AnyChange => true,
        NotifyOn::Decrease => change_type == ChangeType::Decreased,
        NotifyOn::Increase => change_type == ChangeType::Increased,
    }
}

/// The changed source that triggers a notification under the product's rule, if any.
///
/// `any_change` fires on the first changed source. `decrease` and `increase` need a
/// changed source moving in that direction by at least the threshold.
pub fn triggering_change<'a>(product: &Product, results: &'a [SourceCheckResult]) -> Option<&'a SourceCheckResult> {
    let threshold = product.threshold();

    results.iter().filter(|r| r.success && r.changed).find(|r| {
        let Some(comparison) = &r.comparison else {
            return false;
        };
        match product.notify_on {
            NotifyOn::AnyChange => true,
            rule => matches_rule(rule, comparison.change_type) && meets_threshold(threshold.as_ref(), comparison),
        }
    })
}

pub fn action_urls(base_url: &str, product_id: &str) -> ActionUrls {
    let base = base_url.trim_end_matches('/');
    ActionUrls {
        dismiss: format!("{}/products/{}/dismiss", base, product_id),
        false_positive: format!("{}/products/{}/false-positive", base, product_id),
        purchased: format!("{}/products/{}/purchased", base, product_id),
        view_product: format!("{}/products/{}", base, product_id),
    }
}

/// Builds the notification payload for one product after a cycle.
pub struct EventBuilder<'a> {
    plugin: &'a dyn TrackerPlugin,
    base_url: &'a str,
}

impl<'a> EventBuilder<'a> {
    pub fn new(plugin: &'a dyn TrackerPlugin, base_url: &'a str) -> Self {
        Self { plugin, base_url }
    }

    /// `sources` are the product's sources as persisted after the cycle; `comparison` is
    /// the record written for this cycle, if any.
    pub fn build(
        &self,
        product: &Product,
        trigger: &SourceCheckResult,
        sources: &[Source],
        results: &[SourceCheckResult],
        comparison: Option<&ValueComparison>,
    ) -> NotificationEvent {
        let change = trigger.comparison.clone().unwrap_or_else(ComparisonResult::unchanged);
        let old_value = trigger.old_value.clone().unwrap_or(serde_json::Value::Null);
        let new_value = trigger.new_value.clone().unwrap_or(serde_json::Value::Null);

        let source = sources.iter().find(|s| s.id == trigger.source_id).map(|s| SourceInfo {
            id: s.id.clone(),
            url: s.url.clone(),
            store_name: s.get_store_display_name(),
        });

        let active = sources.iter().filter(|s| s.is_active).count();
        let comparison_info = if active > 1 {
            self.comparison_info(product, sources, results, comparison)
        } else {
            None
        };

        NotificationEvent {
            product: ProductInfo {
                id: product.id.clone(),
                name: product.name.clone(),
                tracker_type: product.tracker_type,
            },
            source,
            comparison: comparison_info,
            change_type: change.change_type,
            formatted_old: self.plugin.format(&old_value),
            formatted_new: self.plugin.format(&new_value),
            difference: self.plugin.describe_change(&old_value, &new_value, &change),
            percent_change: change.percent_change,
            old_value,
            new_value,
            threshold: product.threshold().map(|t| ThresholdInfo {
                threshold_type: t.threshold_type,
                value: t.value,
            }),
            action_urls: action_urls(self.base_url, &product.id),
            screenshot: trigger.screenshot.as_ref().map(|bytes| STANDARD.encode(bytes)),
            timestamp: Utc::now(),
        }
    }

    fn comparison_info(
        &self,
        product: &Product,
        sources: &[Source],
        results: &[SourceCheckResult],
        comparison: Option<&ValueComparison>,
    ) -> Option<ComparisonInfo> {
        let best_id = product.best_source_id.as_deref()?;
        let best_source = sources.iter().find(|s| s.id == best_id)?;
        let best_value = product.best_value.clone()?;

        let all_sources = sources
            .iter()
            .filter(|s| s.is_active)
            .filter_map(|s| {
                let value = s.current_value.clone()?;
                Some(SourceComparisonInfo {
                    source_id: s.id.clone(),
                    store_name: s.get_store_display_name(),
                    formatted_value: self.plugin.format(&value),
                    value,
                    url: s.url.clone(),
                    changed: results.iter().any(|r| r.source_id == s.id && r.changed),
                })
            })
            .collect();

        let savings = match (product.tracker_type, comparison) {
            (TrackerType::Price, Some(c)) => c.savings().map(|amount| SavingsInfo {
                amount,
                percentage: c.savings_percentage().unwrap_or(0.0),
            }),
            _ => None,
        };

        Some(ComparisonInfo {
            best: BestDealInfo {
                source_id: best_source.id.clone(),
                store_name: best_source.get_store_display_name(),
                formatted_value: self.plugin.format(&best_value),
                value: best_value,
                url: best_source.url.clone(),
            },
            all_sources,
            savings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProduct, NewSource, SourceComparison};
    use crate::plugins::traits::BestDirection;
    use crate::plugins::trackers::PriceTracker;
    use rstest::rstest;
    use serde_json::json;

    fn product(notify_on: NotifyOn, threshold: Option<(ThresholdType, f64)>) -> Product {
        Product::new(NewProduct {
            name: "Gaming Laptop".to_string(),
            description: None,
            tracker_type: TrackerType::Price,
            notify_on: Some(notify_on),
            threshold_type: threshold.map(|(t, _)| t),
            threshold_value: threshold.map(|(_, v)| v),
            check_interval: None,
        })
    }

    fn price(amount: &str) -> serde_json::Value {
        json!({"amount": amount, "currency": "AUD", "symbol": "$"})
    }

    fn changed(source_id: &str, old: f64, new: f64) -> SourceCheckResult {
        let comparison = crate::plugins::trackers::common::compare_scalars(old, new);
        SourceCheckResult {
            source_id: source_id.to_string(),
            success: true,
            skipped: false,
            changed: comparison.changed,
            comparison: Some(comparison),
            old_value: Some(price(&format!("{:.2}", old))),
            new_value: Some(price(&format!("{:.2}", new))),
            new_text: Some(format!("${:.2}", new)),
            confidence: Some(80.0),
            screenshot: None,
            error: None,
            deactivated: false,
            response_time_ms: 10,
        }
    }

    fn source(product: &Product, store: &str, amount: &str) -> Source {
        let mut s = Source::new(NewSource {
            product_id: product.id.clone(),
            url: format!("https://{}.example.com/laptop", store.to_lowercase()),
            store_name: Some(store.to_string()),
            title: None,
            selector: ".price".to_string(),
            selector_type: None,
        });
        s.update_value(format!("${}", amount), price(amount), Utc::now());
        s
    }

    #[rstest]
    #[case(100.0, 95.0, false)]
    #[case(100.0, 85.0, true)]
    #[case(100.0, 90.0, true)]
    #[case(100.0, 120.0, false)]
    fn test_decrease_with_absolute_threshold(#[case] old: f64, #[case] new: f64, #[case] expected: bool) {
        let product = product(NotifyOn::Decrease, Some((ThresholdType::Absolute, 10.0)));
        let results = vec![changed("s1", old, new)];

        assert_eq!(triggering_change(&product, &results).is_some(), expected);
    }

    #[rstest]
    #[case(100.0, 104.0, false)]
    #[case(100.0, 105.0, true)]
    #[case(100.0, 80.0, false)]
    fn test_increase_with_relative_threshold(#[case] old: f64, #[case] new: f64, #[case] expected: bool) {
        let product = product(NotifyOn::Increase, Some((ThresholdType::Relative, 5.0)));
        let results = vec![changed("s1", old, new)];

        assert_eq!(triggering_change(&product, &results).is_some(), expected);
    }

    #[test]
    fn test_any_change_ignores_threshold() {
        let product = product(NotifyOn::AnyChange, Some((ThresholdType::Absolute, 1000.0)));
        let results = vec![changed("s1", 100.0, 101.0)];

        assert_eq!(triggering_change(&product, &results).map(|r| r.source_id.as_str()), Some("s1"));
    }

    #[test]
    fn test_no_changes_no_trigger() {
        let product = product(NotifyOn::AnyChange, None);
        let mut unchanged = changed("s1", 100.0, 100.0);
        unchanged.changed = false;
        let mut failed = changed("s2", 100.0, 50.0);
        failed.success = false;

        assert!(triggering_change(&product, &[unchanged, failed]).is_none());
    }

    #[test]
    fn test_first_matching_source_triggers() {
        let product = product(NotifyOn::Decrease, None);
        let results = vec![changed("up", 10.0, 12.0), changed("down", 10.0, 8.0), changed("down2", 10.0, 5.0)];

        assert_eq!(triggering_change(&product, &results).map(|r| r.source_id.as_str()), Some("down"));
    }

    #[test]
    fn test_relative_threshold_needs_a_percentage() {
        let threshold = Threshold { threshold_type: ThresholdType::Relative, value: 1.0 };
        let comparison = ComparisonResult {
            changed: true,
            change_type: ChangeType::Increased,
            difference: 5.0,
            percent_change: None,
        };
        assert!(!meets_threshold(Some(&threshold), &comparison));
        assert!(meets_threshold(None, &comparison));
    }

    #[test]
    fn test_action_urls() {
        let urls = action_urls("https://app.uatu.com/", "prod-1");

        assert_eq!(urls.dismiss, "https://app.uatu.com/products/prod-1/dismiss");
        assert_eq!(urls.false_positive, "https://app.uatu.com/products/prod-1/false-positive");
        assert_eq!(urls.purchased, "https://app.uatu.com/products/prod-1/purchased");
        assert_eq!(urls.view_product, "https://app.uatu.com/products/prod-1");
    }

    #[test]
    fn test_single_source_event() {
        let plugin = PriceTracker::new();
        let product = product(NotifyOn::AnyChange, None);
        let s1 = source(&product, "TechStore", "80.00");
        let mut trigger = changed(&s1.id, 100.0, 80.0);
        trigger.screenshot = Some(vec![0x89, 0x50, 0x4e, 0x47]);

        let event = EventBuilder::new(&plugin, "http://localhost:3000").build(
            &product,
            &trigger,
            std::slice::from_ref(&s1),
            std::slice::from_ref(&trigger),
            None,
        );

        assert!(event.comparison.is_none());
        assert_eq!(event.change_type, ChangeType::Decreased);
        assert_eq!(event.formatted_old, "$100.00");
        assert_eq!(event.formatted_new, "$80.00");
        assert_eq!(event.difference, "-$20.00 (-20.0%)");
        assert_eq!(event.source.as_ref().map(|s| s.store_name.as_str()), Some("TechStore"));
        assert_eq!(event.screenshot.as_deref(), Some("iVBORw=="));
        assert!(event.action_urls.view_product.ends_with(&format!("/products/{}", product.id)));
    }

    #[test]
    fn test_multi_source_event_with_savings() {
        let plugin = PriceTracker::new();
        let mut product = product(NotifyOn::AnyChange, Some((ThresholdType::Absolute, 5.0)));
        let s1 = source(&product, "TechStore", "80.00");
        let s2 = source(&product, "BestTech", "90.00");
        product.set_best(s1.id.clone(), price("80.00"));

        let comparison = ValueComparison::new(
            product.id.clone(),
            vec![
                SourceComparison {
                    source_id: s1.id.clone(),
                    store_name: "TechStore".to_string(),
                    value: price("80.00"),
                    formatted_value: "$80.00".to_string(),
                    scalar: Some(80.0),
                    url: s1.url.clone(),
                },
                SourceComparison {
                    source_id: s2.id.clone(),
                    store_name: "BestTech".to_string(),
                    value: price("90.00"),
                    formatted_value: "$90.00".to_string(),
                    scalar: Some(90.0),
                    url: s2.url.clone(),
                },
            ],
            &s1.id,
            BestDirection::Lowest,
        )
        .unwrap();

        let trigger = changed(&s1.id, 100.0, 80.0);
        let mut unchanged = changed(&s2.id, 90.0, 90.0);
        unchanged.changed = false;
        let results = vec![trigger.clone(), unchanged];

        let event = EventBuilder::new(&plugin, "http://localhost:3000").build(
            &product,
            &trigger,
            &[s1.clone(), s2.clone()],
            &results,
            Some(&comparison),
        );

        let info = event.comparison.expect("multi-source payload");
        assert_eq!(info.best.source_id, s1.id);
        assert_eq!(info.best.formatted_value, "$80.00");
        assert_eq!(info.all_sources.len(), 2);
        assert!(info.all_sources[0].changed);
        assert!(!info.all_sources[1].changed);

        let savings = info.savings.expect("price savings");
        assert!((savings.amount - 10.0).abs() < 1e-9);
        assert!((savings.percentage - 100.0 / 9.0).abs() < 1e-6);

        let threshold = event.threshold.unwrap();
        assert_eq!(threshold.threshold_type, ThresholdType::Absolute);
    }
}
