use super::*;
use uatu_engine::models::{NotifyOn, ThresholdType, TrackerType};
use uatu_engine::plugins::traits::ChangeType;

#[tokio::test]
async fn test_price_drop_across_two_stores() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let (a, b) = ("https://store-a.test/laptop", "https://store-b.test/laptop");
    h.renderer.show(a, "$100.00");
    h.renderer.show(b, "$90.00");
    let product = h
        .manager
        .create_product(product_request(
            "Laptop",
            TrackerType::Price,
            vec![source(a, "Store A"), source(b, "Store B")],
        ))
        .await?;
    let sources = h.manager.list_sources(&product.id).await?;

    // First sighting sets the baseline; nothing to report yet
    let first = h.runner().run_cycle().await?;
    assert_eq!(first.products_processed, 1);
    assert_eq!(first.products_changed, 0);
    assert!(h.notifier.events().is_empty());
    let saved = h.manager.get_product(&product.id).await?.unwrap();
    assert_eq!(saved.best_source_id.as_deref(), Some(sources[1].id.as_str()));

    h.renderer.show(a, "$80.00");
    h.make_due(&product.id).await;
    let second = h.runner().run_cycle().await?;

    assert_eq!(second.products_changed, 1);
    assert_eq!(second.notifications_sent, 1);

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.change_type, ChangeType::Decreased);
    assert_eq!(event.formatted_old, "$100.00");
    assert_eq!(event.formatted_new, "$80.00");
    assert_eq!(event.difference, "-$20.00 (-20.0%)");
    assert_eq!(event.action_urls.dismiss, format!("http://uatu.test/products/{}/dismiss", product.id));

    let comparison = event.comparison.as_ref().expect("two active sources");
    assert_eq!(comparison.best.source_id, sources[0].id);
    assert_eq!(comparison.best.formatted_value, "$80.00");
    assert_eq!(comparison.all_sources.len(), 2);
    assert!(comparison.all_sources.iter().any(|s| s.source_id == sources[0].id && s.changed));
    assert!(comparison.all_sources.iter().any(|s| s.source_id == sources[1].id && !s.changed));
    let savings = comparison.savings.as_ref().expect("price savings");
    assert!((savings.amount - 10.0).abs() < 1e-9);

    let saved = h.manager.get_product(&product.id).await?.unwrap();
    assert_eq!(saved.best_source_id.as_deref(), Some(sources[0].id.as_str()));
    assert_eq!(h.manager.get_comparisons(&product.id, None).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_best_of_three_is_lowest() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let urls = ["https://one.test/p", "https://two.test/p", "https://three.test/p"];
    for (url, price) in urls.iter().zip(["$120.00", "$99.00", "$150.00"]) {
        h.renderer.show(url, price);
    }
    let product = h
        .manager
        .create_product(product_request(
            "Headphones",
            TrackerType::Price,
            urls.iter().enumerate().map(|(i, u)| source(u, &format!("Shop {}", i))).collect(),
        ))
        .await?;

    let summary = h.runner().run_cycle().await?;

    let result = &summary.results[0];
    let sources = h.manager.list_sources(&product.id).await?;
    assert_eq!(result.best_source_id.as_deref(), Some(sources[1].id.as_str()));
    let comparison = result.comparison.as_ref().unwrap();
    assert_eq!(comparison.best_source_id, sources[1].id);
    assert_eq!(comparison.worst_source_id.as_deref(), Some(sources[2].id.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_relative_threshold_gates_notification() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://store.test/tv";
    h.renderer.show(url, "$100.00");
    let request = with_threshold(
        product_request("TV", TrackerType::Price, vec![source(url, "Store")]),
        NotifyOn::Decrease,
        ThresholdType::Relative,
        10.0,
    );
    let product = h.manager.create_product(request).await?;
    h.runner().run_cycle().await?;

    // 5% drop stays under the threshold
    h.renderer.show(url, "$95.00");
    h.make_due(&product.id).await;
    let quiet = h.runner().run_cycle().await?;
    assert_eq!(quiet.products_changed, 1);
    assert_eq!(quiet.notifications_sent, 0);

    // 95 -> 85 is a 10.5% drop
    h.renderer.show(url, "$85.00");
    h.make_due(&product.id).await;
    let loud = h.runner().run_cycle().await?;
    assert_eq!(loud.notifications_sent, 1);

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].formatted_new, "$85.00");
    assert!(events[0].comparison.is_none());
    Ok(())
}

#[tokio::test]
async fn test_increase_rule_ignores_drops() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://releases.test/app";
    h.renderer.show(url, "Version 2.4.0");
    let mut request = product_request("App", TrackerType::Version, vec![source(url, "Releases")]);
    request.notify_on = Some(NotifyOn::Increase);
    let product = h.manager.create_product(request).await?;
    h.runner().run_cycle().await?;

    h.renderer.show(url, "Version 2.3.9");
    h.make_due(&product.id).await;
    assert_eq!(h.runner().run_cycle().await?.notifications_sent, 0);

    h.renderer.show(url, "Version 3.0.0");
    h.make_due(&product.id).await;
    assert_eq!(h.runner().run_cycle().await?.notifications_sent, 1);
    assert_eq!(h.notifier.events()[0].formatted_new, "3.0.0");
    Ok(())
}

#[tokio::test]
async fn test_failing_source_is_deactivated_and_excluded() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let (good, flaky) = ("https://good.test/x", "https://flaky.test/x");
    h.renderer.show(good, "$50.00");
    h.renderer.show(flaky, "$40.00");
    let product = h
        .manager
        .create_product(product_request(
            "Drill",
            TrackerType::Price,
            vec![source(good, "Good"), source(flaky, "Flaky")],
        ))
        .await?;
    let sources = h.manager.list_sources(&product.id).await?;

    h.runner().run_cycle().await?;
    let saved = h.manager.get_product(&product.id).await?.unwrap();
    assert_eq!(saved.best_source_id.as_deref(), Some(sources[1].id.as_str()));

    h.renderer.take_down(flaky, "Connection reset");
    h.make_due(&product.id).await;
    let failing = h.runner().run_cycle().await?;

    // A source that failed this cycle is left out of the best-value pick
    let result = &failing.results[0];
    assert!(result.success);
    assert_eq!(result.best_source_id.as_deref(), Some(sources[0].id.as_str()));
    assert!(result.comparison.is_none());

    h.make_due(&product.id).await;
    h.runner().run_cycle().await?;

    let flaky_source = h.store.get_source(&sources[1].id).await?.unwrap();
    assert!(!flaky_source.is_active);
    assert_eq!(flaky_source.error_count, 2);
    assert_eq!(flaky_source.last_error.as_deref(), Some("Connection reset"));
    assert_eq!(flaky_source.current_value.as_ref().unwrap()["amount"], "40.00");

    // Deactivated sources are no longer fetched
    let fetched = h.renderer.request_count(flaky);
    h.make_due(&product.id).await;
    h.runner().run_cycle().await?;
    assert_eq!(h.renderer.request_count(flaky), fetched);

    h.renderer.show(flaky, "$39.00");
    h.manager.reactivate_source(&sources[1].id).await?;
    h.make_due(&product.id).await;
    let recovered = h.runner().run_cycle().await?;
    assert_eq!(recovered.results[0].best_source_id.as_deref(), Some(sources[1].id.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_unparseable_page_counts_as_failure() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://store.test/sold-out";
    h.renderer.show(url, "Currently unavailable");
    let product = h
        .manager
        .create_product(product_request("Console", TrackerType::Price, vec![source(url, "Store")]))
        .await?;

    let summary = h.runner().run_cycle().await?;

    assert_eq!(summary.products_errored, 1);
    let sources = h.manager.list_sources(&product.id).await?;
    assert_eq!(sources[0].error_count, 1);
    assert!(sources[0].current_value.is_none());
    assert!(h.manager.get_value_history(&sources[0].id, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_history_records_every_observation() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://counter.test/downloads";
    let product = h
        .manager
        .create_product(product_request("Downloads", TrackerType::Number, vec![source(url, "Counter")]))
        .await?;

    for text in ["1,200 downloads", "1,200 downloads", "1,450 downloads"] {
        h.renderer.show(url, text);
        h.make_due(&product.id).await;
        h.runner().run_cycle().await?;
    }

    let sources = h.manager.list_sources(&product.id).await?;
    let history = h.manager.get_value_history(&sources[0].id, None).await?;
    assert_eq!(history.len(), 3);
    assert!(history[0].timestamp >= history[1].timestamp);
    assert_eq!(history[0].text, "1,450 downloads");
    assert_eq!(sources[0].original_text.as_deref(), Some("1,200 downloads"));
    assert_eq!(h.notifier.events().len(), 1);
    Ok(())
}
