use super::*;
use uatu_engine::models::{
    NewNotificationConfig, NotificationAction, NotificationStatus, TrackerType, UpdateProduct, UpdateSource,
};

#[tokio::test]
async fn test_complete_product_lifecycle() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://shop.test/kettle";
    h.renderer.show(url, "$45.00");

    // 1. Create
    let product = h
        .manager
        .create_product(product_request("Kettle", TrackerType::Price, vec![source(url, "Shop")]))
        .await?;
    assert!(product.is_active);
    assert_eq!(product.check_interval, "0 * * * *");

    // 2. Check
    let result = h.manager.check_product(&product.id).await?;
    assert!(result.success);
    assert_eq!(result.sources_succeeded, 1);

    // 3. Update
    let updated = h
        .manager
        .update_product(
            &product.id,
            UpdateProduct {
                name: Some("Electric Kettle".to_string()),
                check_interval: Some("30 6 * * *".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(updated.name, "Electric Kettle");
    assert_eq!(updated.check_interval, "30 6 * * *");

    let bad = h
        .manager
        .update_product(
            &product.id,
            UpdateProduct {
                check_interval: Some("sometimes".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(bad, Err(AppError::Validation(_))));

    // 4. Stats
    let stats = h.manager.get_product_stats(&product.id).await?;
    assert_eq!(stats.total_sources, 1);
    assert_eq!(stats.observations, 1);
    assert!(stats.last_check.is_some());

    // 5. Delete cascades
    let sources = h.manager.list_sources(&product.id).await?;
    h.manager.delete_product(&product.id).await?;
    assert!(h.manager.get_product(&product.id).await?.is_none());
    assert!(h.manager.list_sources(&product.id).await?.is_empty());
    assert!(h.manager.get_value_history(&sources[0].id, None).await?.is_empty());
    assert!(h.manager.get_comparisons(&product.id, None).await?.is_empty());
    assert!(h.manager.list_notification_configs(&product.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_source_url_is_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let product = h
        .manager
        .create_product(product_request(
            "Monitor",
            TrackerType::Price,
            vec![source("https://a.test/monitor", "A")],
        ))
        .await?;

    let duplicate = h.manager.add_source(&product.id, source("https://a.test/monitor", "A again")).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    // The same URL on another product is fine
    let other = h
        .manager
        .create_product(product_request(
            "Monitor stand",
            TrackerType::Price,
            vec![source("https://a.test/monitor", "A")],
        ))
        .await?;
    assert_eq!(h.manager.list_sources(&other.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() -> anyhow::Result<()> {
    let h = Harness::new().await;

    let empty_name = product_request("", TrackerType::Price, vec![]);
    assert!(matches!(h.manager.create_product(empty_name).await, Err(AppError::Validation(_))));

    let mut negative = product_request("Phone", TrackerType::Price, vec![]);
    negative.threshold_value = Some(-1.0);
    assert!(matches!(h.manager.create_product(negative).await, Err(AppError::Validation(_))));

    let mut no_selector = product_request("Phone", TrackerType::Price, vec![source("https://a.test/p", "A")]);
    no_selector.sources[0].selector = String::new();
    assert!(matches!(h.manager.create_product(no_selector).await, Err(AppError::Validation(_))));

    let mut unknown_notifier = product_request("Phone", TrackerType::Price, vec![]);
    unknown_notifier.notifications[0].notifier_type = "carrier-pigeon".to_string();
    assert!(matches!(
        h.manager.create_product(unknown_notifier).await,
        Err(AppError::PluginNotFound { .. })
    ));

    assert!(matches!(
        h.manager.delete_product("missing").await,
        Err(AppError::NotFound { .. })
    ));
    assert!(h.manager.list_products().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_source_edits() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let (a, b) = ("https://a.test/chair", "https://b.test/chair");
    h.renderer.show(a, "$300.00");
    h.renderer.show(b, "$250.00");
    let product = h
        .manager
        .create_product(product_request("Chair", TrackerType::Price, vec![source(a, "A")]))
        .await?;
    let added = h.manager.add_source(&product.id, source(b, "B")).await?;
    h.manager.check_product(&product.id).await?;
    assert_eq!(
        h.manager.get_product(&product.id).await?.unwrap().best_source_id.as_deref(),
        Some(added.id.as_str())
    );

    let edited = h
        .manager
        .update_source(
            &added.id,
            UpdateSource {
                selector: Some("#price".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(edited.selector, "#price");

    // Removing the best source hands the best value to what remains
    h.manager.delete_source(&added.id).await?;
    let saved = h.manager.get_product(&product.id).await?.unwrap();
    assert_ne!(saved.best_source_id.as_deref(), Some(added.id.as_str()));
    assert_eq!(saved.best_value.unwrap()["amount"], "300.00");

    let remaining = h.manager.list_sources(&product.id).await?;
    h.manager.delete_source(&remaining[0].id).await?;
    let saved = h.manager.get_product(&product.id).await?.unwrap();
    assert!(saved.best_source_id.is_none());
    assert!(saved.best_value.is_none());
    Ok(())
}

#[tokio::test]
async fn test_notification_config_management() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://shop.test/bike";
    h.renderer.show(url, "$900.00");
    let mut request = product_request("Bike", TrackerType::Price, vec![source(url, "Shop")]);
    request.notifications.clear();
    let product = h.manager.create_product(request).await?;

    let config = h
        .manager
        .add_notification_config(
            &product.id,
            NewNotificationConfig {
                notifier_type: "recording".to_string(),
                config: serde_json::json!({}),
                is_enabled: None,
            },
        )
        .await?;
    h.manager.set_notification_enabled(&config.id, false).await?;

    h.manager.check_product(&product.id).await?;
    h.renderer.show(url, "$850.00");
    let result = h.manager.check_product(&product.id).await?;
    assert_eq!(result.changes_detected, 1);
    assert_eq!(result.notifications_sent, 0);
    assert!(h.notifier.events().is_empty());

    h.manager.set_notification_enabled(&config.id, true).await?;
    h.renderer.show(url, "$800.00");
    assert_eq!(h.manager.check_product(&product.id).await?.notifications_sent, 1);

    h.manager.remove_notification_config(&config.id).await?;
    assert!(h.manager.list_notification_configs(&product.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_user_actions() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://shop.test/lamp";
    h.renderer.show(url, "$19.99");
    let product = h
        .manager
        .create_product(product_request("Lamp", TrackerType::Price, vec![source(url, "Shop")]))
        .await?;
    h.manager.check_product(&product.id).await?;

    h.manager.record_action(&product.id, NotificationAction::Dismissed).await?;
    h.manager.record_action(&product.id, NotificationAction::FalsePositive).await?;
    let false_positives = h.store.list_false_positives(&product.id).await?;
    assert_eq!(false_positives.len(), 1);
    assert_eq!(false_positives[0].detected_text, "$19.99");

    h.manager.record_action(&product.id, NotificationAction::Purchased).await?;
    let saved = h.manager.get_product(&product.id).await?.unwrap();
    assert!(saved.is_paused);
    assert!(h.manager.check_product(&product.id).await?.skipped);

    let logs = h.manager.get_notification_logs(&product.id, None).await?;
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.status == NotificationStatus::Actioned));
    assert_eq!(logs[0].action, Some(NotificationAction::Purchased));
    Ok(())
}
