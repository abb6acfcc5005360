use super::*;
use uatu_engine::config::SchedulerConfig;
use uatu_engine::models::{TrackerType, UpdateProduct};
use uatu_engine::{CycleHandle, CycleScheduler};

#[tokio::test]
async fn test_cycle_skips_products_not_yet_due() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://shop.test/mouse";
    h.renderer.show(url, "$30.00");
    let product = h
        .manager
        .create_product(product_request("Mouse", TrackerType::Price, vec![source(url, "Shop")]))
        .await?;

    assert_eq!(h.runner().run_cycle().await?.products_processed, 1);
    assert_eq!(h.runner().run_cycle().await?.products_processed, 0);

    let saved = h.manager.get_product(&product.id).await?.unwrap();
    assert!(saved.next_check.unwrap() > saved.last_checked.unwrap());
    assert_eq!(h.renderer.request_count(url), 1);
    Ok(())
}

#[tokio::test]
async fn test_inactive_and_paused_products_are_not_due() -> anyhow::Result<()> {
    let h = Harness::new().await;
    for (name, update) in [
        ("Inactive", UpdateProduct { is_active: Some(false), ..Default::default() }),
        ("Paused", UpdateProduct { is_paused: Some(true), ..Default::default() }),
    ] {
        let product = h
            .manager
            .create_product(product_request(name, TrackerType::Price, vec![]))
            .await?;
        h.manager.update_product(&product.id, update).await?;
    }

    let summary = h.runner().run_cycle().await?;
    assert_eq!(summary.products_processed, 0);
    Ok(())
}

#[tokio::test]
async fn test_products_run_one_at_a_time() -> anyhow::Result<()> {
    let h = Harness::new().await;
    h.renderer.set_delay(Duration::from_millis(40));
    for i in 0..3 {
        let url = format!("https://shop.test/item-{}", i);
        h.renderer.show(&url, "$10.00");
        h.manager
            .create_product(product_request(&format!("Item {}", i), TrackerType::Price, vec![source(&url, "Shop")]))
            .await?;
    }

    let started = Instant::now();
    let summary = h.runner().run_cycle().await?;

    assert_eq!(summary.products_succeeded, 3);
    assert!(started.elapsed() >= Duration::from_millis(120));
    Ok(())
}

#[tokio::test]
async fn test_manual_trigger_is_not_reentrant() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let url = "https://shop.test/desk";
    h.renderer.show(url, "$250.00");
    h.renderer.set_delay(Duration::from_millis(200));
    h.manager
        .create_product(product_request("Desk", TrackerType::Price, vec![source(url, "Shop")]))
        .await?;

    let handle = CycleHandle::new(h.runner());
    assert!(handle.status().await.last_started_at.is_none());

    let background = handle.clone();
    let running = tokio::spawn(async move { background.run_now().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.status().await.running);
    assert!(matches!(handle.run_now().await, Err(AppError::CycleInProgress)));

    let summary = running.await??;
    assert_eq!(summary.products_succeeded, 1);

    let status = handle.status().await;
    assert!(!status.running);
    assert!(status.last_finished_at >= status.last_started_at);
    assert_eq!(status.last_summary.map(|s| s.products_processed), Some(1));

    // Free again once the first cycle is done
    assert!(handle.run_now().await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_cron_driver_lifecycle() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let config = SchedulerConfig {
        cycle_interval: "*/5 * * * *".to_string(),
        ..SchedulerConfig::default()
    };

    let mut scheduler = CycleScheduler::new(CycleHandle::new(h.runner()), &config).await?;
    scheduler.start().await?;
    assert!(!scheduler.handle().status().await.running);
    scheduler.shutdown().await?;
    Ok(())
}
