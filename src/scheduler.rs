use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::product_manager::{ProductCheckResult, ProductManager};
use crate::throttle::RequestThrottle;
use crate::utils::error::AppError;
use crate::utils::schedule::to_six_field;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub products_processed: usize,
    pub products_succeeded: usize,
    pub products_changed: usize,
    pub products_errored: usize,
    pub notifications_sent: usize,
    pub results: Vec<ProductCheckResult>,
}

impl CycleSummary {
    fn from_results(started_at: DateTime<Utc>, results: Vec<ProductCheckResult>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            products_processed: results.len(),
            products_succeeded: results.iter().filter(|r| r.success).count(),
            products_changed: results.iter().filter(|r| r.changes_detected > 0).count(),
            products_errored: results.iter().filter(|r| !r.success).count(),
            notifications_sent: results.iter().map(|r| r.notifications_sent).sum(),
            results,
        }
    }
}

/// One pass over every due product.
pub struct CycleRunner {
    manager: Arc<ProductManager>,
    throttle: Arc<RequestThrottle>,
    max_concurrent: usize,
}

impl CycleRunner {
    pub fn new(manager: Arc<ProductManager>, config: &SchedulerConfig) -> Self {
        Self {
            manager,
            throttle: Arc::new(RequestThrottle::from_config(config)),
            max_concurrent: config.max_concurrent_products.max(1),
        }
    }

    pub fn with_throttle(manager: Arc<ProductManager>, throttle: RequestThrottle, max_concurrent: usize) -> Self {
        Self {
            manager,
            throttle: Arc::new(throttle),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Checks every due product. A product that errors or panics is recorded as a failed
    /// result and the pass carries on; only listing the products can fail the cycle.
    pub async fn run_cycle(&self) -> Result<CycleSummary, AppError> {
        let started_at = Utc::now();
        let started = Instant::now();

        let due = self.manager.due_products(started_at).await?;
        info!("Starting cycle with {} due product(s)", due.len());

        let results: Vec<ProductCheckResult> = stream::iter(due)
            .map(|product| {
                let manager = self.manager.clone();
                let throttle = self.throttle.clone();
                async move {
                    let product_id = product.id.clone();
                    let handle = tokio::spawn(async move {
                        let _permit = throttle.acquire().await?;
                        manager.check_product(&product.id).await
                    });

                    match handle.await {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => {
                            counter!("uatu_product_failures_total").increment(1);
                            error!("Failed to check product {}: {}", product_id, e);
                            ProductCheckResult::failed(&product_id, e.to_string())
                        }
                        Err(e) => {
                            counter!("uatu_product_failures_total").increment(1);
                            error!("Check task for product {} aborted: {}", product_id, e);
                            ProductCheckResult::failed(&product_id, format!("Check task aborted: {}", e))
                        }
                    }
                }
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let summary = CycleSummary::from_results(started_at, results);

        counter!("uatu_cycles_total").increment(1);
        histogram!("uatu_cycle_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            "Cycle finished: {} processed, {} succeeded, {} changed, {} errored",
            summary.products_processed, summary.products_succeeded, summary.products_changed, summary.products_errored
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleStatus {
    pub running: bool,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_summary: Option<CycleSummary>,
}

/// Shared entry point for timer and manual triggers. At most one cycle runs at a time.
#[derive(Clone)]
pub struct CycleHandle {
    runner: Arc<CycleRunner>,
    gate: Arc<Mutex<()>>,
    status: Arc<RwLock<CycleStatus>>,
}

impl CycleHandle {
    pub fn new(runner: CycleRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            gate: Arc::new(Mutex::new(())),
            status: Arc::new(RwLock::new(CycleStatus::default())),
        }
    }

    /// Runs one cycle now, or fails with `CycleInProgress` if one is already running.
    pub async fn run_now(&self) -> Result<CycleSummary, AppError> {
        let _guard = self.gate.try_lock().map_err(|_| AppError::CycleInProgress)?;

        {
            let mut status = self.status.write().await;
            status.running = true;
            status.last_started_at = Some(Utc::now());
        }

        let outcome = self.runner.run_cycle().await;

        let mut status = self.status.write().await;
        status.running = false;
        status.last_finished_at = Some(Utc::now());
        if let Ok(summary) = &outcome {
            status.last_summary = Some(summary.clone());
        }
        outcome
    }

    pub async fn status(&self) -> CycleStatus {
        self.status.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.status.read().await.running
    }
}

/// Cron-driven trigger for [`CycleHandle::run_now`].
pub struct CycleScheduler {
    scheduler: JobScheduler,
    handle: CycleHandle,
    cycle_interval: String,
}

impl CycleScheduler {
    pub async fn new(handle: CycleHandle, config: &SchedulerConfig) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            handle,
            cycle_interval: config.cycle_interval.clone(),
        })
    }

    pub fn handle(&self) -> &CycleHandle {
        &self.handle
    }

    pub async fn start(&self) -> Result<(), AppError> {
        let expression = to_six_field(&self.cycle_interval)
            .ok_or_else(|| AppError::Scheduler(format!("Invalid cycle interval: {}", self.cycle_interval)))?;

        let handle = self.handle.clone();
        let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
            let handle = handle.clone();
            Box::pin(async move {
                match handle.run_now().await {
                    Ok(summary) => debug!("Scheduled cycle processed {} product(s)", summary.products_processed),
                    Err(AppError::CycleInProgress) => warn!("Skipping scheduled cycle: previous cycle still running"),
                    Err(e) => error!("Scheduled cycle failed: {}", e),
                }
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        info!("Cycle scheduler started ({})", self.cycle_interval);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.scheduler.shutdown().await?;
        info!("Cycle scheduler shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::{TrackerType, UpdateProduct};
    use crate::plugins::trackers::PriceTracker;
    use crate::plugins::PluginManager;
    use crate::product_manager::{ProductRequest, SourceRequest};
    use crate::renderer::{PageDocument, RenderRequest, RenderResult, Renderer};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Every page shows the same price after an optional delay. URLs containing
    /// "explode" panic mid-render.
    struct FixedPriceRenderer {
        delay: Duration,
    }

    #[async_trait]
    impl Renderer for FixedPriceRenderer {
        async fn render(&self, request: &RenderRequest) -> RenderResult {
            tokio::time::sleep(self.delay).await;
            if request.url.contains("explode") {
                panic!("renderer crashed on {}", request.url);
            }
            RenderResult {
                success: true,
                text: Some("$25.00".to_string()),
                html: None,
                title: None,
                lang: None,
                screenshot: None,
                error: None,
                response_time_ms: self.delay.as_millis() as u64,
                final_url: request.url.clone(),
            }
        }

        async fn fetch_document(&self, _url: &str) -> Result<PageDocument, AppError> {
            Err(AppError::Render("not used".to_string()))
        }
    }

    async fn manager(delay: Duration) -> Arc<ProductManager> {
        let plugins = PluginManager::new();
        plugins.register_tracker(Arc::new(PriceTracker::new())).await.unwrap();
        Arc::new(ProductManager::new(
            Arc::new(MemoryStore::new()),
            plugins,
            Arc::new(FixedPriceRenderer { delay }),
            AppConfig::default(),
        ))
    }

    async fn add_product(manager: &ProductManager, name: &str) -> String {
        manager
            .create_product(ProductRequest {
                name: name.to_string(),
                description: None,
                tracker_type: TrackerType::Price,
                notify_on: None,
                threshold_type: None,
                threshold_value: None,
                check_interval: None,
                sources: vec![SourceRequest {
                    url: format!("https://shop.example.com/{}", name),
                    store_name: None,
                    selector: ".price".to_string(),
                    selector_type: None,
                }],
                notifications: Vec::new(),
            })
            .await
            .unwrap()
            .id
    }

    fn runner(manager: Arc<ProductManager>) -> CycleRunner {
        CycleRunner::with_throttle(manager, RequestThrottle::new(1, Duration::ZERO), 1)
    }

    #[tokio::test]
    async fn test_cycle_checks_due_products_only() {
        let manager = manager(Duration::ZERO).await;
        add_product(&manager, "one").await;
        let paused = add_product(&manager, "two").await;
        manager
            .update_product(&paused, UpdateProduct { is_paused: Some(true), ..Default::default() })
            .await
            .unwrap();

        let runner = runner(manager.clone());
        let first = runner.run_cycle().await.unwrap();
        assert_eq!(first.products_processed, 1);
        assert_eq!(first.products_succeeded, 1);

        // Next check is now in the future
        let second = runner.run_cycle().await.unwrap();
        assert_eq!(second.products_processed, 0);
    }

    #[tokio::test]
    async fn test_panicking_product_does_not_abort_cycle() {
        let manager = manager(Duration::ZERO).await;
        let crashing = add_product(&manager, "explode").await;
        let healthy = add_product(&manager, "fine").await;

        let summary = runner(manager).run_cycle().await.unwrap();

        assert_eq!(summary.products_processed, 2);
        assert_eq!(summary.products_errored, 1);
        assert_eq!(summary.products_succeeded, 1);
        let crashed = summary.results.iter().find(|r| r.product_id == crashing).unwrap();
        assert!(crashed.error.as_deref().unwrap().starts_with("Check task aborted"));
        assert!(summary.results.iter().any(|r| r.product_id == healthy && r.success));
    }

    #[tokio::test]
    async fn test_missing_tracker_is_recorded_per_product() {
        let manager = manager(Duration::ZERO).await;
        let product_id = add_product(&manager, "orphan").await;
        manager.plugins().shutdown().await.unwrap();

        let summary = runner(manager).run_cycle().await.unwrap();

        assert_eq!(summary.products_errored, 1);
        assert_eq!(summary.results[0].product_id, product_id);
        assert!(summary.results[0].error.as_deref().unwrap().contains("price"));
    }

    #[tokio::test]
    async fn test_run_now_is_not_reentrant() {
        let manager = manager(Duration::from_millis(200)).await;
        add_product(&manager, "slow").await;
        let handle = CycleHandle::new(runner(manager));

        let background = handle.clone();
        let first = tokio::spawn(async move { background.run_now().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_running().await);
        assert!(matches!(handle.run_now().await, Err(AppError::CycleInProgress)));

        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.products_processed, 1);

        let status = handle.status().await;
        assert!(!status.running);
        assert!(status.last_finished_at.is_some());
        assert_eq!(status.last_summary.unwrap().products_processed, 1);
    }

    #[tokio::test]
    async fn test_scheduler_rejects_invalid_interval() {
        let manager = manager(Duration::ZERO).await;
        let config = SchedulerConfig {
            cycle_interval: "whenever".to_string(),
            ..SchedulerConfig::default()
        };

        let scheduler = CycleScheduler::new(CycleHandle::new(runner(manager)), &config).await.unwrap();
        assert!(matches!(scheduler.start().await, Err(AppError::Scheduler(_))));
    }

    #[tokio::test]
    async fn test_scheduler_start_and_shutdown() {
        let manager = manager(Duration::ZERO).await;
        let mut scheduler = CycleScheduler::new(CycleHandle::new(runner(manager)), &SchedulerConfig::default())
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        assert!(!scheduler.handle().is_running().await);
        scheduler.shutdown().await.unwrap();
    }
}
