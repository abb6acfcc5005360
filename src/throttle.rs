use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::config::SchedulerConfig;
use crate::utils::error::AppError;

/// Bounds outbound load: at most `max_concurrent` holders at once, and consecutive starts
/// at least `spacing` apart.
pub struct RequestThrottle {
    permits: Arc<Semaphore>,
    spacing: Duration,
    next_start: Mutex<Option<Instant>>,
}

/// Held for the duration of one throttled unit of work.
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

impl RequestThrottle {
    pub fn new(max_concurrent: usize, spacing: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            spacing,
            next_start: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.max_concurrent_products, config.inter_product_delay())
    }

    pub async fn acquire(&self) -> Result<ThrottlePermit, AppError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Request throttle closed".to_string()))?;

        let start_at = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start_at = match *next {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next = Some(start_at + self.spacing);
            start_at
        };
        sleep_until(start_at).await;

        Ok(ThrottlePermit { _permit: permit })
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
