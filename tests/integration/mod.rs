// Shared fakes and builders for the integration tests

pub mod cycle_tests;
pub mod product_lifecycle_tests;
pub mod scheduler_tests;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uatu_engine::{
    AppConfig, AppError, CycleRunner, MemoryStore, PluginManager, ProductManager, ProductRequest, SourceRequest,
    Store,
    models::{NewNotificationConfig, NotifyOn, ThresholdType, TrackerType},
    plugins::traits::notifier::NotifierError,
    plugins::traits::{ConfigSchema, NotificationEvent, NotificationResult, NotifierPlugin},
    plugins::trackers::{NumberTracker, PriceTracker, VersionTracker},
    renderer::{PageDocument, RenderRequest, RenderResult, Renderer},
    throttle::RequestThrottle,
};

enum Page {
    Text(String),
    Down(String),
}

/// Serves whatever was last scripted for a URL until the script changes.
#[derive(Default)]
pub struct ScriptedRenderer {
    pages: Mutex<HashMap<String, Page>>,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedRenderer {
    pub fn show(&self, url: &str, text: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), Page::Text(text.to_string()));
    }

    pub fn take_down(&self, url: &str, error: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), Page::Down(error.to_string()));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest) -> RenderResult {
        let started = Instant::now();
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(request.url.clone());

        let text = match self.pages.lock().unwrap().get(&request.url) {
            Some(Page::Text(text)) => text.clone(),
            Some(Page::Down(error)) => return RenderResult::failure(&request.url, error.clone(), started),
            None => return RenderResult::failure(&request.url, "Unscripted URL", started),
        };

        RenderResult {
            success: true,
            text: Some(text),
            html: None,
            title: Some("Scripted page".to_string()),
            lang: None,
            screenshot: None,
            error: None,
            response_time_ms: started.elapsed().as_millis() as u64,
            final_url: request.url.clone(),
        }
    }

    async fn fetch_document(&self, url: &str) -> Result<PageDocument, AppError> {
        Err(AppError::Render(format!("No document scripted for {}", url)))
    }
}

/// Keeps every event it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifierPlugin for RecordingNotifier {
    fn name(&self) -> &str {
        "Recording"
    }

    fn plugin_type(&self) -> &str {
        "recording"
    }

    fn description(&self) -> &str {
        "Records events for assertions"
    }

    async fn initialize(&self, _config: &serde_json::Value) -> Result<(), NotifierError> {
        Ok(())
    }

    async fn notify(&self, event: &NotificationEvent, _config: &serde_json::Value) -> Result<NotificationResult, NotifierError> {
        let mut events = self.events.lock().unwrap();
        events.push(event.clone());
        Ok(NotificationResult::delivered(Some(format!("event-{}", events.len()))))
    }

    async fn test_connection(&self, _config: &serde_json::Value) -> Result<bool, NotifierError> {
        Ok(true)
    }

    fn get_config_schema(&self) -> ConfigSchema {
        ConfigSchema { fields: Vec::new() }
    }

    fn validate_config(&self, _config: &serde_json::Value) -> bool {
        true
    }
}

pub struct Harness {
    pub manager: Arc<ProductManager>,
    pub store: Arc<MemoryStore>,
    pub renderer: Arc<ScriptedRenderer>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let plugins = PluginManager::new();
        plugins
            .register_tracker(Arc::new(PriceTracker::with_default_currency(&config.scraper.default_currency)))
            .await
            .unwrap();
        plugins.register_tracker(Arc::new(VersionTracker::new())).await.unwrap();
        plugins.register_tracker(Arc::new(NumberTracker::new())).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        plugins.register_notifier(notifier.clone()).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        let renderer = Arc::new(ScriptedRenderer::default());
        let manager = Arc::new(ProductManager::new(store.clone(), plugins, renderer.clone(), config));

        Self {
            manager,
            store,
            renderer,
            notifier,
        }
    }

    pub fn runner(&self) -> CycleRunner {
        CycleRunner::with_throttle(self.manager.clone(), RequestThrottle::new(1, Duration::ZERO), 1)
    }

    /// Clears the product's next check so the next cycle picks it up.
    pub async fn make_due(&self, product_id: &str) {
        let mut product = self.store.get_product(product_id).await.unwrap().unwrap();
        product.next_check = None;
        self.store.save_product(&product).await.unwrap();
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scraper.retry_attempts = 2;
    config.notifications.base_url = "http://uatu.test".to_string();
    config.scheduler.inter_product_delay_ms = 0;
    config
}

pub fn source(url: &str, store_name: &str) -> SourceRequest {
    SourceRequest {
        url: url.to_string(),
        store_name: Some(store_name.to_string()),
        selector: ".price".to_string(),
        selector_type: None,
    }
}

pub fn product_request(name: &str, tracker_type: TrackerType, sources: Vec<SourceRequest>) -> ProductRequest {
    ProductRequest {
        name: name.to_string(),
        description: None,
        tracker_type,
        notify_on: Some(NotifyOn::AnyChange),
        threshold_type: None,
        threshold_value: None,
        check_interval: Some("0 * * * *".to_string()),
        sources,
        notifications: vec![NewNotificationConfig {
            notifier_type: "recording".to_string(),
            config: serde_json::json!({}),
            is_enabled: Some(true),
        }],
    }
}

pub fn with_threshold(mut request: ProductRequest, notify_on: NotifyOn, kind: ThresholdType, value: f64) -> ProductRequest {
    request.notify_on = Some(notify_on);
    request.threshold_type = Some(kind);
    request.threshold_value = Some(value);
    request
}
