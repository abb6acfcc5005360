use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ScraperConfig;
use crate::models::{Source, ValueHistory};
use crate::plugins::traits::{ComparisonResult, ParseContext, TrackerPlugin};
use crate::renderer::{RenderRequest, RenderResult, Renderer};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCheckState {
    Idle,
    Fetching,
    Parsing,
    Comparing,
    Persisted,
    Failed,
}

impl fmt::Display for SourceCheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceCheckState::Idle => "idle",
            SourceCheckState::Fetching => "fetching",
            SourceCheckState::Parsing => "parsing",
            SourceCheckState::Comparing => "comparing",
            SourceCheckState::Persisted => "persisted",
            SourceCheckState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCheckResult {
    pub source_id: String,
    pub success: bool,
    /// The source was inactive and not fetched.
    pub skipped: bool,
    pub changed: bool,
    pub comparison: Option<ComparisonResult>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub new_text: Option<String>,
    pub confidence: Option<f32>,
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
    pub error: Option<String>,
    /// This check pushed the source over the failure limit.
    pub deactivated: bool,
    pub response_time_ms: u64,
}

impl SourceCheckResult {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            success: false,
            skipped: false,
            changed: false,
            comparison: None,
            old_value: None,
            new_value: None,
            new_text: None,
            confidence: None,
            screenshot: None,
            error: None,
            deactivated: false,
            response_time_ms: 0,
        }
    }
}

/// Drives one source through fetch, parse, persist and compare.
///
/// Every outcome is a [`SourceCheckResult`]; nothing here returns an error to the caller.
pub struct SourceTracker {
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn Store>,
    config: ScraperConfig,
    render_timeout: Duration,
}

impl SourceTracker {
    pub fn new(renderer: Arc<dyn Renderer>, store: Arc<dyn Store>, config: ScraperConfig) -> Self {
        let render_timeout = config.request_timeout();
        Self {
            renderer,
            store,
            config,
            render_timeout,
        }
    }

    /// Overall bound on one render call, on top of the renderer's own timeout.
    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    fn transition(&self, source_id: &str, from: SourceCheckState, to: SourceCheckState) -> SourceCheckState {
        debug!("Source {}: {} -> {}", source_id, from, to);
        to
    }

    pub async fn check_source(&self, source: &Source, plugin: &dyn TrackerPlugin) -> SourceCheckResult {
        let started = Instant::now();
        let mut result = SourceCheckResult::new(&source.id);

        if !source.is_active {
            debug!("Skipping inactive source {}", source.id);
            result.skipped = true;
            return result;
        }

        counter!("uatu_source_checks_total").increment(1);
        let mut source = source.clone();
        let mut state = SourceCheckState::Idle;

        state = self.transition(&source.id, state, SourceCheckState::Fetching);
        let rendered = self.fetch(&source).await;
        if !rendered.success {
            let error = rendered.error.unwrap_or_else(|| "Render failed".to_string());
            self.transition(&source.id, state, SourceCheckState::Failed);
            return self.fail(source, result, error, started).await;
        }

        if source.title.is_none() {
            source.title = rendered.title.clone();
        }

        state = self.transition(&source.id, state, SourceCheckState::Parsing);
        let text = rendered.text.unwrap_or_default();
        let context = ParseContext {
            url: Some(rendered.final_url.clone()),
            lang: rendered.lang.clone(),
        };
        let parsed = plugin.parse_in_context(&text, &context);

        if !parsed.success {
            self.transition(&source.id, state, SourceCheckState::Failed);
            let error = format!("Could not parse a {} from '{}'", plugin.plugin_type(), text);
            return self.fail(source, result, error, started).await;
        }

        if parsed.confidence < self.config.min_confidence {
            if self.config.count_low_confidence_as_error {
                self.transition(&source.id, state, SourceCheckState::Failed);
                let error = format!("Low confidence parse ({:.0}) of '{}'", parsed.confidence, text);
                return self.fail(source, result, error, started).await;
            }
            warn!(
                "Source {} parsed '{}' with low confidence {:.0}",
                source.id, text, parsed.confidence
            );
        }

        state = self.transition(&source.id, state, SourceCheckState::Comparing);
        let old_value = source.current_value.clone();
        let comparison = match &old_value {
            Some(old) => plugin.compare(old, &parsed.value),
            None => ComparisonResult::unchanged(),
        };

        let now = Utc::now();
        source.update_value(text.clone(), parsed.value.clone(), now);

        if let Err(e) = self.store.save_source(&source).await {
            warn!("Failed to persist source {}: {}", source.id, e);
            result.error = Some(e.to_string());
            result.response_time_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let observation = ValueHistory::new(
            source.id.clone(),
            parsed.value.clone(),
            text.clone(),
            parsed.confidence,
            now,
        );
        if let Err(e) = self.store.append_history(&observation).await {
            warn!("Failed to record history for source {}: {}", source.id, e);
        }

        self.transition(&source.id, state, SourceCheckState::Persisted);

        if comparison.changed {
            debug!(
                "Source {} {:?}: {} -> {}",
                source.id,
                comparison.change_type,
                old_value.as_ref().map(|v| plugin.format(v)).unwrap_or_default(),
                plugin.format(&parsed.value)
            );
        }

        result.success = true;
        result.changed = comparison.changed;
        result.comparison = Some(comparison);
        result.old_value = old_value;
        result.new_value = Some(parsed.value);
        result.new_text = Some(text);
        result.confidence = Some(parsed.confidence);
        result.screenshot = rendered.screenshot;
        result.response_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn fetch(&self, source: &Source) -> RenderResult {
        let request = RenderRequest {
            url: source.url.clone(),
            selector: source.selector.clone(),
            selector_type: source.selector_type,
            capture_screenshot: self.config.capture_screenshots,
        };

        let started = Instant::now();
        match tokio::time::timeout(self.render_timeout, self.renderer.render(&request)).await {
            Ok(result) => result,
            Err(_) => RenderResult::failure(
                &source.url,
                format!("Render timed out after {}ms", self.render_timeout.as_millis()),
                started,
            ),
        }
    }

    async fn fail(
        &self,
        mut source: Source,
        mut result: SourceCheckResult,
        error: String,
        started: Instant,
    ) -> SourceCheckResult {
        counter!("uatu_source_failures_total").increment(1);

        let count = source.record_error(error.clone(), Utc::now());
        warn!(
            "Source {} failed ({}/{}): {}",
            source.id, count, self.config.retry_attempts, error
        );

        if count >= self.config.retry_attempts && source.is_active {
            source.is_active = false;
            result.deactivated = true;
            counter!("uatu_sources_deactivated_total").increment(1);
            warn!(
                "Source {} deactivated after {} consecutive failures",
                source.id, count
            );
        }

        if let Err(e) = self.store.save_source(&source).await {
            warn!("Failed to persist error state for source {}: {}", source.id, e);
        }

        result.error = Some(error);
        result.response_time_ms = started.elapsed().as_millis() as u64;
        result
    }
}
