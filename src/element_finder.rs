use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::models::{SelectorType, TrackerType};
use crate::plugins::PluginManager;
use crate::plugins::traits::ElementMatch;
use crate::plugins::traits::tracker::sort_by_confidence;
use crate::renderer::{collapse_whitespace, RenderRequest, Renderer};
use crate::utils::error::AppError;

const EXACT_TEXT_BONUS: f32 = 30.0;
const SIMILARITY_WEIGHT: f32 = 25.0;
const WORD_BOUNDARY_BONUS: f32 = 15.0;
const CONTEXT_WEIGHT: f32 = 15.0;
const SEMANTIC_BONUS: f32 = 10.0;
const MAX_POSITION_PENALTY: f32 = 10.0;
const LONG_CONTEXT_PENALTY: f32 = 10.0;
const MAX_CONTEXT_LEN: usize = 1000;
const CONTEXT_SNIPPET_LEN: usize = 200;

const SEMANTIC_WORDS: &[&str] = &[
    "price", "cost", "amount", "total", "value", "version", "release", "count", "quantity", "stock",
];
const SEMANTIC_ATTRIBUTES: &[&str] = &["data-price", "data-value", "data-amount", "data-version", "data-count"];
const IGNORED_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "title"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub url: String,
    pub target_text: String,
    /// When set, the tracker's search variations widen the search and its ranking is
    /// applied on top.
    pub tracker_type: Option<TrackerType>,
    pub max_matches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub success: bool,
    pub url: String,
    pub final_url: Option<String>,
    pub title: Option<String>,
    pub matches: Vec<ElementMatch>,
    pub error: Option<String>,
    pub analysis_time_ms: u64,
}

/// Finds and scores the elements on a page whose text contains a target string.
///
/// Scores are a weighted sum of exact-match, edit-distance similarity, word-boundary
/// placement, context quality and semantic markup hints, minus a penalty for appearing
/// late in the document. Results are clamped to 0..=100 and sorted descending; equal
/// scores stay in document order.
pub fn rank_elements(html: &str, target: &str) -> Vec<ElementMatch> {
    let target = collapse_whitespace(target).to_lowercase();
    if target.is_empty() {
        return Vec::new();
    }

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if !collapse_whitespace(text).to_lowercase().contains(&target) {
            continue;
        }
        let Some(element) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        if IGNORED_TAGS.contains(&element.value().name()) || !seen.insert(element.id()) {
            continue;
        }

        let position = matches.len();
        let matched_text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
        let context_element = element.parent().and_then(ElementRef::wrap).unwrap_or(element);
        let context = collapse_whitespace(&context_element.text().collect::<Vec<_>>().join(" "));

        let confidence = score_match(&matched_text, &target, element, context_element, &context, position);
        debug!("Candidate {} scored {:.1}", position, confidence);

        matches.push(ElementMatch {
            selector: selector_for(&document, element),
            text: matched_text,
            html: element.html(),
            context: context.chars().take(CONTEXT_SNIPPET_LEN).collect(),
            confidence,
            position,
        });
    }

    sort_by_confidence(&mut matches);
    matches
}

fn score_match(
    matched_text: &str,
    target: &str,
    element: ElementRef<'_>,
    context_element: ElementRef<'_>,
    context: &str,
    position: usize,
) -> f32 {
    let lower = matched_text.to_lowercase();
    let mut score = 0.0;

    if lower == target {
        score += EXACT_TEXT_BONUS;
    }

    score += strsim::normalized_levenshtein(&lower, target) as f32 * SIMILARITY_WEIGHT;
    score += word_boundary_score(&lower, target);
    score += context_score(context_element, context);
    score += semantic_score(element);
    score -= (2.0 * position as f32).min(MAX_POSITION_PENALTY);

    score.clamp(0.0, 100.0)
}

/// Full bonus when the target is delimited on both sides, half when only one side is.
fn word_boundary_score(text: &str, target: &str) -> f32 {
    let Some(start) = text.find(target) else {
        return 0.0;
    };
    let end = start + target.len();

    let left = text[..start].chars().next_back().is_none_or(|c| !c.is_alphanumeric());
    let right = text[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());

    match (left, right) {
        (true, true) => WORD_BOUNDARY_BONUS,
        (true, false) | (false, true) => WORD_BOUNDARY_BONUS / 2.0,
        (false, false) => 0.0,
    }
}

/// Tight containers with little markup per character score highest.
fn context_score(context_element: ElementRef<'_>, context: &str) -> f32 {
    let tags = context_element
        .descendants()
        .filter(|n| n.value().is_element())
        .count() as f32;
    let density = tags / (context.len() as f32 / 100.0).max(1.0);

    let mut score = CONTEXT_WEIGHT / (1.0 + density);
    if context.len() > MAX_CONTEXT_LEN {
        score -= LONG_CONTEXT_PENALTY;
    }
    score
}

fn semantic_score(element: ElementRef<'_>) -> f32 {
    let mut score: f32 = 0.0;

    for candidate in std::iter::once(element).chain(element.parent().and_then(ElementRef::wrap)) {
        let el = candidate.value();
        let naming = format!("{} {}", el.attr("class").unwrap_or_default(), el.id().unwrap_or_default()).to_lowercase();
        if SEMANTIC_WORDS.iter().any(|w| naming.contains(w)) {
            score += SEMANTIC_BONUS / 2.0;
        }
        if el.attrs().any(|(name, _)| SEMANTIC_ATTRIBUTES.contains(&name))
            || el.attr("itemprop").is_some_and(|v| SEMANTIC_WORDS.contains(&v))
        {
            score += SEMANTIC_BONUS / 2.0;
        }
    }

    score.min(SEMANTIC_BONUS)
}

fn is_css_ident(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with(|c: char| c.is_ascii_digit())
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn matches_once(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|s| document.select(&s).take(2).count() == 1)
        .unwrap_or(false)
}

fn nth_child_step(element: ElementRef<'_>) -> String {
    let index = element.prev_siblings().filter(|n| n.value().is_element()).count() + 1;
    format!("{}:nth-child({})", element.value().name(), index)
}

/// Stable selector for an element: its id, then `tag.class` if that is unique, then an
/// nth-child path up to the nearest ancestor with an id (or the root).
pub fn selector_for(document: &Html, element: ElementRef<'_>) -> String {
    let value = element.value();

    if let Some(id) = value.id().filter(|id| is_css_ident(id)) {
        return format!("#{}", id);
    }

    let classes: Vec<&str> = value.classes().filter(|c| is_css_ident(c)).collect();
    if !classes.is_empty() {
        let by_class = format!("{}.{}", value.name(), classes.join("."));
        if matches_once(document, &by_class) {
            return by_class;
        }
    }

    let mut steps = vec![nth_child_step(element)];
    let mut current = element;
    while let Some(parent) = current.parent().and_then(ElementRef::wrap) {
        if let Some(id) = parent.value().id().filter(|id| is_css_ident(id)) {
            steps.push(format!("#{}", id));
            break;
        }
        if parent.value().name() == "html" {
            steps.push("html".to_string());
            break;
        }
        steps.push(nth_child_step(parent));
        current = parent;
    }

    steps.reverse();
    steps.join(" > ")
}

/// Rewrites `selector` into a stable one for its first match in `html`. Invalid or
/// unmatched selectors come back unchanged.
pub fn optimize_selector(html: &str, selector: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(css) = Selector::parse(selector) else {
        return selector.to_string();
    };

    let mut found = document.select(&css);
    match (found.next(), found.next()) {
        (Some(_), None) => selector.to_string(),
        (Some(first), Some(_)) => selector_for(&document, first),
        _ => selector.to_string(),
    }
}

/// Interactive page scanning on top of a [`Renderer`].
pub struct ElementFinder {
    renderer: Arc<dyn Renderer>,
    plugins: PluginManager,
}

impl ElementFinder {
    pub fn new(renderer: Arc<dyn Renderer>, plugins: PluginManager) -> Self {
        Self { renderer, plugins }
    }

    pub async fn scan_page(&self, request: &ScanRequest) -> Result<ScanResult, AppError> {
        let started = Instant::now();

        let tracker = match request.tracker_type {
            Some(kind) => Some(self.plugins.get_tracker(kind.as_str()).await?),
            None => None,
        };

        let page = match self.renderer.fetch_document(&request.url).await {
            Ok(page) => page,
            Err(e) => {
                return Ok(ScanResult {
                    success: false,
                    url: request.url.clone(),
                    final_url: None,
                    title: None,
                    matches: Vec::new(),
                    error: Some(e.to_string()),
                    analysis_time_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let mut targets = vec![request.target_text.clone()];
        if let Some(tracker) = &tracker {
            targets.extend(tracker.get_search_variations(&request.target_text));
        }

        // Each element keeps its best score across all search variations
        let mut merged: Vec<ElementMatch> = Vec::new();
        for target in &targets {
            for candidate in rank_elements(&page.html, target) {
                match merged.iter_mut().find(|m| m.selector == candidate.selector) {
                    Some(existing) if existing.confidence < candidate.confidence => *existing = candidate,
                    Some(_) => {}
                    None => merged.push(candidate),
                }
            }
        }
        sort_by_confidence(&mut merged);

        let mut matches = match &tracker {
            Some(tracker) => tracker.rank_matches(&request.target_text, &merged),
            None => merged,
        };
        matches.truncate(request.max_matches);

        info!(
            "Scanned {} for '{}': {} candidate(s)",
            request.url,
            request.target_text,
            matches.len()
        );

        Ok(ScanResult {
            success: true,
            url: request.url.clone(),
            final_url: Some(page.final_url),
            title: page.title,
            matches,
            error: None,
            analysis_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Whether `selector` currently resolves on the page, optionally to text containing
    /// `expected_text`.
    pub async fn validate_selector(
        &self,
        url: &str,
        selector: &str,
        selector_type: SelectorType,
        expected_text: Option<&str>,
    ) -> bool {
        let result = self
            .renderer
            .render(&RenderRequest {
                url: url.to_string(),
                selector: selector.to_string(),
                selector_type,
                capture_screenshot: false,
            })
            .await;

        match (result.success, result.text, expected_text) {
            (true, Some(actual), Some(expected)) => actual.contains(expected),
            (true, Some(actual), None) => !actual.trim().is_empty(),
            _ => false,
        }
    }
}
