use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::config::ScraperConfig;
use crate::models::SelectorType;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    pub selector: String,
    pub selector_type: SelectorType,
    pub capture_screenshot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderResult {
    pub success: bool,
    pub text: Option<String>,
    pub html: Option<String>,
    pub title: Option<String>,
    /// `lang` attribute of the document root, if any.
    pub lang: Option<String>,
    pub screenshot: Option<Vec<u8>>,
    pub error: Option<String>,
    pub response_time_ms: u64,
    pub final_url: String, // After redirects
}

impl RenderResult {
    pub fn failure(url: &str, error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            text: None,
            html: None,
            title: None,
            lang: None,
            screenshot: None,
            error: Some(error.into()),
            response_time_ms: started.elapsed().as_millis() as u64,
            final_url: url.to_string(),
        }
    }
}

/// A whole fetched page, used when searching for candidate elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDocument {
    pub url: String,
    pub final_url: String,
    pub html: String,
    pub title: Option<String>,
    pub lang: Option<String>,
}

/// Fetches pages and extracts the text behind a selector.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Page-level problems (network, status, missing element) come back as
    /// `success == false`, never as a panic or error.
    async fn render(&self, request: &RenderRequest) -> RenderResult;

    async fn fetch_document(&self, url: &str) -> Result<PageDocument, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub html: String,
}

/// Document title and root language.
pub fn page_metadata(document: &Html) -> (Option<String>, Option<String>) {
    let title = Selector::parse("title")
        .ok()
        .and_then(|s| document.select(&s).next())
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());
    let lang = document.root_element().value().attr("lang").map(str::to_string);
    (title, lang)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First element matching `selector` in `html`.
pub fn extract_with_selector(html: &str, selector: &str, selector_type: SelectorType) -> Result<Extracted, AppError> {
    let document = Html::parse_document(html);
    extract_from_document(&document, selector, selector_type)
}

pub fn extract_from_document(document: &Html, selector: &str, selector_type: SelectorType) -> Result<Extracted, AppError> {
    if selector_type == SelectorType::Xpath {
        return Err(AppError::Render(format!(
            "XPath selectors are not supported by the HTTP renderer: {}",
            selector
        )));
    }

    let css_selector = Selector::parse(selector)
        .map_err(|e| AppError::Render(format!("Invalid CSS selector '{}': {:?}", selector, e)))?;

    let element = document
        .select(&css_selector)
        .next()
        .ok_or_else(|| AppError::ElementNotFound { selector: selector.to_string() })?;

    Ok(Extracted {
        text: collapse_whitespace(&element.text().collect::<Vec<_>>().join(" ")),
        html: element.html(),
    })
}

/// Plain HTTP fetch with server-side HTML parsing. Does not run scripts and cannot take
/// screenshots.
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    pub fn new(config: &ScraperConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<(String, String), AppError> {
        let response = self.client.get(url).send().await?;
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Render(format!("HTTP {} from {}", status, url)));
        }
        let body = response.text().await?;
        Ok((final_url, body))
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, request: &RenderRequest) -> RenderResult {
        let started = Instant::now();

        let (final_url, body) = match self.fetch(&request.url).await {
            Ok(fetched) => fetched,
            Err(e) => return RenderResult::failure(&request.url, format!("Navigation failed: {}", e), started),
        };

        if request.capture_screenshot {
            debug!("Screenshot requested for {} but the HTTP renderer cannot capture one", request.url);
        }

        // Html is not Send, so parsing stays inside this synchronous block
        let extracted = {
            let document = Html::parse_document(&body);
            let (title, lang) = page_metadata(&document);
            extract_from_document(&document, &request.selector, request.selector_type).map(|e| (e, title, lang))
        };

        match extracted {
            Ok((element, title, lang)) => RenderResult {
                success: true,
                text: Some(element.text),
                html: Some(element.html),
                title,
                lang,
                screenshot: None,
                error: None,
                response_time_ms: started.elapsed().as_millis() as u64,
                final_url,
            },
            Err(e) => {
                let mut result = RenderResult::failure(&request.url, e.to_string(), started);
                result.final_url = final_url;
                result
            }
        }
    }

    async fn fetch_document(&self, url: &str) -> Result<PageDocument, AppError> {
        let (final_url, html) = self.fetch(url).await?;
        let (title, lang) = {
            let document = Html::parse_document(&html);
            page_metadata(&document)
        };

        Ok(PageDocument {
            url: url.to_string(),
            final_url,
            html,
            title,
            lang,
        })
    }
}
