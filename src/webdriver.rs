use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::PageError;
use crate::page::{BrowserPage, ElementRef};
use crate::synthesis::xpath_literal;
use crate::types::Strategy;

/// Supported browser types
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    /// Mozilla Firefox (geckodriver)
    Firefox,
    /// Google Chrome/Chromium (chromedriver)
    Chrome,
}

impl BrowserType {
    /// Default WebDriver URL for this browser type
    pub fn default_webdriver_url(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "http://localhost:4444",
            BrowserType::Chrome => "http://localhost:9515",
        }
    }

    fn driver_name(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "geckodriver",
            BrowserType::Chrome => "chromedriver",
        }
    }
}

/// Options for opening a [`WebDriverPage`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub browser: BrowserType,
    /// Overrides [`BrowserType::default_webdriver_url`]
    pub webdriver_url: Option<String>,
    pub headless: bool,
    /// Window size as (width, height)
    pub viewport: Option<(u32, u32)>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            browser: BrowserType::Firefox,
            webdriver_url: None,
            headless: true,
            viewport: Some((1280, 800)),
        }
    }
}

/// [`BrowserPage`] backed by a WebDriver session
///
/// Element handles are only valid until the next query; each
/// `query_selector` call replaces the previous set.
pub struct WebDriverPage {
    client: Client,
    elements: Mutex<HashMap<String, Element>>,
    next_id: AtomicU64,
    /// Chrome profile directory, removed when the page is dropped
    _profile_dir: Option<TempDir>,
}

impl WebDriverPage {
    /// Connect to a running WebDriver server and open a new session
    pub async fn connect(options: &SessionOptions) -> Result<Self, PageError> {
        let webdriver_url = options
            .webdriver_url
            .clone()
            .unwrap_or_else(|| options.browser.default_webdriver_url().to_string());
        info!("Connecting to {:?} WebDriver at {}", options.browser, webdriver_url);

        if !is_webdriver_running(&webdriver_url).await {
            return Err(PageError::Session(format!(
                "cannot reach {} at {}; start it with `{} --port {}`",
                options.browser.driver_name(),
                webdriver_url,
                options.browser.driver_name(),
                webdriver_url.rsplit(':').next().unwrap_or("4444"),
            )));
        }

        let mut caps = serde_json::Map::new();
        let mut profile_dir = None;

        match options.browser {
            BrowserType::Firefox => {
                let mut args = Vec::new();
                if options.headless {
                    args.push("--headless".to_string());
                }
                if let Some((width, height)) = options.viewport {
                    args.push(format!("--width={width}"));
                    args.push(format!("--height={height}"));
                }
                caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
            }
            BrowserType::Chrome => {
                let mut args = vec!["--no-sandbox".to_string()];
                if options.headless {
                    args.push("--headless=new".to_string());
                    args.push("--disable-gpu".to_string());
                    args.push("--disable-dev-shm-usage".to_string());
                }
                if let Some((width, height)) = options.viewport {
                    args.push(format!("--window-size={width},{height}"));
                }

                // Chrome refuses to share a profile directory between sessions
                let dir = tempfile::Builder::new()
                    .prefix("webselect-chrome-")
                    .tempdir()
                    .map_err(|e| PageError::Session(e.to_string()))?;
                args.push(format!("--user-data-dir={}", dir.path().display()));
                profile_dir = Some(dir);

                caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
            }
        }

        let client = ClientBuilder::rustls()
            .capabilities(caps)
            .connect(&webdriver_url)
            .await
            .map_err(|e| PageError::Session(format!("failed to create session: {e}")))?;

        if let Some((width, height)) = options.viewport {
            debug!("Setting viewport to {}x{}", width, height);
            if let Err(e) = client.set_window_size(width, height).await {
                debug!("Could not set window size: {}", e);
            }
        }

        Ok(Self {
            client,
            elements: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            _profile_dir: profile_dir,
        })
    }

    /// Navigate and wait (up to 2s) for `document.readyState == "complete"`
    pub async fn goto(&self, url: &str) -> Result<(), PageError> {
        info!("Navigating to {}", url);
        self.client
            .goto(url)
            .await
            .map_err(|e| PageError::Session(format!("navigation to {url} failed: {e}")))?;

        for _ in 0..20 {
            match self
                .client
                .execute("return document.readyState === 'complete';", vec![])
                .await
            {
                Ok(ready) if ready.as_bool().unwrap_or(false) => break,
                _ => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
            }
        }
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, PageError> {
        self.client
            .current_url()
            .await
            .map(|url| url.to_string())
            .map_err(|e| PageError::Session(e.to_string()))
    }

    pub async fn close(self) -> Result<(), PageError> {
        self.client
            .close()
            .await
            .map_err(|e| PageError::Session(e.to_string()))
    }

    async fn element(&self, element: &ElementRef) -> Result<Element, PageError> {
        self.elements
            .lock()
            .await
            .get(element.id())
            .cloned()
            .ok_or_else(|| PageError::StaleElement(element.id().to_string()))
    }
}

async fn is_webdriver_running(url: &str) -> bool {
    let status_url = format!("{}/status", url.trim_end_matches('/'));
    match reqwest::get(&status_url).await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Locator kind and expression for a strategy
///
/// Text matches select the deepest element whose normalized text equals the
/// expression, so wrappers sharing the same text don't make it ambiguous.
pub fn locator_for(expression: &str, strategy: Strategy) -> (LocatorKind, String) {
    match strategy {
        Strategy::Css | Strategy::AttributeMatch => (LocatorKind::Css, expression.to_string()),
        Strategy::XPath => (LocatorKind::XPath, expression.to_string()),
        Strategy::TextMatch => {
            let literal = xpath_literal(expression.trim());
            (
                LocatorKind::XPath,
                format!(
                    "//*[normalize-space()={literal}][not(.//*[normalize-space()={literal}])]"
                ),
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Css,
    XPath,
}

fn classify(expression: &str, err: fantoccini::error::CmdError) -> PageError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("invalid selector") || lower.contains("invalid argument") {
        PageError::InvalidExpression {
            expression: expression.to_string(),
            reason: message,
        }
    } else if lower.contains("stale element") {
        PageError::StaleElement(message)
    } else {
        PageError::Query(message)
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn query_selector(
        &self,
        expression: &str,
        strategy: Strategy,
    ) -> Result<Vec<ElementRef>, PageError> {
        let (kind, selector) = locator_for(expression, strategy);
        let locator = match kind {
            LocatorKind::Css => Locator::Css(&selector),
            LocatorKind::XPath => Locator::XPath(&selector),
        };

        let found = self
            .client
            .find_all(locator)
            .await
            .map_err(|e| classify(expression, e))?;

        let mut elements = self.elements.lock().await;
        elements.clear();
        let refs = found
            .into_iter()
            .map(|element| {
                let id = format!("e{}", self.next_id.fetch_add(1, Ordering::Relaxed));
                elements.insert(id.clone(), element);
                ElementRef::new(id)
            })
            .collect();
        Ok(refs)
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool, PageError> {
        let handle = self.element(element).await?;
        handle
            .is_displayed()
            .await
            .map_err(|e| classify(element.id(), e))
    }

    async fn is_interactable(&self, element: &ElementRef) -> Result<bool, PageError> {
        let handle = self.element(element).await?;
        handle
            .is_enabled()
            .await
            .map_err(|e| classify(element.id(), e))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        self.client
            .screenshot()
            .await
            .map_err(|e| PageError::Capture(e.to_string()))
    }

    async fn dom_snapshot(&self) -> Result<String, PageError> {
        self.client
            .source()
            .await
            .map_err(|e| PageError::Capture(e.to_string()))
    }
}

#[cfg(test)]
#[path = "webdriver_test.rs"]
mod webdriver_test;
