//! Chromium-backed driver implementation.
//!
//! Wraps a `chromiumoxide` browser session behind the [`Driver`] port.
//! Element state that CDP does not expose directly (visibility, geometry,
//! checked state) is computed by JavaScript functions bound to the element.

use crate::driver::{Driver, ElementId, ElementInfo, ElementQuery};
use crate::error::{BrowserError, Result};
use caseflow_core::BrowserConfig as BrowserSettings;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::{Element, Page};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// JS bound to an element to report its observable state in one round trip.
const DESCRIBE_FN: &str = r#"
function() {
    const rect = this.getBoundingClientRect();
    const style = window.getComputedStyle(this);
    const visible = rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden' && style.display !== 'none';
    const attrs = { tag: this.tagName.toLowerCase() };
    for (const name of ['type', 'name', 'placeholder', 'class', 'id',
                        'aria-checked', 'title', 'alt', 'role', 'src']) {
        const value = this.getAttribute(name);
        if (value !== null) attrs[name] = value;
    }
    return JSON.stringify({
        visible: visible,
        enabled: !this.disabled,
        selected: !!this.checked,
        width: Math.round(rect.width),
        height: Math.round(rect.height),
        attrs: attrs
    });
}
"#;

const CLEAR_FN: &str = r#"
function() {
    this.focus();
    if ('value' in this) { this.value = ''; }
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
}
"#;

const FORCE_CLICK_FN: &str = "function() { this.click(); return true; }";

#[derive(Debug, Deserialize)]
struct DescribePayload {
    visible: bool,
    enabled: bool,
    selected: bool,
    width: u32,
    height: u32,
    attrs: HashMap<String, String>,
}

/// Browser driver backed by a local Chromium instance.
pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    page: Page,
    handler_task: JoinHandle<()>,
    elements: Mutex<HashMap<u64, Element>>,
    next_id: AtomicU64,
}

impl ChromiumDriver {
    /// Launch a Chromium instance and open a blank page.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(settings.window_width, settings.window_height);

        if !settings.headless {
            builder = builder.with_head();
        }

        let config = builder.build().map_err(BrowserError::Driver)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Driver(e.to_string()))?;

        // Drive the CDP event loop
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Driver(e.to_string()))?;

        tracing::info!(
            headless = settings.headless,
            width = settings.window_width,
            height = settings.window_height,
            "chromium session started"
        );

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler_task,
            elements: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    async fn invalidate_handles(&self) {
        self.elements.lock().await.clear();
    }

    async fn register(&self, found: Vec<Element>) -> Vec<ElementId> {
        let mut registry = self.elements.lock().await;
        let mut ids = Vec::with_capacity(found.len());
        for element in found {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            registry.insert(id, element);
            ids.push(ElementId(id));
        }
        ids
    }
}

#[async_trait::async_trait]
impl Driver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.invalidate_handles().await;
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(format!("{url}: {e}")))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| BrowserError::Navigation(format!("{url}: {e}")))?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.invalidate_handles().await;
        self.page
            .reload()
            .await
            .map_err(|e| BrowserError::Navigation(format!("reload: {e}")))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| BrowserError::Driver(e.to_string()))?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| BrowserError::Driver(e.to_string()))?;
        Ok(title.unwrap_or_default())
    }

    async fn find_all(
        &self,
        query: &ElementQuery,
        scope: Option<ElementId>,
    ) -> Result<Vec<ElementId>> {
        let found = match query {
            ElementQuery::Css(selector) => {
                if let Some(scope_id) = scope {
                    let registry = self.elements.lock().await;
                    let scope_el = registry
                        .get(&scope_id.0)
                        .ok_or(BrowserError::StaleElement(scope_id.0))?;
                    scope_el.find_elements(selector.as_str()).await
                } else {
                    self.page.find_elements(selector.as_str()).await
                }
            }
            // XPath queries always evaluate from the document root
            ElementQuery::XPath(expression) => self.page.find_xpaths(expression.as_str()).await,
        };

        match found {
            Ok(elements) => Ok(self.register(elements).await),
            Err(e) => {
                // A query with no matches surfaces as an error from CDP;
                // the locator treats it as an empty result and moves on.
                tracing::debug!(query = %query, error = %e, "query matched nothing");
                Ok(Vec::new())
            }
        }
    }

    async fn describe(&self, id: ElementId) -> Result<ElementInfo> {
        let registry = self.elements.lock().await;
        let element = registry.get(&id.0).ok_or(BrowserError::StaleElement(id.0))?;

        let returned = element
            .call_js_fn(DESCRIBE_FN, false)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;

        let raw = returned
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrowserError::Script("describe returned no value".to_string()))?;

        let payload: DescribePayload = serde_json::from_str(raw)
            .map_err(|e| BrowserError::Script(format!("describe payload: {e}")))?;

        Ok(ElementInfo {
            visible: payload.visible,
            enabled: payload.enabled,
            selected: payload.selected,
            width: payload.width,
            height: payload.height,
            attrs: payload.attrs,
        })
    }

    async fn click(&self, id: ElementId) -> Result<()> {
        let registry = self.elements.lock().await;
        let element = registry.get(&id.0).ok_or(BrowserError::StaleElement(id.0))?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Interaction(format!("click: {e}")))?;
        Ok(())
    }

    async fn force_click(&self, id: ElementId) -> Result<()> {
        let registry = self.elements.lock().await;
        let element = registry.get(&id.0).ok_or(BrowserError::StaleElement(id.0))?;
        element
            .call_js_fn(FORCE_CLICK_FN, false)
            .await
            .map_err(|e| BrowserError::Script(format!("forced click: {e}")))?;
        Ok(())
    }

    async fn clear(&self, id: ElementId) -> Result<()> {
        let registry = self.elements.lock().await;
        let element = registry.get(&id.0).ok_or(BrowserError::StaleElement(id.0))?;
        element
            .call_js_fn(CLEAR_FN, false)
            .await
            .map_err(|e| BrowserError::Script(format!("clear: {e}")))?;
        Ok(())
    }

    async fn type_text(&self, id: ElementId, text: &str) -> Result<()> {
        let registry = self.elements.lock().await;
        let element = registry.get(&id.0).ok_or(BrowserError::StaleElement(id.0))?;
        element
            .focus()
            .await
            .map_err(|e| BrowserError::Interaction(format!("focus: {e}")))?;
        element
            .type_str(text)
            .await
            .map_err(|e| BrowserError::Interaction(format!("type: {e}")))?;
        Ok(())
    }

    async fn screenshot(&self, id: ElementId) -> Result<Vec<u8>> {
        let registry = self.elements.lock().await;
        let element = registry.get(&id.0).ok_or(BrowserError::StaleElement(id.0))?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| BrowserError::Interaction(format!("screenshot: {e}")))
    }

    async fn scroll_into_view(&self, id: ElementId) -> Result<()> {
        let registry = self.elements.lock().await;
        let element = registry.get(&id.0).ok_or(BrowserError::StaleElement(id.0))?;
        element
            .scroll_into_view()
            .await
            .map_err(|e| BrowserError::Interaction(format!("scroll: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.invalidate_handles().await;
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| BrowserError::Driver(e.to_string()))?;
        let _ = browser.wait().await;
        self.handler_task.abort();
        tracing::info!("chromium session closed");
        Ok(())
    }
}
