use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use serde_json::Value;
use tokio::sync::Mutex;

/// How a page element is addressed.
///
/// The target site mixes stable ids, generated class chains, and one
/// absolute DOM path for an A/B-tested button, so all three forms are kept
/// first-class instead of being squeezed into CSS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Css(String),
    Xpath(String),
    /// Matches when the page body text contains the given string.
    Text(String),
}

impl Selector {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Self::Xpath(path.into())
    }

    pub fn text(needle: impl Into<String>) -> Self {
        Self::Text(needle.into())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(s) => write!(f, "{s}"),
            Selector::Xpath(s) => write!(f, "xpath {s}"),
            Selector::Text(s) => write!(f, "text \"{s}\""),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The element did not appear within the allotted wait. Steps branch on
    /// this to take their documented fallback paths.
    #[error("timed out after {waited_ms}ms waiting for {selector}")]
    Timeout { selector: Selector, waited_ms: u64 },

    #[error("element not found: {0}")]
    NotFound(Selector),

    /// Anything the underlying browser reported that is not a plain
    /// missing-element condition.
    #[error("{0}")]
    Backend(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// The surface the login core requires from a browser tab.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    /// Immediate presence probe; never waits.
    async fn find(&self, selector: &Selector) -> DriverResult<bool>;

    /// Poll for the element until it appears or `timeout` elapses.
    async fn wait_for(&self, selector: &Selector, timeout: Duration) -> DriverResult<()>;

    async fn click(&self, selector: &Selector) -> DriverResult<()>;

    async fn type_text(&self, selector: &Selector, text: &str) -> DriverResult<()>;

    async fn text_of(&self, selector: &Selector) -> DriverResult<String>;

    /// Full page markup.
    async fn html(&self) -> DriverResult<String>;

    /// Evaluate a script in the page, returning its JSON value.
    async fn eval(&self, script: &str) -> DriverResult<Value>;

    /// Parse the page body as JSON.
    async fn body_json(&self) -> DriverResult<Value>;

    /// Open a new tab at `url` in the same browser.
    async fn open_tab(&self, url: &str) -> DriverResult<Box<dyn PageDriver>>;

    /// Give the page time to settle. No-op for scripted test pages.
    async fn settle(&self, wait: Duration);
}

/// Quote a string for safe embedding in a page script.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

fn text_probe_script(needle: &str) -> String {
    format!(
        "(() => {{ const t = {}; return !!(document.body && document.body.innerText.includes(t)); }})()",
        js_string(needle)
    )
}

fn xpath_lookup(path: &str, action: &str) -> String {
    format!(
        "(() => {{ const r = document.evaluate({}, document, null, \
         XPathResult.FIRST_ORDERED_NODE_TYPE, null); const el = r.singleNodeValue; \
         if (!el) return false; {action} return true; }})()",
        js_string(path)
    )
}

/// [`PageDriver`] over a live Chrome DevTools Protocol tab.
#[derive(Clone)]
pub struct CdpDriver {
    page: Page,
    browser: Arc<Mutex<Browser>>,
}

impl CdpDriver {
    const POLL_INTERVAL: Duration = Duration::from_millis(250);

    pub(crate) fn new(page: Page, browser: Arc<Mutex<Browser>>) -> Self {
        Self { page, browser }
    }

    async fn probe(&self, selector: &Selector) -> DriverResult<bool> {
        match selector {
            Selector::Css(css) => Ok(self.page.find_element(css.as_str()).await.is_ok()),
            Selector::Xpath(path) => {
                let value = self.eval(&xpath_lookup(path, "")).await?;
                Ok(value.as_bool().unwrap_or(false))
            }
            Selector::Text(needle) => {
                let value = self.eval(&text_probe_script(needle)).await?;
                Ok(value.as_bool().unwrap_or(false))
            }
        }
    }
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|err| DriverError::Backend(format!("navigation to {url} failed: {err}")))?;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.page
            .url()
            .await
            .map_err(|err| DriverError::Backend(err.to_string()))?
            .ok_or_else(|| DriverError::Backend("page has no url".to_string()))
    }

    async fn find(&self, selector: &Selector) -> DriverResult<bool> {
        self.probe(selector).await
    }

    async fn wait_for(&self, selector: &Selector, timeout: Duration) -> DriverResult<()> {
        let started = Instant::now();
        loop {
            if self.probe(selector).await? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::Timeout {
                    selector: selector.clone(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &Selector) -> DriverResult<()> {
        match selector {
            Selector::Css(css) => {
                let element = self
                    .page
                    .find_element(css.as_str())
                    .await
                    .map_err(|_| DriverError::NotFound(selector.clone()))?;
                element
                    .click()
                    .await
                    .map_err(|err| DriverError::Backend(format!("click on {selector} failed: {err}")))?;
                Ok(())
            }
            Selector::Xpath(path) => {
                let value = self.eval(&xpath_lookup(path, "el.click();")).await?;
                if value.as_bool().unwrap_or(false) {
                    Ok(())
                } else {
                    Err(DriverError::NotFound(selector.clone()))
                }
            }
            Selector::Text(_) => Err(DriverError::Backend(format!(
                "text selectors cannot be clicked: {selector}"
            ))),
        }
    }

    async fn type_text(&self, selector: &Selector, text: &str) -> DriverResult<()> {
        let Selector::Css(css) = selector else {
            return Err(DriverError::Backend(format!(
                "only css selectors accept input: {selector}"
            )));
        };
        let element = self
            .page
            .find_element(css.as_str())
            .await
            .map_err(|_| DriverError::NotFound(selector.clone()))?;
        element
            .click()
            .await
            .map_err(|err| DriverError::Backend(format!("focus on {selector} failed: {err}")))?;
        element
            .type_str(text)
            .await
            .map_err(|err| DriverError::Backend(format!("typing into {selector} failed: {err}")))?;
        Ok(())
    }

    async fn text_of(&self, selector: &Selector) -> DriverResult<String> {
        let Selector::Css(css) = selector else {
            return Err(DriverError::Backend(format!(
                "only css selectors expose text content: {selector}"
            )));
        };
        let element = self
            .page
            .find_element(css.as_str())
            .await
            .map_err(|_| DriverError::NotFound(selector.clone()))?;
        let text = element
            .inner_text()
            .await
            .map_err(|err| DriverError::Backend(err.to_string()))?;
        Ok(text.unwrap_or_default())
    }

    async fn html(&self) -> DriverResult<String> {
        self.page
            .content()
            .await
            .map_err(|err| DriverError::Backend(err.to_string()))
    }

    async fn eval(&self, script: &str) -> DriverResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| DriverError::Backend(format!("script evaluation failed: {err}")))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn body_json(&self) -> DriverResult<Value> {
        let text = self
            .eval("document.body ? document.body.innerText : \"\"")
            .await?;
        let text = text.as_str().unwrap_or_default();
        serde_json::from_str(text)
            .map_err(|err| DriverError::Backend(format!("page body is not JSON: {err}")))
    }

    async fn open_tab(&self, url: &str) -> DriverResult<Box<dyn PageDriver>> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page(url)
                .await
                .map_err(|err| DriverError::Backend(format!("failed to open tab at {url}: {err}")))?
        };
        Ok(Box::new(CdpDriver::new(page, Arc::clone(&self.browser))))
    }

    async fn settle(&self, wait: Duration) {
        tokio::time::sleep(wait).await;
    }
}
