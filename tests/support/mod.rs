//! Scripted in-memory page for exercising the login flow without a browser.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokenbooth::browser::{DriverError, DriverResult, PageDriver, Selector};
use tokenbooth::challenge::ChallengeStage;
use tokenbooth::credentials::Credentials;
use tokenbooth::snapshot::SnapshotSink;

pub fn test_credentials() -> Credentials {
    Credentials::new("user@example.com", "hunter2")
}

pub fn snapshot_sink() -> (TempDir, SnapshotSink) {
    let dir = TempDir::new().expect("tempdir");
    let sink = SnapshotSink::new(dir.path());
    (dir, sink)
}

pub fn assert_snapshot_saved(dir: &TempDir, label: &str) {
    let path = dir.path().join(format!("{label}.html"));
    assert!(path.exists(), "expected snapshot {label}.html to be written");
}

pub fn assert_no_snapshot(dir: &TempDir, label: &str) {
    let path = dir.path().join(format!("{label}.html"));
    assert!(!path.exists(), "expected no snapshot {label}.html");
}

#[derive(Default)]
struct State {
    url: String,
    redirect_once: Option<String>,
    navigate_error: Option<String>,
    html: String,
    present: HashSet<Selector>,
    /// Present to `find`, but never reported by `wait_for`.
    never_renders: HashSet<Selector>,
    texts: HashMap<Selector, String>,
    /// Served once by `text_of`, then gone (pages change after navigation).
    transient_texts: HashMap<Selector, String>,
    eval_results: HashMap<String, Value>,
    body: Option<Value>,
    tabs: HashMap<String, ScriptedPage>,
    fail_clicks: HashSet<Selector>,

    navigations: Vec<String>,
    clicks: Vec<Selector>,
    typed: Vec<(Selector, String)>,
    evals: Vec<String>,
}

/// A [`PageDriver`] whose behavior is fully scripted up front and whose
/// interactions are recorded for assertions.
#[derive(Clone, Default)]
pub struct ScriptedPage {
    state: Arc<Mutex<State>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default().with_html("<html><body>scripted</body></html>")
    }

    fn update(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.update(|s| s.url = url.into())
    }

    /// The next navigation lands on `url` instead of its target.
    pub fn with_redirect_once(self, url: impl Into<String>) -> Self {
        self.update(|s| s.redirect_once = Some(url.into()))
    }

    pub fn with_navigate_error(self, message: impl Into<String>) -> Self {
        self.update(|s| s.navigate_error = Some(message.into()))
    }

    pub fn with_html(self, html: impl Into<String>) -> Self {
        self.update(|s| s.html = html.into())
    }

    pub fn with_present(self, selector: Selector) -> Self {
        self.update(|s| {
            s.present.insert(selector);
        })
    }

    pub fn with_all_present(self, selectors: impl IntoIterator<Item = Selector>) -> Self {
        self.update(|s| s.present.extend(selectors))
    }

    /// Element that `find` sees but that never becomes visible to `wait_for`.
    pub fn with_never_rendering(self, selector: Selector) -> Self {
        self.update(|s| {
            s.present.insert(selector.clone());
            s.never_renders.insert(selector);
        })
    }

    pub fn with_text(self, selector: Selector, text: impl Into<String>) -> Self {
        self.update(|s| {
            s.present.insert(selector.clone());
            s.texts.insert(selector, text.into());
        })
    }

    /// Text served exactly once; later reads see an empty element.
    pub fn with_transient_text(self, selector: Selector, text: impl Into<String>) -> Self {
        self.update(|s| {
            s.present.insert(selector.clone());
            s.transient_texts.insert(selector, text.into());
        })
    }

    pub fn with_eval(self, script: impl Into<String>, value: Value) -> Self {
        self.update(|s| {
            s.eval_results.insert(script.into(), value);
        })
    }

    /// Script the challenge widget as present and fully resolvable.
    pub fn with_challenge_solved(self) -> Self {
        let stages = [
            ChallengeStage::Wrapper,
            ChallengeStage::Frame,
            ChallengeStage::FrameBody,
            ChallengeStage::Trigger,
        ];
        let mut page = self.with_present(tokenbooth::challenge::response_input());
        for stage in stages {
            page = page.with_eval(stage.script(), Value::Bool(true));
        }
        page
    }

    pub fn with_body_json(self, body: Value) -> Self {
        self.update(|s| s.body = Some(body))
    }

    pub fn with_tab(self, url: impl Into<String>, page: ScriptedPage) -> Self {
        self.update(|s| {
            s.tabs.insert(url.into(), page);
        })
    }

    pub fn with_click_failure(self, selector: Selector) -> Self {
        self.update(|s| {
            s.present.insert(selector.clone());
            s.fail_clicks.insert(selector);
        })
    }

    // --- recorded interactions ----------------------------------------

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn clicks(&self) -> Vec<Selector> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn typed(&self) -> Vec<(Selector, String)> {
        self.state.lock().unwrap().typed.clone()
    }

    pub fn evals(&self) -> Vec<String> {
        self.state.lock().unwrap().evals.clone()
    }

    pub fn eval_count(&self, script: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .evals
            .iter()
            .filter(|s| s.as_str() == script)
            .count()
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.navigate_error.take() {
            return Err(DriverError::Backend(message));
        }
        state.navigations.push(url.to_string());
        state.url = match state.redirect_once.take() {
            Some(redirect) => redirect,
            None => url.to_string(),
        };
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn find(&self, selector: &Selector) -> DriverResult<bool> {
        Ok(self.state.lock().unwrap().present.contains(selector))
    }

    async fn wait_for(&self, selector: &Selector, timeout: Duration) -> DriverResult<()> {
        let state = self.state.lock().unwrap();
        if state.present.contains(selector) && !state.never_renders.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: selector.clone(),
                waited_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn click(&self, selector: &Selector) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(selector.clone());
        if state.fail_clicks.contains(selector) {
            return Err(DriverError::Backend(format!(
                "element has no position or size: {selector}"
            )));
        }
        if !state.present.contains(selector) {
            return Err(DriverError::NotFound(selector.clone()));
        }
        Ok(())
    }

    async fn type_text(&self, selector: &Selector, text: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.present.contains(selector) {
            return Err(DriverError::NotFound(selector.clone()));
        }
        state.typed.push((selector.clone(), text.to_string()));
        Ok(())
    }

    async fn text_of(&self, selector: &Selector) -> DriverResult<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(text) = state.transient_texts.remove(selector) {
            return Ok(text);
        }
        if let Some(text) = state.texts.get(selector) {
            return Ok(text.clone());
        }
        if state.present.contains(selector) {
            return Ok(String::new());
        }
        Err(DriverError::NotFound(selector.clone()))
    }

    async fn html(&self) -> DriverResult<String> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn eval(&self, script: &str) -> DriverResult<Value> {
        let mut state = self.state.lock().unwrap();
        state.evals.push(script.to_string());
        Ok(state
            .eval_results
            .get(script)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn body_json(&self) -> DriverResult<Value> {
        self.state
            .lock()
            .unwrap()
            .body
            .clone()
            .ok_or_else(|| DriverError::Backend("page body is not JSON".to_string()))
    }

    async fn open_tab(&self, url: &str) -> DriverResult<Box<dyn PageDriver>> {
        let state = self.state.lock().unwrap();
        match state.tabs.get(url) {
            Some(page) => Ok(Box::new(page.clone())),
            None => Err(DriverError::Backend(format!("no tab scripted for {url}"))),
        }
    }

    async fn settle(&self, _wait: Duration) {}
}
