//! One browser session per login execution.
//!
//! The session owns the browser process, its CDP event loop, and the login
//! tab. The dispatcher releases it on every exit path; `shutdown` clears
//! cookies and cache before the process goes away so nothing from one
//! execution can leak into the next.

use std::sync::Arc;

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCacheParams, ClearBrowserCookiesParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::driver::CdpDriver;
use super::launch::{launch, LaunchOptions};

pub struct BrowserSession {
    browser: Arc<Mutex<Browser>>,
    handler_task: JoinHandle<()>,
    page: Page,
    // Held so the per-session profile survives until the process exits.
    _profile_dir: TempDir,
}

impl BrowserSession {
    /// Launch a browser and open the login tab.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let profile_dir =
            tempfile::tempdir().context("Failed to create browser profile directory")?;

        let (browser, mut handler) = launch(options, profile_dir.path()).await?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let browser = Arc::new(Mutex::new(browser));
        let page = {
            let guard = browser.lock().await;
            guard
                .new_page("about:blank")
                .await
                .context("Failed to open login tab")?
        };

        // Clear any widget state the bypass extension left from a prior load.
        let _ = page.evaluate("try { turnstile.reset() } catch (e) {}").await;

        Ok(Self {
            browser,
            handler_task,
            page,
            _profile_dir: profile_dir,
        })
    }

    /// Driver over the login tab.
    pub fn driver(&self) -> CdpDriver {
        CdpDriver::new(self.page.clone(), Arc::clone(&self.browser))
    }

    /// Clear browsing state and terminate the browser process.
    ///
    /// Best-effort throughout: a session being torn down must never turn a
    /// completed execution into an error.
    pub async fn shutdown(self) {
        if let Err(err) = self.page.execute(ClearBrowserCookiesParams::default()).await {
            tracing::debug!(error = %err, "Failed to clear cookies during shutdown");
        }
        if let Err(err) = self.page.execute(ClearBrowserCacheParams::default()).await {
            tracing::debug!(error = %err, "Failed to clear cache during shutdown");
        }

        {
            let mut browser = self.browser.lock().await;
            if let Err(err) = browser.close().await {
                tracing::warn!(error = %err, "Failed to close browser cleanly");
            }
            if let Err(err) = browser.wait().await {
                tracing::debug!(error = %err, "Browser process did not exit cleanly");
            }
        }

        self.handler_task.abort();
    }
}
