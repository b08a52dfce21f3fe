use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::Handler;
use rand::seq::SliceRandom;

use crate::config::BrowserSettings;

/// Resolved launch parameters for one browser session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub extension_dir: Option<PathBuf>,
}

impl LaunchOptions {
    /// Build options for one execution, picking a proxy at random from the
    /// configured pool when it is non-empty.
    pub fn from_settings(settings: &BrowserSettings) -> Self {
        let proxy = settings
            .proxy_pool
            .choose(&mut rand::thread_rng())
            .cloned();

        Self {
            chrome_path: settings.chrome_path.clone(),
            headless: settings.headless,
            user_agent: settings.user_agent.clone(),
            proxy,
            extension_dir: settings.extension_dir.clone(),
        }
    }
}

/// Launch a Chromium process configured for unattended login automation.
pub(crate) async fn launch(
    options: &LaunchOptions,
    profile_dir: &Path,
) -> Result<(Browser, Handler)> {
    let chrome_path = match &options.chrome_path {
        Some(path) => path.clone(),
        None => find_chrome().context(
            "Chrome/Chromium not found. Install Chrome or set browser.chrome_path in the config.",
        )?,
    };

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .viewport(None)
        .user_data_dir(profile_dir)
        .arg(format!("--user-agent={}", options.user_agent))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-save-password-bubble")
        .arg("--password-store=basic")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu");

    if !options.headless {
        builder = builder.with_head();
    }

    if let Some(proxy) = &options.proxy {
        tracing::debug!(proxy = %proxy, "Routing session through proxy");
        builder = builder.arg(format!("--proxy-server={proxy}"));
    }

    if let Some(extension) = &options.extension_dir {
        builder = builder.extension(extension.display().to_string());
    }

    let config = builder
        .build()
        .map_err(|err| anyhow::anyhow!("Failed to configure browser: {err}"))?;

    let (browser, handler) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;

    Ok((browser, handler))
}

/// Find a Chrome/Chromium executable.
pub fn find_chrome() -> Option<PathBuf> {
    for name in [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(output) = Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_proxy_selected_from_an_empty_pool() {
        let settings = BrowserSettings::default();
        let options = LaunchOptions::from_settings(&settings);
        assert!(options.proxy.is_none());
    }

    #[test]
    fn proxy_always_comes_from_the_pool() {
        let settings = BrowserSettings {
            proxy_pool: vec!["http://a:8080".into(), "http://b:8080".into()],
            ..Default::default()
        };
        for _ in 0..20 {
            let options = LaunchOptions::from_settings(&settings);
            let proxy = options.proxy.expect("pool is non-empty");
            assert!(settings.proxy_pool.contains(&proxy));
        }
    }
}
