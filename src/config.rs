use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default user agent pinned for every browser session.
///
/// The target site profiles clients aggressively; a stable, current Chrome
/// UA keeps sessions indistinguishable from ordinary desktop traffic.
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/130.0.6723.92 Safari/537.36"
        .to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_worker_slots() -> usize {
    3
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("pages")
}

fn default_extension_dir() -> Option<PathBuf> {
    Some(PathBuf::from("plugins/turnstilePatch"))
}

/// Browser provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Path to the Chrome/Chromium executable. Auto-detected when unset.
    pub chrome_path: Option<PathBuf>,

    /// Run the browser headless.
    pub headless: bool,

    /// Unpacked extension loaded into every session (challenge bypass patch).
    /// Set to nothing to launch without it.
    pub extension_dir: Option<PathBuf>,

    /// User agent applied to every session.
    pub user_agent: String,

    /// Upstream proxies; each execution picks one at random when non-empty.
    pub proxy_pool: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            extension_dir: default_extension_dir(),
            user_agent: default_user_agent(),
            proxy_pool: Vec::new(),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP API listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Concurrent login executions; requests beyond this queue.
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,

    /// Directory for diagnostic page snapshots.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Browser provisioning settings.
    #[serde(default)]
    pub browser: BrowserSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            worker_slots: default_worker_slots(),
            snapshot_dir: default_snapshot_dir(),
            browser: BrowserSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServiceConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides. `PROXY_POOL` (comma-delimited) replaces the
    /// configured proxy pool so deployments can rotate proxies without editing
    /// the config file.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var("PROXY_POOL") {
            self.browser.proxy_pool = parse_proxy_pool(&raw);
        }
    }
}

/// Split a comma-delimited proxy list, dropping empty entries.
pub fn parse_proxy_pool(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServiceConfig::default();
        assert_eq!(config.bind, "0.0.0.0:8000");
        assert_eq!(config.worker_slots, 3);
        assert_eq!(config.snapshot_dir, PathBuf::from("pages"));
        assert!(config.browser.headless);
        assert!(config.browser.proxy_pool.is_empty());
        assert_eq!(
            config.browser.extension_dir.as_deref(),
            Some(Path::new("plugins/turnstilePatch"))
        );
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            bind = "127.0.0.1:9000"

            [browser]
            headless = false
            "#,
        )
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.worker_slots, 3);
        assert!(!config.browser.headless);
        assert!(!config.browser.user_agent.is_empty());
    }

    #[test]
    fn proxy_pool_parsing_skips_empty_entries() {
        let pool = parse_proxy_pool("http://a:8080, http://b:8080,,");
        assert_eq!(pool, vec!["http://a:8080", "http://b:8080"]);

        assert!(parse_proxy_pool("").is_empty());
    }
}
