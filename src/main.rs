use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokenbooth::config::ServiceConfig;
use tokenbooth::server;
use tokenbooth::service::LoginService;

#[derive(Parser)]
#[command(name = "tokenbooth")]
#[command(about = "Browser-automated login service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tokenbooth.toml")]
    config: PathBuf,

    /// Override the listen address from the config
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tokenbooth=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ServiceConfig::load_or_default(&cli.config)?;
    config.apply_env();
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    std::fs::create_dir_all(&config.snapshot_dir).with_context(|| {
        format!(
            "Failed to create snapshot dir: {}",
            config.snapshot_dir.display()
        )
    })?;

    if !config.browser.proxy_pool.is_empty() {
        tracing::info!(
            proxies = config.browser.proxy_pool.len(),
            "Proxy pool configured"
        );
    }

    let bind = config.bind.clone();
    let service = Arc::new(LoginService::new(config));
    let app = server::router(service);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(addr = %bind, commit = env!("GIT_COMMIT_HASH"), "tokenbooth listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
