//! Request dispatch: a bounded worker pool running one browser-driven login
//! per slot, with the session released on every exit path.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use crate::browser::{BrowserSession, LaunchOptions};
use crate::config::ServiceConfig;
use crate::credentials::Credentials;
use crate::login::{LoginMachine, LoginOutcome};
use crate::snapshot::SnapshotSink;

/// Runs one login execution per call. The HTTP layer depends on this trait so
/// it can be exercised without a browser.
#[async_trait]
pub trait LoginExecutor: Send + Sync {
    async fn login(&self, credentials: Credentials) -> Result<LoginOutcome>;
}

pub struct LoginService {
    config: ServiceConfig,
    snapshots: SnapshotSink,
    permits: Arc<Semaphore>,
}

impl LoginService {
    pub fn new(config: ServiceConfig) -> Self {
        let snapshots = SnapshotSink::new(config.snapshot_dir.clone());
        // Browser processes are expensive; the pool bounds how many exist at
        // once. Requests beyond capacity queue on the semaphore.
        let permits = Arc::new(Semaphore::new(config.worker_slots.max(1)));
        Self {
            config,
            snapshots,
            permits,
        }
    }
}

#[async_trait]
impl LoginExecutor for LoginService {
    async fn login(&self, credentials: Credentials) -> Result<LoginOutcome> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("worker pool is closed")?;

        let execution = Uuid::new_v4();
        let span = tracing::info_span!("login", execution = %execution, email = %credentials.email);

        async {
            tracing::info!("Starting login execution");

            let options = LaunchOptions::from_settings(&self.config.browser);
            let session = BrowserSession::launch(&options)
                .await
                .context("failed to provision a browser session")?;

            // The machine never errors past its boundary, so every path that
            // reaches this point also reaches the shutdown below.
            let driver = session.driver();
            let outcome = LoginMachine::new(&driver, &credentials, &self.snapshots)
                .execute()
                .await;

            session.shutdown().await;

            tracing::info!(
                success = matches!(outcome, LoginOutcome::Success { .. }),
                "Execution finished"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}
