//! Sync coordinator: one lock serialises every staleness check and
//! reconciliation, whether it comes from the background worker or a caller.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::db::Pool;
use crate::gate::{self, parse_watermark, SyncState};
use crate::model::ReconcileReport;
use crate::reconcile::{reconcile, ReconcileError};
use crate::remote::RemoteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Minimum time between two remote probes.
    pub cache_duration: Duration,
    /// Background sleep after an attempt.
    pub interval: Duration,
    /// Background sleep after an attempt that hit a local error.
    pub error_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cache_duration: Duration::from_secs(1800),
            interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The gate saw no reason to reconcile.
    UpToDate,
    Synced(ReconcileReport),
    /// The remote could not be read; the replica is unchanged.
    RemoteFailed(String),
}

pub struct SyncCoordinator {
    pool: Pool,
    remote: Arc<dyn RemoteSource>,
    settings: SyncSettings,
    state: Mutex<SyncState>,
}

impl SyncCoordinator {
    pub fn new(pool: Pool, remote: Arc<dyn RemoteSource>, settings: SyncSettings) -> Self {
        Self {
            pool,
            remote,
            settings,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Check staleness and reconcile if needed. Callers racing this block on
    /// the lock, then re-derive staleness themselves.
    #[instrument(skip_all)]
    pub async fn try_sync_if_stale(&self) -> Result<SyncOutcome> {
        let mut state = self.state.lock().await;
        let stale = gate::should_sync(
            &self.pool,
            self.remote.as_ref(),
            &mut state,
            self.settings.cache_duration,
            Utc::now(),
        )
        .await?;
        if !stale {
            return Ok(SyncOutcome::UpToDate);
        }
        self.reconcile_locked(&mut state).await
    }

    /// Reconcile now, ignoring the probe window. The remote watermark is still
    /// read so the adopted `last_sync` is the remote's; without one the pass
    /// falls back to wall clock.
    #[instrument(skip_all)]
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let mut state = self.state.lock().await;
        match self.remote.latest_update().await {
            Ok(Some(raw)) => match parse_watermark(&raw) {
                Ok(ts) => state.stage(ts),
                Err(err) => warn!(?err, raw = %raw, "ignoring unparseable remote watermark"),
            },
            Ok(None) => debug!("remote has no watermark"),
            Err(err) => warn!(?err, "forced sync could not read remote watermark"),
        }
        self.reconcile_locked(&mut state).await
    }

    async fn reconcile_locked(&self, state: &mut SyncState) -> Result<SyncOutcome> {
        let watermark = state.take_pending();
        info!(?watermark, "syncing replica from remote");
        match reconcile(&self.pool, self.remote.as_ref(), watermark, Utc::now()).await {
            Ok(report) => Ok(SyncOutcome::Synced(report)),
            Err(ReconcileError::Remote(err)) => {
                warn!(?err, "reconciliation aborted; replica unchanged");
                Ok(SyncOutcome::RemoteFailed(format!("{err:#}")))
            }
            Err(ReconcileError::Local(err)) => {
                error!(?err, "reconciliation rolled back");
                Err(err)
            }
        }
    }
}

/// Handle to the background sync loop.
pub struct SyncWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Run `try_sync_if_stale` forever: `interval` between attempts,
    /// `error_backoff` after a failed one, until `shutdown`.
    pub fn spawn(coordinator: Arc<SyncCoordinator>) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let settings = coordinator.settings();
        let handle = tokio::spawn(async move {
            info!("background sync started");
            loop {
                let delay = match coordinator.try_sync_if_stale().await {
                    Ok(outcome) => {
                        debug!(?outcome, "background sync attempt finished");
                        settings.interval
                    }
                    Err(err) => {
                        error!(?err, "background sync error; backing off");
                        settings.error_backoff
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => break,
                }
            }
            info!("background sync stopped");
        });
        Self { shutdown, handle }
    }

    /// Stop the loop and wait for an in-flight attempt to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(?err, "background sync task ended abnormally");
        }
    }
}
