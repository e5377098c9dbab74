//! Pull remote deltas and apply them to the local store in one transaction.
//!
//! Stores, platforms and partnerships are replaced wholesale on every pass.
//! Cashbacks are append-only by id: only rows above the local maximum are
//! pulled, so edits to an existing remote cashback are never re-pulled.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::model::{epoch_secs, ReconcileReport, RemoteSnapshot};
use crate::remote::RemoteSource;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Pulling from the remote failed; nothing was written locally.
    #[error("remote pull failed: {0:#}")]
    Remote(anyhow::Error),
    /// The local store rejected the snapshot; the transaction was rolled back.
    #[error("local store error: {0:#}")]
    Local(anyhow::Error),
}

/// Reconcile the replica against `remote`. `watermark` becomes `last_sync`
/// (falling back to `now`), unless `last_sync` is already later.
#[instrument(skip_all)]
pub async fn reconcile(
    pool: &Pool,
    remote: &dyn RemoteSource,
    watermark: Option<f64>,
    now: DateTime<Utc>,
) -> Result<ReconcileReport, ReconcileError> {
    let local_max_id = db::max_cashback_id(pool)
        .await
        .map_err(ReconcileError::Local)?;
    info!(local_max_id, "fetching remote snapshot");

    let snapshot = pull(remote, local_max_id)
        .await
        .map_err(ReconcileError::Remote)?;

    let watermark = watermark.unwrap_or_else(|| epoch_secs(now));
    let report = db::apply_snapshot(pool, &snapshot, watermark)
        .await
        .map_err(ReconcileError::Local)?;

    info!(
        stores = report.stores,
        platforms = report.platforms,
        partnerships = report.partnerships,
        new_cashbacks = report.new_cashbacks,
        pruned_cashbacks = report.pruned_cashbacks,
        last_sync = report.last_sync,
        "reconciliation committed"
    );
    Ok(report)
}

async fn pull(remote: &dyn RemoteSource, local_max_id: i64) -> anyhow::Result<RemoteSnapshot> {
    let stores = remote.fetch_stores().await?;
    let platforms = remote.fetch_platforms().await?;
    let partnerships = remote.fetch_partnerships().await?;
    let mut cashbacks = remote.fetch_cashbacks_after(local_max_id).await?;
    // Guard the cursor even if the remote ignores it.
    cashbacks.retain(|c| c.id > local_max_id);
    cashbacks.sort_by_key(|c| c.id);
    cashbacks.dedup_by_key(|c| c.id);

    Ok(RemoteSnapshot {
        stores,
        platforms,
        partnerships,
        cashbacks,
    })
}
