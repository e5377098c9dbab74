//! Staleness gate: decides whether the replica needs a reconciliation.
//!
//! Two timestamps are kept apart on purpose. `last_check_time` throttles how
//! often the remote is probed and is written on every probe; `last_sync` is
//! the remote watermark adopted by the last successful reconciliation.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::{epoch_secs, MetadataKey};
use crate::remote::RemoteSource;

/// In-memory state guarded by the sync lock.
#[derive(Debug, Default)]
pub struct SyncState {
    pending_watermark: Option<f64>,
}

impl SyncState {
    /// Watermark staged by the last positive probe, adopted on the next
    /// successful reconciliation.
    pub fn pending_watermark(&self) -> Option<f64> {
        self.pending_watermark
    }

    pub(crate) fn stage(&mut self, watermark: f64) {
        self.pending_watermark = Some(watermark);
    }

    pub(crate) fn take_pending(&mut self) -> Option<f64> {
        self.pending_watermark.take()
    }
}

/// Returns true when the remote holds changes newer than `last_sync`.
///
/// The remote is probed at most once per `ttl`. Remote and parse failures are
/// logged and read as "not stale"; local store failures are returned.
#[instrument(skip_all)]
pub async fn should_sync(
    pool: &Pool,
    remote: &dyn RemoteSource,
    state: &mut SyncState,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now_secs = epoch_secs(now);
    let last_check = db::read_timestamp(pool, MetadataKey::LastCheckTime)
        .await?
        .unwrap_or(0.0);
    if now_secs - last_check < ttl.as_secs_f64() {
        debug!(last_check, "probe window still open");
        return Ok(false);
    }

    // Recorded before probing so callers in the same window do not probe again.
    db::write_timestamp(pool, MetadataKey::LastCheckTime, now_secs).await?;
    let last_sync = db::read_timestamp(pool, MetadataKey::LastSync)
        .await?
        .unwrap_or(0.0);

    let raw = match remote.latest_update().await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(?err, "failed to check remote updates");
            return Ok(false);
        }
    };

    let Some(raw) = raw else {
        // No change log yet: only a replica that never synced needs the bootstrap.
        debug!(last_sync, "remote has no watermark");
        return Ok(last_sync == 0.0);
    };

    let remote_ts = match parse_watermark(&raw) {
        Ok(ts) => ts,
        Err(err) => {
            warn!(?err, raw = %raw, "unparseable remote watermark");
            return Ok(false);
        }
    };

    info!(remote_ts, raw = %raw, last_sync, "remote watermark checked");
    if remote_ts > last_sync {
        state.stage(remote_ts);
        return Ok(true);
    }
    Ok(false)
}

/// Parse a remote `updated_at` into epoch seconds. Accepts SQLite's
/// `YYYY-MM-DD HH:MM:SS[.fff]` (read as UTC), RFC 3339, or bare epoch seconds.
pub fn parse_watermark(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(epoch_secs(naive.and_utc()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(epoch_secs(dt.with_timezone(&Utc)));
    }
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() {
            return Ok(secs);
        }
    }
    Err(anyhow!("unrecognised watermark format: {raw}"))
}
