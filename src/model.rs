use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keys of the `_metadata` table used for sync bookkeeping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetadataKey {
    /// Wall clock of the most recent staleness probe.
    LastCheckTime,
    /// Remote watermark adopted by the most recent reconciliation.
    LastSync,
}

impl MetadataKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKey::LastCheckTime => "last_check_time",
            MetadataKey::LastSync => "last_sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Store {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
}

/// "Store X offers cashback via platform Y".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Partnership {
    pub id: i64,
    pub store_id: i64,
    pub platform_id: i64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cashback {
    pub id: i64,
    pub partnership_id: i64,
    pub value_global: f64,
    pub value_specific: Option<f64>,
    pub description: Option<String>,
    pub date_start: String,
    pub date_end: Option<String>,
}

/// Rows pulled from the remote for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub stores: Vec<Store>,
    pub platforms: Vec<Platform>,
    pub partnerships: Vec<Partnership>,
    /// Only rows above the local cashback cursor.
    pub cashbacks: Vec<Cashback>,
}

/// What a committed reconciliation wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub stores: usize,
    pub platforms: usize,
    pub partnerships: usize,
    pub new_cashbacks: usize,
    pub pruned_cashbacks: u64,
    /// `last_sync` after commit, epoch seconds.
    pub last_sync: f64,
}

/// Epoch seconds with millisecond precision, the unit stored in `_metadata`.
pub fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

pub fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis((secs * 1000.0).round() as i64)
}
