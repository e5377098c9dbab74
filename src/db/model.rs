//! View models returned by the read-model queries.
//!
//! Keep these structs focused on the data returned by queries. Ranking and
//! grouping live in `catalog`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::model::Store;

/// Best current offer of one platform for a store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub platform_id: i64,
    pub platform_name: String,
    pub value: f64,
    pub value_specific: Option<f64>,
}

/// A store with its latest offer per platform, best offer first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreOffers {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub offers: Vec<Offer>,
    pub max_cashback: f64,
    /// Platform carrying `max_cashback`.
    pub platform_name: String,
}

/// Latest cashback of one platform, as shown on the store page.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LatestCashback {
    pub platform_id: i64,
    pub platform_name: String,
    pub value: f64,
    pub value_specific: Option<f64>,
    pub description: Option<String>,
    pub date_start: String,
    pub date_end: Option<String>,
    pub partnership_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreDetail {
    pub store: Store,
    pub cashbacks: Vec<LatestCashback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub cashback_id: i64,
    pub platform_id: i64,
    pub platform_name: String,
    pub value: f64,
    pub value_specific: Option<f64>,
    pub description: Option<String>,
    pub date_start: String,
    pub date_end: Option<String>,
}

/// Filters for a store's cashback history. Dates are whole days: `start`
/// counts from 00:00:00 and `end` runs through 23:59:59. An empty
/// `platform_ids` means every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub platform_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub last_check: Option<DateTime<Utc>>,
    pub last_sync: Option<DateTime<Utc>>,
    pub stores: i64,
    pub cashbacks: i64,
}
