//! Read model over the local store.
//!
//! These queries only read what the last reconciliation committed; they never
//! take the sync lock.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite};
use tracing::instrument;

use super::model::{
    HistoryEntry, HistoryQuery, LatestCashback, Offer, StoreDetail, StoreOffers, SyncStatus,
};
use super::repo::{count_rows, read_timestamp, MirroredTable, Pool};
use crate::model::{from_epoch_secs, MetadataKey, Platform, Store};

#[derive(sqlx::FromRow)]
struct OfferRow {
    store_id: i64,
    store_name: String,
    store_url: Option<String>,
    platform_id: i64,
    platform_name: String,
    value: f64,
    value_specific: Option<f64>,
}

/// Stores with their latest offer per platform, best store first. `search`
/// keeps stores whose name contains it, ignoring case.
#[instrument(skip_all)]
pub async fn list_stores_with_best_offer(
    pool: &Pool,
    search: Option<&str>,
) -> Result<Vec<StoreOffers>> {
    let rows: Vec<OfferRow> = sqlx::query_as(
        "SELECT s.id AS store_id, s.name AS store_name, s.url AS store_url, \
                l.platform_id, l.platform_name, l.global_value AS value, l.max_value AS value_specific \
         FROM vw_latest_cashbacks l \
         JOIN stores s ON s.id = l.store_id",
    )
    .fetch_all(pool)
    .await?;

    let needle = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut by_store: BTreeMap<i64, (String, Option<String>, Vec<Offer>)> = BTreeMap::new();
    for row in rows {
        if let Some(needle) = &needle {
            if !row.store_name.to_lowercase().contains(needle.as_str()) {
                continue;
            }
        }
        let entry = by_store
            .entry(row.store_id)
            .or_insert_with(|| (row.store_name, row.store_url, Vec::new()));
        entry.2.push(Offer {
            platform_id: row.platform_id,
            platform_name: row.platform_name,
            value: row.value,
            value_specific: row.value_specific,
        });
    }

    let mut stores: Vec<StoreOffers> = by_store
        .into_iter()
        .filter_map(|(id, (name, url, mut offers))| {
            offers.sort_by(|a, b| {
                b.value
                    .total_cmp(&a.value)
                    .then_with(|| a.platform_name.cmp(&b.platform_name))
            });
            let best = offers.first()?;
            let max_cashback = best.value;
            let platform_name = best.platform_name.clone();
            Some(StoreOffers {
                id,
                name,
                url,
                offers,
                max_cashback,
                platform_name,
            })
        })
        .collect();

    stores.sort_by(|a, b| {
        b.max_cashback
            .total_cmp(&a.max_cashback)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(stores)
}

/// A store and the most recent cashback of each platform, highest value first.
/// `None` when the store is not mirrored.
#[instrument(skip(pool))]
pub async fn store_detail(pool: &Pool, store_id: i64) -> Result<Option<StoreDetail>> {
    let store: Option<Store> = sqlx::query_as("SELECT id, name, url FROM stores WHERE id = ?")
        .bind(store_id)
        .fetch_optional(pool)
        .await?;
    let Some(store) = store else {
        return Ok(None);
    };

    let rows: Vec<LatestCashback> = sqlx::query_as(
        "SELECT platform_id, platform_name, global_value AS value, max_value AS value_specific, \
                description, date_start, date_end, partnership_url \
         FROM vw_latest_cashbacks \
         WHERE store_id = ? \
         ORDER BY date_start DESC, cashback_id DESC",
    )
    .bind(store_id)
    .fetch_all(pool)
    .await?;

    let mut seen = HashSet::new();
    let mut cashbacks: Vec<LatestCashback> = rows
        .into_iter()
        .filter(|row| seen.insert(row.platform_name.clone()))
        .collect();
    cashbacks.sort_by(|a, b| b.value.total_cmp(&a.value));

    Ok(Some(StoreDetail { store, cashbacks }))
}

#[instrument(skip_all)]
pub async fn platforms(pool: &Pool) -> Result<Vec<Platform>> {
    let rows = sqlx::query_as("SELECT id, name, url FROM platforms ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Every cashback of a store whose validity window overlaps the requested
/// range, oldest first.
#[instrument(skip(pool))]
pub async fn cashback_history(
    pool: &Pool,
    store_id: i64,
    query: &HistoryQuery,
) -> Result<Vec<HistoryEntry>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT cashback_id, platform_id, platform_name, global_value AS value, \
                max_value AS value_specific, description, date_start, date_end \
         FROM vw_cashbacks WHERE store_id = ",
    );
    qb.push_bind(store_id);

    if let Some(start) = query.start {
        qb.push(" AND (date_end IS NULL OR datetime(date_end) >= datetime(")
            .push_bind(format!("{} 00:00:00", start.format("%Y-%m-%d")))
            .push("))");
    }
    if let Some(end) = query.end {
        qb.push(" AND datetime(date_start) <= datetime(")
            .push_bind(format!("{} 23:59:59", end.format("%Y-%m-%d")))
            .push(")");
    }
    if !query.platform_ids.is_empty() {
        qb.push(" AND platform_id IN (");
        let mut ids = qb.separated(", ");
        for id in &query.platform_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
    }
    qb.push(" ORDER BY date_start ASC, cashback_id ASC");

    let rows = qb.build_query_as::<HistoryEntry>().fetch_all(pool).await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn sync_status(pool: &Pool) -> Result<SyncStatus> {
    let last_check = read_timestamp(pool, MetadataKey::LastCheckTime).await?;
    let last_sync = read_timestamp(pool, MetadataKey::LastSync).await?;
    Ok(SyncStatus {
        last_check: last_check.and_then(from_epoch_secs),
        last_sync: last_sync.and_then(from_epoch_secs),
        stores: count_rows(pool, MirroredTable::Stores).await?,
        cashbacks: count_rows(pool, MirroredTable::Cashbacks).await?,
    })
}
