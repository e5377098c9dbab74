use crate::model::{MetadataKey, ReconcileReport, RemoteSnapshot};
use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteExecutor, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL lets readers keep serving the last commit while a reconciliation writes.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid sqlite url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("failed to open local store")?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Read an epoch-seconds value from `_metadata`. Unparseable values read as absent.
pub async fn read_timestamp<'e, E>(exec: E, key: MetadataKey) -> Result<Option<f64>>
where
    E: SqliteExecutor<'e>,
{
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM _metadata WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(exec)
            .await
            .with_context(|| format!("failed to read {}", key.as_str()))?;
    Ok(value
        .flatten()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite()))
}

pub async fn write_timestamp<'e, E>(exec: E, key: MetadataKey, value: f64) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO _metadata (key, value) VALUES (?, ?) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
    )
    .bind(key.as_str())
    .bind(value.to_string())
    .execute(exec)
    .await
    .with_context(|| format!("failed to write {}", key.as_str()))?;
    Ok(())
}

/// Highest mirrored cashback id, 0 when the table is empty.
pub async fn max_cashback_id<'e, E>(exec: E) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM cashbacks")
        .fetch_one(exec)
        .await?;
    Ok(max.unwrap_or(0))
}

pub async fn count_rows<'e, E>(exec: E, table: MirroredTable) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(exec).await?;
    Ok(count)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirroredTable {
    Stores,
    Platforms,
    Partnerships,
    Cashbacks,
}

impl MirroredTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirroredTable::Stores => "stores",
            MirroredTable::Platforms => "platforms",
            MirroredTable::Partnerships => "partnerships",
            MirroredTable::Cashbacks => "cashbacks",
        }
    }
}

/// Apply a pulled snapshot in one transaction: replace the dimension tables,
/// drop cashbacks orphaned by that replace, append new cashbacks and adopt
/// `watermark` as `last_sync` (never moving it backwards).
///
/// Any error drops the transaction, which rolls it back.
#[instrument(skip_all, fields(stores = snapshot.stores.len(), cashbacks = snapshot.cashbacks.len()))]
pub async fn apply_snapshot(
    pool: &Pool,
    snapshot: &RemoteSnapshot,
    watermark: f64,
) -> Result<ReconcileReport> {
    let mut tx = pool.begin().await?;

    replace_dimensions_tx(&mut tx, snapshot).await?;

    let pruned = sqlx::query(
        "DELETE FROM cashbacks WHERE partnership_id NOT IN (SELECT id FROM partnerships)",
    )
    .execute(&mut *tx)
    .await
    .context("failed to prune orphaned cashbacks")?
    .rows_affected();
    if pruned > 0 {
        debug!(pruned, "pruned cashbacks of removed partnerships");
    }

    for c in &snapshot.cashbacks {
        sqlx::query(
            "INSERT INTO cashbacks (id, partnership_id, value_global, value_specific, description, date_start, date_end) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(c.id)
        .bind(c.partnership_id)
        .bind(c.value_global)
        .bind(c.value_specific)
        .bind(c.description.as_deref())
        .bind(&c.date_start)
        .bind(c.date_end.as_deref())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert cashback {}", c.id))?;
    }

    let previous = read_timestamp(&mut *tx, MetadataKey::LastSync)
        .await?
        .unwrap_or(0.0);
    let last_sync = previous.max(watermark);
    write_timestamp(&mut *tx, MetadataKey::LastSync, last_sync).await?;

    // Deferred foreign keys are checked here.
    tx.commit()
        .await
        .context("failed to commit reconciliation")?;

    Ok(ReconcileReport {
        stores: snapshot.stores.len(),
        platforms: snapshot.platforms.len(),
        partnerships: snapshot.partnerships.len(),
        new_cashbacks: snapshot.cashbacks.len(),
        pruned_cashbacks: pruned,
        last_sync,
    })
}

async fn replace_dimensions_tx(
    tx: &mut Transaction<'_, Sqlite>,
    snapshot: &RemoteSnapshot,
) -> Result<()> {
    // Dependents first.
    for table in [
        MirroredTable::Partnerships,
        MirroredTable::Platforms,
        MirroredTable::Stores,
    ] {
        sqlx::query(&format!("DELETE FROM {}", table.as_str()))
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to clear {}", table.as_str()))?;
    }

    for s in &snapshot.stores {
        sqlx::query("INSERT INTO stores (id, name, url) VALUES (?, ?, ?)")
            .bind(s.id)
            .bind(&s.name)
            .bind(s.url.as_deref())
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to insert store {}", s.id))?;
    }
    for p in &snapshot.platforms {
        sqlx::query("INSERT INTO platforms (id, name, url) VALUES (?, ?, ?)")
            .bind(p.id)
            .bind(&p.name)
            .bind(p.url.as_deref())
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to insert platform {}", p.id))?;
    }
    for p in &snapshot.partnerships {
        sqlx::query("INSERT INTO partnerships (id, store_id, platform_id, url) VALUES (?, ?, ?, ?)")
            .bind(p.id)
            .bind(p.store_id)
            .bind(p.platform_id)
            .bind(p.url.as_deref())
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to insert partnership {}", p.id))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cashback, Partnership, Platform, Store};

    async fn setup_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/cache.db", dir.path().display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    fn snapshot() -> RemoteSnapshot {
        RemoteSnapshot {
            stores: vec![Store {
                id: 1,
                name: "Loja".into(),
                url: None,
            }],
            platforms: vec![Platform {
                id: 7,
                name: "Meliuz".into(),
                url: Some("https://meliuz.example".into()),
            }],
            partnerships: vec![Partnership {
                id: 3,
                store_id: 1,
                platform_id: 7,
                url: None,
            }],
            cashbacks: vec![Cashback {
                id: 10,
                partnership_id: 3,
                value_global: 4.0,
                value_specific: Some(8.0),
                description: None,
                date_start: "2024-01-01 00:00:00".into(),
                date_end: None,
            }],
        }
    }

    #[test]
    fn prepare_sqlite_url_keeps_memory_and_other_schemes() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/cache.db");
        let url = prepare_sqlite_url(&format!("sqlite:{}?mode=rwc", nested.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", nested.display()));
        assert!(nested.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn timestamps_default_to_absent_and_round_trip() {
        let (_dir, pool) = setup_pool().await;
        assert_eq!(
            read_timestamp(&pool, MetadataKey::LastSync).await.unwrap(),
            None
        );
        write_timestamp(&pool, MetadataKey::LastSync, 1_700_000_000.5)
            .await
            .unwrap();
        assert_eq!(
            read_timestamp(&pool, MetadataKey::LastSync).await.unwrap(),
            Some(1_700_000_000.5)
        );
        assert_eq!(
            read_timestamp(&pool, MetadataKey::LastCheckTime)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn apply_snapshot_never_moves_last_sync_backwards() {
        let (_dir, pool) = setup_pool().await;
        let report = apply_snapshot(&pool, &snapshot(), 200.0).await.unwrap();
        assert_eq!(report.last_sync, 200.0);
        assert_eq!(max_cashback_id(&pool).await.unwrap(), 10);

        let mut again = snapshot();
        again.cashbacks.clear();
        let report = apply_snapshot(&pool, &again, 150.0).await.unwrap();
        assert_eq!(report.last_sync, 200.0);
        assert_eq!(
            read_timestamp(&pool, MetadataKey::LastSync).await.unwrap(),
            Some(200.0)
        );
        assert_eq!(count_rows(&pool, MirroredTable::Cashbacks).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dangling_cashback_fails_the_commit() {
        let (_dir, pool) = setup_pool().await;
        let mut bad = snapshot();
        bad.cashbacks[0].partnership_id = 999;
        assert!(apply_snapshot(&pool, &bad, 1.0).await.is_err());
        assert_eq!(count_rows(&pool, MirroredTable::Stores).await.unwrap(), 0);
        assert_eq!(
            read_timestamp(&pool, MetadataKey::LastSync).await.unwrap(),
            None
        );
    }
}
