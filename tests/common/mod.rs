#![allow(dead_code)]

use anyhow::{anyhow, Result};
use cashback_mirror::db::{self, Pool};
use cashback_mirror::model::{Cashback, Partnership, Platform, Store};
use cashback_mirror::remote::RemoteSource;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

pub async fn setup_pool() -> (TempDir, Pool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_pool(&database_url(&dir)).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

pub fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}/cache.db", dir.path().display())
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub stores: Vec<Store>,
    pub platforms: Vec<Platform>,
    pub partnerships: Vec<Partnership>,
    pub cashbacks: Vec<Cashback>,
    pub watermark: Option<String>,
}

/// In-memory remote with call counters, injectable failures and an
/// in-flight gauge spanning each snapshot pull.
#[derive(Default)]
pub struct FakeRemote {
    pub catalog: Mutex<Catalog>,
    pub probes: AtomicUsize,
    pub cashback_pulls: AtomicUsize,
    pub cursors: Mutex<Vec<i64>>,
    pub fail_probe: AtomicBool,
    pub fail_cashbacks: AtomicBool,
    /// Return every cashback regardless of the requested cursor.
    pub ignore_cursor: AtomicBool,
    /// Each probe reports a watermark one second later than the previous.
    pub advance_watermark: AtomicBool,
    pub pull_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    advanced: AtomicUsize,
}

impl FakeRemote {
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            ..Default::default()
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut Catalog)) {
        let mut guard = self.catalog.lock().unwrap();
        f(&mut *guard);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn cashback_pulls(&self) -> usize {
        self.cashback_pulls.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Catalog {
        self.catalog.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteSource for FakeRemote {
    async fn latest_update(&self) -> Result<Option<String>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset by peer"));
        }
        if self.advance_watermark.load(Ordering::SeqCst) {
            let n = self.advanced.fetch_add(1, Ordering::SeqCst);
            return Ok(Some((1_700_000_000 + n as i64).to_string()));
        }
        Ok(self.snapshot().watermark)
    }

    async fn fetch_stores(&self) -> Result<Vec<Store>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.pull_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.snapshot().stores)
    }

    async fn fetch_platforms(&self) -> Result<Vec<Platform>> {
        Ok(self.snapshot().platforms)
    }

    async fn fetch_partnerships(&self) -> Result<Vec<Partnership>> {
        Ok(self.snapshot().partnerships)
    }

    async fn fetch_cashbacks_after(&self, after_id: i64) -> Result<Vec<Cashback>> {
        self.cashback_pulls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().unwrap().push(after_id);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_cashbacks.load(Ordering::SeqCst) {
            return Err(anyhow!("timeout while fetching cashbacks"));
        }
        let ignore = self.ignore_cursor.load(Ordering::SeqCst);
        Ok(self
            .snapshot()
            .cashbacks
            .into_iter()
            .filter(|c| ignore || c.id > after_id)
            .collect())
    }
}

pub fn store(id: i64, name: &str) -> Store {
    Store {
        id,
        name: name.into(),
        url: Some(format!("https://{}.example", name.to_lowercase())),
    }
}

pub fn platform(id: i64, name: &str) -> Platform {
    Platform {
        id,
        name: name.into(),
        url: None,
    }
}

pub fn partnership(id: i64, store_id: i64, platform_id: i64) -> Partnership {
    Partnership {
        id,
        store_id,
        platform_id,
        url: Some(format!("https://go.example/{id}")),
    }
}

pub fn cashback(id: i64, partnership_id: i64, value: f64, start: &str, end: Option<&str>) -> Cashback {
    Cashback {
        id,
        partnership_id,
        value_global: value,
        value_specific: None,
        description: Some(format!("offer {id}")),
        date_start: start.into(),
        date_end: end.map(str::to_string),
    }
}

/// Two stores on two platforms with three partnerships.
pub fn sample_catalog() -> Catalog {
    Catalog {
        stores: vec![store(1, "Amazon"), store(2, "Magalu")],
        platforms: vec![platform(10, "Meliuz"), platform(20, "Inter")],
        partnerships: vec![
            partnership(100, 1, 10),
            partnership(101, 1, 20),
            partnership(102, 2, 10),
        ],
        cashbacks: vec![
            cashback(1, 100, 3.0, "2024-01-01 00:00:00", Some("2024-01-31 23:59:59")),
            cashback(2, 101, 5.0, "2024-01-05 00:00:00", None),
            cashback(3, 102, 8.0, "2024-01-10 00:00:00", Some("2024-02-10 00:00:00")),
        ],
        watermark: Some("2024-02-01 12:00:00".into()),
    }
}

/// Every mirrored row plus `last_sync`, read from one snapshot, for
/// before/after comparisons.
pub async fn dump(pool: &Pool) -> (Vec<String>, Option<String>) {
    let mut tx = pool.begin().await.unwrap();
    let mut rows: Vec<String> = Vec::new();
    for sql in [
        "SELECT 's|' || id || '|' || name || '|' || IFNULL(url, '') FROM stores ORDER BY id",
        "SELECT 'p|' || id || '|' || name || '|' || IFNULL(url, '') FROM platforms ORDER BY id",
        "SELECT 'ps|' || id || '|' || store_id || '|' || platform_id || '|' || IFNULL(url, '') FROM partnerships ORDER BY id",
        "SELECT 'c|' || id || '|' || partnership_id || '|' || value_global || '|' || IFNULL(value_specific, '') || '|' || IFNULL(description, '') || '|' || date_start || '|' || IFNULL(date_end, '') FROM cashbacks ORDER BY id",
    ] {
        let part: Vec<String> = sqlx::query_scalar(sql).fetch_all(&mut *tx).await.unwrap();
        rows.extend(part);
    }
    let last_sync: Option<String> =
        sqlx::query_scalar("SELECT value FROM _metadata WHERE key = 'last_sync'")
            .fetch_optional(&mut *tx)
            .await
            .unwrap();
    tx.rollback().await.unwrap();
    (rows, last_sync)
}
