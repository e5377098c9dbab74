//! Process-wide replica: explicit open (pool, schema), optional background
//! sync, read queries, and explicit shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::db::{
    self, HistoryEntry, HistoryQuery, Pool, StoreDetail, StoreOffers, SyncStatus,
};
use crate::model::Platform;
use crate::remote::RemoteSource;
use crate::sync::{SyncCoordinator, SyncOutcome, SyncSettings, SyncWorker};

pub struct Mirror {
    pool: Pool,
    coordinator: Arc<SyncCoordinator>,
    worker: Option<SyncWorker>,
}

impl Mirror {
    /// Open (or create) the local store and bring its schema up to date.
    pub async fn open(
        database_url: &str,
        remote: Arc<dyn RemoteSource>,
        settings: SyncSettings,
    ) -> Result<Self> {
        let pool = db::init_pool(database_url).await?;
        db::run_migrations(&pool).await?;
        info!(database_url, "local store ready");
        let coordinator = Arc::new(SyncCoordinator::new(pool.clone(), remote, settings));
        Ok(Self {
            pool,
            coordinator,
            worker: None,
        })
    }

    /// Start the background sync loop. No-op if already running.
    pub fn start_background(&mut self) {
        if self.worker.is_none() {
            self.worker = Some(SyncWorker::spawn(self.coordinator.clone()));
        }
    }

    pub async fn try_sync_if_stale(&self) -> Result<SyncOutcome> {
        self.coordinator.try_sync_if_stale().await
    }

    /// Forced sync, bypassing the probe window.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        self.coordinator.sync().await
    }

    pub async fn list_stores_with_best_offer(
        &self,
        search: Option<&str>,
    ) -> Result<Vec<StoreOffers>> {
        db::list_stores_with_best_offer(&self.pool, search).await
    }

    pub async fn store_detail(&self, store_id: i64) -> Result<Option<StoreDetail>> {
        db::store_detail(&self.pool, store_id).await
    }

    pub async fn platforms(&self) -> Result<Vec<Platform>> {
        db::platforms(&self.pool).await
    }

    pub async fn cashback_history(
        &self,
        store_id: i64,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryEntry>> {
        db::cashback_history(&self.pool, store_id, query).await
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        db::sync_status(&self.pool).await
    }

    /// Stop the background loop (waiting for an in-flight attempt) and close the store.
    pub async fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        self.pool.close().await;
        info!("local store closed");
    }
}
