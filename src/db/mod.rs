//! Local store: schema, sync bookkeeping and the read model.
//!
//! This module is split into three submodules:
//! - `repo`: pool setup, `_metadata` access and the reconciliation transaction.
//! - `catalog`: read-only ranked/deduplicated queries.
//! - `model`: view models returned by `catalog`.
//!
//! External modules should import from `cashback_mirror::db`.

pub mod catalog;
pub mod model;
pub mod repo;

pub use catalog::*;
pub use repo::*;

pub use model::{
    HistoryEntry, HistoryQuery, LatestCashback, Offer, StoreDetail, StoreOffers, SyncStatus,
};
