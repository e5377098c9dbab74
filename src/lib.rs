//! Read-optimised local replica of a remote cashback catalog.
//!
//! A background worker and on-demand callers share one [`sync::SyncCoordinator`]
//! that probes the remote change log, pulls deltas and applies them to SQLite
//! in a single transaction. Queries in [`db::catalog`] read whatever was last
//! committed.

pub mod config;
pub mod db;
pub mod gate;
pub mod mirror;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod sync;

pub use mirror::Mirror;
pub use sync::{SyncCoordinator, SyncOutcome, SyncSettings, SyncWorker};
