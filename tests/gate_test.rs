mod common;

use cashback_mirror::db;
use cashback_mirror::gate::{should_sync, SyncState};
use cashback_mirror::model::{epoch_secs, MetadataKey};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::{sample_catalog, setup_pool, Catalog, FakeRemote};
use std::sync::atomic::Ordering;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(1800);

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn two_checks_within_the_ttl_probe_the_remote_once() {
    let (_dir, pool) = setup_pool().await;
    let remote = FakeRemote::with_catalog(sample_catalog());
    let mut state = SyncState::default();

    assert!(should_sync(&pool, &remote, &mut state, TTL, t0()).await.unwrap());
    let later = t0() + ChronoDuration::seconds(1799);
    assert!(!should_sync(&pool, &remote, &mut state, TTL, later).await.unwrap());
    assert_eq!(remote.probes(), 1);

    let after_window = t0() + ChronoDuration::seconds(1800);
    should_sync(&pool, &remote, &mut state, TTL, after_window)
        .await
        .unwrap();
    assert_eq!(remote.probes(), 2);
}

#[tokio::test]
async fn newer_watermark_is_staged_for_adoption() {
    let (_dir, pool) = setup_pool().await;
    let remote = FakeRemote::with_catalog(sample_catalog());
    let mut state = SyncState::default();

    assert!(should_sync(&pool, &remote, &mut state, TTL, t0()).await.unwrap());
    // 2024-02-01 12:00:00 UTC
    assert_eq!(state.pending_watermark(), Some(1_706_788_800.0));
    assert_eq!(
        db::read_timestamp(&pool, MetadataKey::LastCheckTime)
            .await
            .unwrap(),
        Some(epoch_secs(t0()))
    );
}

#[tokio::test]
async fn watermark_not_newer_than_last_sync_is_fresh() {
    let (_dir, pool) = setup_pool().await;
    db::write_timestamp(&pool, MetadataKey::LastSync, 1_706_788_800.0)
        .await
        .unwrap();
    let remote = FakeRemote::with_catalog(sample_catalog());
    let mut state = SyncState::default();

    assert!(!should_sync(&pool, &remote, &mut state, TTL, t0()).await.unwrap());
    assert_eq!(state.pending_watermark(), None);
    assert_eq!(remote.probes(), 1);
}

#[tokio::test]
async fn empty_change_log_only_bootstraps_a_never_synced_replica() {
    let (_dir, pool) = setup_pool().await;
    let remote = FakeRemote::with_catalog(Catalog::default());
    let mut state = SyncState::default();

    assert!(should_sync(&pool, &remote, &mut state, Duration::ZERO, t0())
        .await
        .unwrap());
    assert_eq!(state.pending_watermark(), None);

    db::write_timestamp(&pool, MetadataKey::LastSync, 5.0)
        .await
        .unwrap();
    assert!(!should_sync(&pool, &remote, &mut state, Duration::ZERO, t0())
        .await
        .unwrap());
}

#[tokio::test]
async fn remote_failure_reads_as_fresh_but_still_closes_the_window() {
    let (_dir, pool) = setup_pool().await;
    let remote = FakeRemote::with_catalog(sample_catalog());
    remote.fail_probe.store(true, Ordering::SeqCst);
    let mut state = SyncState::default();

    assert!(!should_sync(&pool, &remote, &mut state, TTL, t0()).await.unwrap());
    assert_eq!(
        db::read_timestamp(&pool, MetadataKey::LastCheckTime)
            .await
            .unwrap(),
        Some(epoch_secs(t0()))
    );

    remote.fail_probe.store(false, Ordering::SeqCst);
    let soon = t0() + ChronoDuration::seconds(60);
    assert!(!should_sync(&pool, &remote, &mut state, TTL, soon).await.unwrap());
    assert_eq!(remote.probes(), 1);
}

#[tokio::test]
async fn unparseable_watermark_reads_as_fresh() {
    let (_dir, pool) = setup_pool().await;
    let mut catalog = sample_catalog();
    catalog.watermark = Some("last tuesday".into());
    let remote = FakeRemote::with_catalog(catalog);
    let mut state = SyncState::default();

    assert!(!should_sync(&pool, &remote, &mut state, TTL, t0()).await.unwrap());
    assert_eq!(state.pending_watermark(), None);
}
