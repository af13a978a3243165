// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::env_config::EnvConfig;
use pf_storage::LeaseStore;

fn recipe() -> EnvConfig {
    EnvConfig::new("x86_64").unwrap()
}

fn other_recipe() -> EnvConfig {
    let mut env = EnvConfig::new("x86_64").unwrap();
    env.set_option(
        "dist",
        crate::env_config::OptValue::Str("el9".to_string()),
    );
    env
}

fn supervisor(dir: &Path) -> Arc<EnvSupervisor> {
    EnvSupervisor::new(dir.to_owned(), ToolKind::Mock).unwrap()
}

/// A pid that is valid for kill(2) but can never exist on Linux
/// (beyond the default pid_max).
const DEAD_PID: u32 = 999_999_999;

#[tokio::test]
async fn acquire_creates_config_and_lease() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());
    let cfg = recipe();

    let lease = sup.environment(&cfg, "Builder-0").await.unwrap();
    let fingerprint = cfg.fingerprint();
    assert_eq!(lease.key(), format!("{fingerprint}.0.cfg"));
    assert_eq!(lease.root, format!("{fingerprint}.0"));
    assert!(lease.config_path.exists());

    // The rendered config names the chroot.
    let rendered = std::fs::read_to_string(&lease.config_path).unwrap();
    assert!(rendered.starts_with(&format!("config_opts[\"root\"] = \"{}\"", lease.root)));

    // The lease is recorded as held by this process.
    let store = LeaseStore::open(dir.path()).unwrap();
    let txn = store.begin().unwrap();
    assert!(!txn.is_free(lease.key()));
    let stats = txn.stats_of(lease.key()).unwrap();
    assert_eq!(stats.use_count, 1);
}

#[tokio::test]
async fn concurrent_acquires_of_one_recipe_get_distinct_environments() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());
    let cfg = recipe();
    let fingerprint = cfg.fingerprint();

    let first = sup.environment(&cfg, "Builder-0").await.unwrap();
    let second = sup.environment(&cfg, "Builder-1").await.unwrap();

    assert_eq!(first.key(), format!("{fingerprint}.0.cfg"));
    assert_eq!(second.key(), format!("{fingerprint}.1.cfg"));
    assert!(first.config_path.exists());
    assert!(second.config_path.exists());

    let store = LeaseStore::open(dir.path()).unwrap();
    let txn = store.begin().unwrap();
    assert!(!txn.is_free(first.key()));
    assert!(!txn.is_free(second.key()));
}

#[tokio::test]
async fn release_frees_the_lease_for_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());
    let cfg = recipe();

    let first = sup.environment(&cfg, "Builder-0").await.unwrap();
    let key = first.key().to_string();
    sup.release(&first).await.unwrap();

    let store = LeaseStore::open(dir.path()).unwrap();
    {
        let txn = store.begin().unwrap();
        assert!(txn.is_free(&key));
    }

    // The freed environment is reused instead of generating a new one.
    let second = sup.environment(&cfg, "Builder-1").await.unwrap();
    assert_eq!(second.key(), key);
    let txn = store.begin().unwrap();
    assert_eq!(txn.stats_of(&key).unwrap().use_count, 2);
}

#[tokio::test]
async fn dead_owner_lease_is_reclaimed_on_acquire() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());
    let cfg = recipe();
    let fingerprint = cfg.fingerprint();
    let key = format!("{fingerprint}.0.cfg");

    // Simulate a worker killed mid-build: config on disk, lock held by a
    // pid that no longer exists.
    std::fs::write(dir.path().join(&key), cfg.render(Some("x"))).unwrap();
    let store = LeaseStore::open(dir.path()).unwrap();
    {
        let mut txn = store.begin().unwrap();
        txn.set_lock(
            &key,
            pf_core::LeaseOwner {
                pid: DEAD_PID,
                thread: "Builder-9".to_string(),
            },
        );
        txn.record_acquire(&key, pf_core::time_fmt::now_ts());
        txn.commit().unwrap();
    }

    // The next acquire reclaims the orphaned lease within one sweep.
    let lease = sup.environment(&cfg, "Builder-0").await.unwrap();
    assert_eq!(lease.key(), key);
    let txn = store.begin().unwrap();
    let holder = txn.lock_of(&key).cloned().flatten().unwrap();
    assert_eq!(holder.pid, std::process::id());
}

#[tokio::test]
async fn idle_environment_is_deleted_by_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());
    let stale = recipe();
    let stale_key = format!("{}.0.cfg", stale.fingerprint());

    // A free environment last used far beyond the idle timeout.
    std::fs::write(dir.path().join(&stale_key), "stale").unwrap();
    let store = LeaseStore::open(dir.path()).unwrap();
    {
        let mut txn = store.begin().unwrap();
        txn.set_lock(&stale_key, pf_core::LeaseOwner::current("Builder-0"));
        txn.clear_lock(&stale_key);
        let ancient = pf_core::time_fmt::now_ts() - DEFAULT_IDLE_TIME.as_secs() as i64 - 60;
        txn.record_acquire(&stale_key, ancient);
        txn.commit().unwrap();
    }

    // Any acquire sweeps; use a different recipe so the stale key stays free.
    let lease = sup.environment(&other_recipe(), "Builder-1").await.unwrap();
    assert_ne!(lease.key(), stale_key);

    assert!(!dir.path().join(&stale_key).exists());
    let txn = store.begin().unwrap();
    assert!(txn.lock_of(&stale_key).is_none());
    assert!(txn.stats_of(&stale_key).is_none());
}

#[tokio::test]
async fn outdated_environment_stats_are_reset_by_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());
    let old = recipe();
    let old_key = format!("{}.0.cfg", old.fingerprint());

    // Recently used, but created before the refresh window.
    std::fs::write(dir.path().join(&old_key), "old").unwrap();
    let store = LeaseStore::open(dir.path()).unwrap();
    {
        let mut txn = store.begin().unwrap();
        txn.set_lock(&old_key, pf_core::LeaseOwner::current("Builder-0"));
        txn.clear_lock(&old_key);
        let created = pf_core::time_fmt::now_ts() - DEFAULT_REFRESH_TIME.as_secs() as i64 - 60;
        txn.record_acquire(&old_key, created);
        txn.touch_usage(&old_key, pf_core::time_fmt::now_ts()).unwrap();
        txn.commit().unwrap();
    }

    let now = pf_core::time_fmt::now_ts();
    sup.environment(&other_recipe(), "Builder-1").await.unwrap();

    let txn = store.begin().unwrap();
    let stats = txn.stats_of(&old_key).unwrap();
    assert!(stats.created_ts >= now);
    assert_eq!(stats.use_count, 0);
    // The config file survives a refresh.
    assert!(dir.path().join(&old_key).exists());
}

#[tokio::test]
async fn missing_stats_aborts_the_operation() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());

    // A lock record without stats: store corruption.
    let store = LeaseStore::open(dir.path()).unwrap();
    {
        let mut txn = store.begin().unwrap();
        txn.set_lock("ghost.0.cfg", pf_core::LeaseOwner {
            pid: DEAD_PID,
            thread: "Builder-9".to_string(),
        });
        txn.commit().unwrap();
    }

    let err = sup.environment(&recipe(), "Builder-0").await.unwrap_err();
    assert!(matches!(
        err,
        EnvSupervisorError::Store(pf_storage::StoreError::MissingStats(_))
    ));
}

#[tokio::test]
async fn site_defaults_are_written_for_the_rpm_toolchain() {
    let dir = tempfile::tempdir().unwrap();
    supervisor(dir.path());
    let content = std::fs::read_to_string(dir.path().join("site-defaults.cfg")).unwrap();
    assert!(content.contains("%__pesign_cert"));
    assert!(content.contains("bind_mount_enable"));
}

#[tokio::test]
async fn deb_supervisor_skips_rpm_site_defaults() {
    let dir = tempfile::tempdir().unwrap();
    EnvSupervisor::new(dir.path().to_owned(), ToolKind::Pbuilder).unwrap();
    assert!(!dir.path().join("site-defaults.cfg").exists());
}

#[test]
fn pid_alive_detects_this_process_and_rejects_impossible_pids() {
    assert!(pid_alive(std::process::id()));
    assert!(!pid_alive(DEAD_PID));
    assert!(!pid_alive(u32::MAX));
}
