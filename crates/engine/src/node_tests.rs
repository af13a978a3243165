// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pf_core::Overrides;

fn config_in(dir: &Path, threads: usize) -> NodeConfig {
    std::fs::write(dir.join("node_credentials"), "jwt_token = t\n").unwrap();
    NodeConfig::load(
        None,
        Overrides {
            working_dir: Some(dir.to_owned()),
            threads_count: Some(threads),
            master_url: Some("http://127.0.0.1:1".to_string()),
            ..Overrides::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn init_working_dir_wipes_builder_directories_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 2);

    std::fs::create_dir_all(dir.path().join("builder-0/421/artifacts")).unwrap();
    std::fs::create_dir_all(dir.path().join("builder-1")).unwrap();
    std::fs::create_dir_all(dir.path().join("mock_configs")).unwrap();
    std::fs::write(dir.path().join("mock_configs/supervisor.json"), "{}").unwrap();

    init_working_dir(&config).await.unwrap();

    assert!(!dir.path().join("builder-0").exists());
    assert!(!dir.path().join("builder-1").exists());
    // The environment cache survives node restarts.
    assert!(dir.path().join("mock_configs/supervisor.json").exists());
}

#[tokio::test]
async fn init_working_dir_creates_a_missing_tree() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("node");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("node_credentials"), "jwt_token = t\n").unwrap();
    let mut config = config_in(&target, 1);
    config.working_dir = dir.path().join("fresh/working");

    init_working_dir(&config).await.unwrap();
    assert!(config.working_dir.is_dir());
}

#[tokio::test]
async fn a_signalled_node_drains_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 2);

    // Both flags already set: workers exit without acquiring work, the
    // monitor joins them on its first tick.
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let code = tokio::time::timeout(
        Duration::from_secs(30),
        run_with_shutdown(config, shutdown),
    )
    .await
    .expect("node did not drain in time");
    assert_eq!(code, 0);
}
