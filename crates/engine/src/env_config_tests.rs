// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pf_core::test_support::sample_task;
use pf_core::{NodeConfig, Overrides};

fn node_config(dir: &std::path::Path, pesign: bool, npm_proxy: Option<&str>) -> NodeConfig {
    std::fs::write(dir.join("node_credentials"), "jwt_token = t\n").unwrap();
    let config_path = dir.join("node.toml");
    let mut raw = format!("working_dir = \"{}\"\n", dir.display());
    raw.push_str(&format!("pesign_support = {pesign}\n"));
    if let Some(proxy) = npm_proxy {
        raw.push_str(&format!("npm_proxy = \"{proxy}\"\n"));
    }
    std::fs::write(&config_path, raw).unwrap();
    NodeConfig::load(Some(&config_path), Overrides::default()).unwrap()
}

#[test]
fn renders_sorted_options_and_repos() {
    let mut env = EnvConfig::new("x86_64").unwrap();
    env.set_option("dist", OptValue::Str("el8".to_string()));
    env.add_repo(RepoConfig {
        name: "base".to_string(),
        baseurl: "http://repo/base".to_string(),
        priority: 10,
        enabled: true,
    })
    .unwrap();

    let rendered = env.render(None);
    assert!(rendered.contains("config_opts[\"target_arch\"] = \"x86_64\""));
    assert!(rendered.contains("config_opts[\"legal_host_arches\"] = [\"x86_64\"]"));
    assert!(rendered.contains("config_opts[\"dist\"] = \"el8\""));
    assert!(rendered.contains("config_opts[\"yum.conf\"] = \"\"\"\n"));
    assert!(rendered.contains("[base]\n"));
    assert!(rendered.contains("baseurl = http://repo/base\n"));
    assert!(rendered.contains("enabled = 1\n"));
    // Options render in sorted key order.
    let chroot_pos = rendered.find("chroot_setup_cmd").unwrap();
    let target_pos = rendered.find("target_arch").unwrap();
    assert!(chroot_pos < target_pos);
}

#[test]
fn fingerprint_ignores_input_permutations() {
    let build = |first_repo: &str, second_repo: &str| {
        let mut env = EnvConfig::new("x86_64").unwrap();
        env.set_option("releasever", OptValue::Str("8".to_string()));
        for name in [first_repo, second_repo] {
            env.add_repo(RepoConfig {
                name: name.to_string(),
                baseurl: format!("http://repo/{name}"),
                priority: 10,
                enabled: true,
            })
            .unwrap();
        }
        env
    };

    let forward = build("base", "updates");
    let backward = build("updates", "base");
    assert_eq!(forward.fingerprint(), backward.fingerprint());
}

#[test]
fn fingerprint_tracks_content_changes() {
    let mut a = EnvConfig::new("x86_64").unwrap();
    let mut b = EnvConfig::new("x86_64").unwrap();
    assert_eq!(a.fingerprint(), b.fingerprint());

    b.set_option("dist", OptValue::Str("el9".to_string()));
    assert_ne!(a.fingerprint(), b.fingerprint());

    a.set_option("dist", OptValue::Str("el9".to_string()));
    assert_eq!(a.fingerprint(), b.fingerprint());

    b.add_file("/usr/etc/npmrc", "proxy=x").unwrap();
    assert_ne!(a.fingerprint(), b.fingerprint());
}

#[test]
fn fingerprint_excludes_the_chroot_name() {
    let env = EnvConfig::new("x86_64").unwrap();
    let fingerprint = env.fingerprint();
    let named = env.render(Some("abc.0"));
    assert!(named.starts_with("config_opts[\"root\"] = \"abc.0\""));
    // The fingerprint hashes the unnamed rendering.
    let digest = sha2::Sha256::digest(env.render(None).as_bytes());
    assert_eq!(fingerprint, format!("{digest:x}"));
}

#[test]
fn duplicate_additions_are_rejected() {
    let mut env = EnvConfig::new("x86_64").unwrap();
    env.add_file("/etc/a", "x").unwrap();
    assert!(matches!(
        env.add_file("/etc/a", "y"),
        Err(EnvConfigError::DuplicateFile(_))
    ));

    env.add_bind_mounts(vec![]).unwrap();
    assert!(matches!(
        env.add_bind_mounts(vec![]),
        Err(EnvConfigError::DuplicatePlugin(_))
    ));

    env.add_repo(RepoConfig {
        name: "base".to_string(),
        baseurl: "u".to_string(),
        priority: 1,
        enabled: true,
    })
    .unwrap();
    assert!(matches!(
        env.add_repo(RepoConfig {
            name: "base".to_string(),
            baseurl: "u2".to_string(),
            priority: 1,
            enabled: true,
        }),
        Err(EnvConfigError::DuplicateRepo(_))
    ));
}

#[yare::parameterized(
    x86_64 = { "x86_64", &["x86_64"] },
    i686   = { "i686", &["i386", "i586", "i686", "x86_64"] },
    arm64  = { "aarch64", &["aarch64"] },
)]
fn legal_host_arches_defaults(target: &str, expected: &[&str]) {
    assert_eq!(default_legal_host_arches(target).unwrap(), expected);
}

#[test]
fn unknown_arch_is_rejected() {
    assert!(matches!(
        default_legal_host_arches("vax"),
        Err(EnvConfigError::UnknownArch(_))
    ));
}

#[test]
fn from_task_carries_platform_hints() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), false, None);
    let mut task = sample_task(1);
    task.platform.data = serde_json::json!({
        "mock_dist": "el8",
        "mock": {"package_manager": "dnf", "releasever": 8},
        "yum": {"module_platform_id": "platform:el8"}
    })
    .as_object()
    .unwrap()
    .clone();

    let env = EnvConfig::from_task(&config, &task).unwrap();
    let rendered = env.render(None);
    assert!(rendered.contains("config_opts[\"dist\"] = \"el8\""));
    assert!(rendered.contains("config_opts[\"package_manager\"] = \"dnf\""));
    assert!(rendered.contains("config_opts[\"releasever\"] = 8"));
    assert!(rendered.contains("module_platform_id = platform:el8"));
    assert!(rendered.contains("config_opts[\"rpmbuild_networking\"] = True"));
    assert!(rendered.contains("[base]\n"));
}

#[test]
fn from_task_mock_target_arch_override_wins() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), false, None);
    let mut task = sample_task(1);
    task.arch = "i686".to_string();
    task.platform.data = serde_json::json!({"mock": {"target_arch": "i586"}})
        .as_object()
        .unwrap()
        .clone();

    let env = EnvConfig::from_task(&config, &task).unwrap();
    assert!(env.render(None).contains("config_opts[\"target_arch\"] = \"i586\""));
}

#[test]
fn from_task_renders_secure_boot_bind_mounts() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), true, None);
    let task = sample_task(1);

    let env = EnvConfig::from_task(&config, &task).unwrap();
    let rendered = env.render(None);
    assert!(rendered.contains("config_opts[\"plugin_conf\"][\"bind_mount_enable\"] = True"));
    assert!(rendered.contains("(\"/var/run/pesign\", \"/var/run/pesign\")"));
    assert!(rendered.contains("(\"/etc/pki/kmod\", \"/etc/pki/kmod\")"));
}

#[test]
fn from_task_injects_npm_proxy_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), false, Some("http://127.0.0.1:8090/"));
    let task = sample_task(1);

    let env = EnvConfig::from_task(&config, &task).unwrap();
    let rendered = env.render(None);
    assert!(rendered.contains("config_opts[\"files\"][\"/usr/etc/npmrc\"]"));
    assert!(rendered.contains("config_opts[\"files\"][\"/usr/etc/yarnrc\"]"));
    assert!(rendered.contains("https-proxy=http://127.0.0.1:8090/"));
}

#[test]
fn from_task_custom_logs_enable_chroot_scan() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), false, None);
    let mut task = sample_task(1);
    task.platform.data = serde_json::json!({"custom_logs": ["config\\.log"]})
        .as_object()
        .unwrap()
        .clone();

    let env = EnvConfig::from_task(&config, &task).unwrap();
    let rendered = env.render(None);
    assert!(rendered.contains("config_opts[\"plugin_conf\"][\"chroot_scan_enable\"] = True"));
    assert!(rendered.contains("\"regexes\": [\"config\\\\.log\"]"));
}
