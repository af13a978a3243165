// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;

fn write_credentials(dir: &Path, token: &str) -> PathBuf {
    let path = dir.join("node_credentials");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "some_other_key = abc").unwrap();
    writeln!(file, "jwt_token = {token}").unwrap();
    path
}

#[test]
fn load_merges_file_and_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let creds = write_credentials(dir.path(), "tok-123");
    let config_path = dir.path().join("node.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
master_url = "http://file-master:8080"
node_id = "file-node"
threads_count = 2
credentials_file = "{}"
"#,
            creds.display()
        ),
    )
    .unwrap();

    let overrides = Overrides {
        master_url: Some("http://cli-master:8080".to_string()),
        threads_count: Some(8),
        ..Overrides::default()
    };
    let config = NodeConfig::load(Some(&config_path), overrides).unwrap();

    // CLI wins over the file, the file wins over defaults.
    assert_eq!(config.master_url, "http://cli-master:8080");
    assert_eq!(config.threads_count, 8);
    assert_eq!(config.node_id, "file-node");
    assert_eq!(config.jwt_token, "tok-123");
}

#[test]
fn zero_threads_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    write_credentials(dir.path(), "t");
    let overrides = Overrides {
        threads_count: Some(0),
        working_dir: Some(dir.path().to_owned()),
        ..Overrides::default()
    };
    let err = NodeConfig::load(None, overrides).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidThreads));
}

#[test]
fn missing_token_line_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("node_credentials"), "nothing here\n").unwrap();
    let overrides = Overrides {
        working_dir: Some(dir.path().to_owned()),
        ..Overrides::default()
    };
    let err = NodeConfig::load(None, overrides).unwrap_err();
    assert!(matches!(err, ConfigError::TokenNotFound(_)));
}

#[test]
fn missing_credentials_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let overrides = Overrides {
        working_dir: Some(dir.path().join("absent")),
        ..Overrides::default()
    };
    let err = NodeConfig::load(None, overrides).unwrap_err();
    assert!(matches!(err, ConfigError::Credentials { .. }));
}

#[yare::parameterized(
    x86_64  = { "x86_64", &["x86_64", "i686"] },
    aarch64 = { "aarch64", &["aarch64"] },
    ppc64le = { "ppc64le", &["ppc64le"] },
)]
fn supported_arches_for_base(base: &str, expected: &[&str]) {
    let dir = tempfile::tempdir().unwrap();
    write_credentials(dir.path(), "t");
    let config_path = dir.path().join("node.toml");
    std::fs::write(
        &config_path,
        format!(
            "base_arch = \"{base}\"\nworking_dir = \"{}\"\n",
            dir.path().display()
        ),
    )
    .unwrap();
    let config = NodeConfig::load(Some(&config_path), Overrides::default()).unwrap();
    assert_eq!(config.supported_arches(), expected);
}

#[test]
fn derived_paths_hang_off_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_credentials(dir.path(), "t");
    let overrides = Overrides {
        working_dir: Some(dir.path().to_owned()),
        ..Overrides::default()
    };
    let config = NodeConfig::load(None, overrides).unwrap();
    assert_eq!(config.env_configs_dir(), dir.path().join("mock_configs"));
    assert_eq!(config.deb_env_configs_dir(), dir.path().join("pbuilder_envs"));
    assert_eq!(config.worker_dir(3), dir.path().join("builder-3"));
}

#[test]
fn debug_does_not_leak_the_token() {
    let dir = tempfile::tempdir().unwrap();
    write_credentials(dir.path(), "secret-token-value");
    let overrides = Overrides {
        working_dir: Some(dir.path().to_owned()),
        ..Overrides::default()
    };
    let config = NodeConfig::load(None, overrides).unwrap();
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("secret-token-value"));
}
