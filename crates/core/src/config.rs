// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build node configuration: TOML file merged with command-line overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Default number of concurrent builder workers.
pub const DEFAULT_THREADS: usize = 4;

/// Default node working directory.
pub const DEFAULT_WORKING_DIR: &str = "/srv/packforge/node";

/// Default content-store chunk size (100 MB).
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Default master request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

static JWT_TOKEN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*jwt_token\s*=\s*(\S+)\s*$").expect("constant regex pattern is valid")
});

/// Configuration errors. Surfaced at startup; the daemon exits with code 2
/// and never enters the main loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot read credentials file {path}: {source}")]
    Credentials {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("jwt_token is not found in {0}")]
    TokenNotFound(PathBuf),

    #[error("threads count must be at least 1")]
    InvalidThreads,
}

/// Raw TOML configuration file model. Every field is optional; defaults are
/// applied when assembling [`NodeConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    master_url: Option<String>,
    node_id: Option<String>,
    threads_count: Option<usize>,
    working_dir: Option<PathBuf>,
    request_timeout: Option<u64>,
    base_arch: Option<String>,
    pesign_support: Option<bool>,
    npm_proxy: Option<String>,
    sentry_dsn: Option<String>,
    store_url: Option<String>,
    store_username: Option<String>,
    store_password: Option<String>,
    store_chunk_size: Option<u64>,
    git_repos_cache_dir: Option<PathBuf>,
    git_cache_locks_dir: Option<PathBuf>,
    sources_blob_url: Option<String>,
    credentials_file: Option<PathBuf>,
}

/// Command-line overrides applied on top of the configuration file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub node_id: Option<String>,
    pub master_url: Option<String>,
    pub threads_count: Option<usize>,
    pub working_dir: Option<PathBuf>,
}

/// Process-wide node configuration, immutable after load.
#[derive(Clone)]
pub struct NodeConfig {
    /// Master base URL, e.g. `http://master.example.org:8080`.
    pub master_url: String,
    /// Unique identifier of this node.
    pub node_id: String,
    /// Number of concurrent builder workers.
    pub threads_count: usize,
    /// Working directory for per-worker task trees and environment caches.
    pub working_dir: PathBuf,
    /// Timeout applied to every master request.
    pub request_timeout: Duration,
    /// Base architecture of this node (e.g. `x86_64`).
    pub base_arch: String,
    /// Render secure-boot bind mounts into build environments.
    pub pesign_support: bool,
    /// NPM/Yarn proxy injected into build environments when set.
    pub npm_proxy: Option<String>,
    /// Optional error-reporting endpoint.
    pub sentry_dsn: Option<String>,
    /// Content store base URL.
    pub store_url: String,
    /// Content store credentials.
    pub store_username: String,
    pub store_password: String,
    /// Upload chunk size in bytes.
    pub store_chunk_size: u64,
    /// Shared bare-mirror cache for git checkouts.
    pub git_repos_cache_dir: PathBuf,
    /// Per-URL lock files guarding the mirror cache.
    pub git_cache_locks_dir: PathBuf,
    /// Content-addressed blob store for sidecar source downloads.
    pub sources_blob_url: String,
    /// File holding the `jwt_token = <value>` line.
    pub credentials_file: PathBuf,
    /// Bearer token extracted from the credentials file at startup.
    pub jwt_token: String,
}

impl NodeConfig {
    /// Load configuration from an optional TOML file with CLI overrides.
    ///
    /// The JWT token is extracted from the credentials file eagerly so that
    /// bad credentials surface before the main loop starts.
    pub fn load(config_file: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_owned(),
                    source,
                })?;
                toml::from_str::<ConfigFile>(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_owned(),
                    source,
                })?
            }
            None => ConfigFile::default(),
        };

        let threads_count = overrides
            .threads_count
            .or(file.threads_count)
            .unwrap_or(DEFAULT_THREADS);
        if threads_count == 0 {
            return Err(ConfigError::InvalidThreads);
        }

        let working_dir = overrides
            .working_dir
            .or(file.working_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKING_DIR));

        let credentials_file = file
            .credentials_file
            .unwrap_or_else(|| working_dir.join("node_credentials"));
        let jwt_token = extract_jwt_token(&credentials_file)?;

        Ok(Self {
            master_url: overrides
                .master_url
                .or(file.master_url)
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_string()),
            node_id: overrides
                .node_id
                .or(file.node_id)
                .unwrap_or_else(default_node_id),
            threads_count,
            request_timeout: Duration::from_secs(
                file.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            base_arch: file
                .base_arch
                .unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            pesign_support: file.pesign_support.unwrap_or(false),
            npm_proxy: file.npm_proxy.filter(|p| !p.is_empty()),
            sentry_dsn: file.sentry_dsn.filter(|d| !d.is_empty()),
            store_url: file
                .store_url
                .unwrap_or_else(|| "http://127.0.0.1:8081".to_string()),
            store_username: file.store_username.unwrap_or_default(),
            store_password: file.store_password.unwrap_or_default(),
            store_chunk_size: file.store_chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            git_repos_cache_dir: file
                .git_repos_cache_dir
                .unwrap_or_else(|| working_dir.join("git_repos_cache")),
            git_cache_locks_dir: file
                .git_cache_locks_dir
                .unwrap_or_else(|| working_dir.join("git_repos_cache/locks")),
            sources_blob_url: file
                .sources_blob_url
                .unwrap_or_else(|| "https://sources.packforge.org/".to_string()),
            credentials_file,
            jwt_token,
            working_dir,
        })
    }

    /// Architectures this node can build for. x86_64 nodes also accept
    /// 32-bit i686 tasks.
    pub fn supported_arches(&self) -> Vec<String> {
        let mut arches = vec![self.base_arch.clone()];
        if self.base_arch == "x86_64" {
            arches.push("i686".to_string());
        }
        arches
    }

    /// RPM environment configuration cache directory.
    pub fn env_configs_dir(&self) -> PathBuf {
        self.working_dir.join("mock_configs")
    }

    /// Debian environment configuration cache directory.
    pub fn deb_env_configs_dir(&self) -> PathBuf {
        self.working_dir.join("pbuilder_envs")
    }

    /// Working directory of one builder slot.
    pub fn worker_dir(&self, slot: usize) -> PathBuf {
        self.working_dir.join(format!("builder-{slot}"))
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The token and store password never go to logs.
        f.debug_struct("NodeConfig")
            .field("master_url", &self.master_url)
            .field("node_id", &self.node_id)
            .field("threads_count", &self.threads_count)
            .field("working_dir", &self.working_dir)
            .field("base_arch", &self.base_arch)
            .field("store_url", &self.store_url)
            .finish_non_exhaustive()
    }
}

/// Extract the `jwt_token = <value>` line from a credentials file.
fn extract_jwt_token(path: &Path) -> Result<String, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Credentials {
        path: path.to_owned(),
        source,
    })?;
    for line in raw.lines() {
        if let Some(caps) = JWT_TOKEN_LINE.captures(line) {
            return Ok(caps[1].to_string());
        }
    }
    Err(ConfigError::TokenNotFound(path.to_owned()))
}

/// Default node identifier: the host name, falling back to the pid when the
/// host name cannot be determined.
fn default_node_id() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| format!("node-{}", std::process::id()))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
