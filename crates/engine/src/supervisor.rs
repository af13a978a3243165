// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chroot environment supervision.
//!
//! A supervisor makes the workers of every node process on one host share a
//! bounded pool of expensive chroot environments. Environments are keyed by
//! the recipe fingerprint; config files are named `<fingerprint>.<N>.cfg`
//! with the smallest `N` that is unique on disk. Lease and usage records
//! live in the transactional store next to the config files; every acquire
//! and release runs the cleanup sweep in the same transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pf_core::{LeaseOwner, NodeConfig};
use pf_storage::{LeaseStore, StoreError, StoreTxn};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::env_config::EnvRecipe;

/// Idle time after which an unused environment is deleted (2 h).
pub const DEFAULT_IDLE_TIME: Duration = Duration::from_secs(7200);

/// Lifetime after which an environment's caches are regenerated even if it
/// is actively used (24 h).
pub const DEFAULT_REFRESH_TIME: Duration = Duration::from_secs(86400);

/// System-wide logging configuration the RPM toolchain expects next to the
/// environment configs.
const TOOL_LOGGING_CONFIG: &str = "/etc/mock/logging.ini";

/// Site defaults written next to the per-environment configs: secure-boot
/// signing macros plus the bind-mount switch they rely on.
const SITE_DEFAULTS: &str = concat!(
    "config_opts[\"macros\"][\"%__pesign_cert\"] = \"%pe_signing_cert\"\n",
    "config_opts[\"macros\"][\"%__pesign_client_cert\"] = \"%pe_signing_cert\"\n",
    "config_opts[\"macros\"][\"%__pesign_client_token\"] = \"%pe_signing_token\"\n",
    "config_opts[\"macros\"][\"%__pesign_token\"] = \"-t %pe_signing_token\"\n",
    "config_opts[\"plugin_conf\"][\"bind_mount_enable\"] = True\n",
);

#[derive(Debug, Error)]
pub enum EnvSupervisorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store transaction task failed: {0}")]
    TxnTask(String),
}

/// Which toolchain owns the environments of one supervisor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// RPM chroot tool (`mock`).
    Mock,
    /// Debian chroot tool (`pbuilder`).
    Pbuilder,
}

impl ToolKind {
    /// Best-effort chroot cleanup between leases.
    async fn clean(self, configdir: &Path, config_path: &Path, root: &str) {
        let result = match self {
            ToolKind::Mock => {
                let configdir = configdir.to_string_lossy().into_owned();
                pf_adapters::run_captured(
                    "mock",
                    &["--configdir", &configdir, "--root", root, "--clean"],
                    None,
                    None,
                )
                .await
            }
            ToolKind::Pbuilder => {
                let config = config_path.to_string_lossy().into_owned();
                pf_adapters::run_captured(
                    "sudo",
                    &["-n", "pbuilder", "--clean", "--configfile", &config],
                    None,
                    None,
                )
                .await
            }
        };
        match result {
            Ok(output) if !output.success() => {
                error!(root, exit_code = output.exit_code, stderr = %output.stderr,
                       "environment clean failed");
            }
            Ok(_) => {}
            Err(e) => error!(root, error = %e, "environment clean failed"),
        }
    }

    /// Best-effort full scrub of an environment's root and caches.
    async fn scrub_all(self, configdir: &Path, config_path: &Path, root: &str) {
        let result = match self {
            ToolKind::Mock => {
                let configdir = configdir.to_string_lossy().into_owned();
                pf_adapters::run_captured(
                    "mock",
                    &["--configdir", &configdir, "--root", root, "--scrub", "all"],
                    None,
                    None,
                )
                .await
            }
            ToolKind::Pbuilder => {
                // pbuilder has no scrub verb; dropping the base image and
                // apt cache forces regeneration on next use.
                let base = configdir.join(format!("{root}.base.tgz"));
                let aptcache = configdir.join(format!("{root}.aptcache"));
                let _ = std::fs::remove_file(&base);
                let _ = std::fs::remove_dir_all(&aptcache);
                let config = config_path.to_string_lossy().into_owned();
                pf_adapters::run_captured(
                    "sudo",
                    &["-n", "pbuilder", "--clean", "--configfile", &config],
                    None,
                    None,
                )
                .await
            }
        };
        match result {
            Ok(output) if !output.success() => {
                error!(root, exit_code = output.exit_code, stderr = %output.stderr,
                       "environment scrub failed");
            }
            Ok(_) => {}
            Err(e) => error!(root, error = %e, "environment scrub failed"),
        }
    }
}

/// A held environment: the rendered config file plus its chroot name.
#[derive(Debug, Clone)]
pub struct EnvLease {
    pub config_path: PathBuf,
    pub root: String,
    key: String,
}

impl EnvLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config_path: PathBuf, root: String) -> Self {
        let key = config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            config_path,
            root,
            key,
        }
    }
}

/// Environment supervisor of one toolchain's cache directory.
pub struct EnvSupervisor {
    storage_dir: PathBuf,
    tool: ToolKind,
    idle_time: Duration,
    refresh_time: Duration,
    store: LeaseStore,
    // In-process serialization of the whole acquire/release critical
    // section; the store's flock covers other processes.
    local: tokio::sync::Mutex<()>,
}

impl EnvSupervisor {
    pub fn new(storage_dir: PathBuf, tool: ToolKind) -> Result<Arc<Self>, EnvSupervisorError> {
        Self::with_timeouts(storage_dir, tool, DEFAULT_IDLE_TIME, DEFAULT_REFRESH_TIME)
    }

    pub fn with_timeouts(
        storage_dir: PathBuf,
        tool: ToolKind,
        idle_time: Duration,
        refresh_time: Duration,
    ) -> Result<Arc<Self>, EnvSupervisorError> {
        if !storage_dir.exists() {
            info!(dir = %storage_dir.display(), "initializing environment supervisor storage");
            std::fs::create_dir_all(&storage_dir)?;
        }
        let store = LeaseStore::open(&storage_dir)?;
        let supervisor = Self {
            tool,
            idle_time,
            refresh_time,
            store,
            local: tokio::sync::Mutex::new(()),
            storage_dir,
        };
        if tool == ToolKind::Mock {
            supervisor.write_site_defaults()?;
            supervisor.link_tool_logging_config()?;
        }
        Ok(Arc::new(supervisor))
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Find a free environment for the recipe or create one, lease it to
    /// the calling worker, and sweep stale environments.
    pub async fn environment(
        &self,
        recipe: &impl EnvRecipe,
        worker: &str,
    ) -> Result<EnvLease, EnvSupervisorError> {
        let fingerprint = recipe.fingerprint();
        let _guard = self.local.lock().await;
        let mut txn = self.begin_txn().await?;
        let now = pf_core::time_fmt::now_ts();

        let existing = self.existing_config_files(&fingerprint)?;
        let mut generate = false;
        let config_file = match existing.iter().find(|name| txn.is_free(name.as_str())) {
            Some(name) => name.clone(),
            None => {
                // Smallest index not already on disk.
                let mut i = 0usize;
                loop {
                    let candidate = format!("{fingerprint}.{i}.cfg");
                    if !existing.contains(&candidate) {
                        generate = true;
                        break candidate;
                    }
                    i += 1;
                }
            }
        };

        let root = chroot_name(&config_file);
        let config_path = self.storage_dir.join(&config_file);
        if generate {
            debug!(config = %config_path.display(), "rendering new environment config");
            std::fs::write(&config_path, recipe.render(Some(&root)))?;
        }

        txn.set_lock(&config_file, LeaseOwner::current(worker));
        txn.record_acquire(&config_file, now);
        self.sweep(&mut txn, now).await?;
        txn.commit()?;

        Ok(EnvLease {
            config_path,
            root,
            key: config_file,
        })
    }

    /// Return an environment to the pool: best-effort chroot clean, clear
    /// the lock, refresh the usage timestamp, sweep.
    pub async fn release(&self, lease: &EnvLease) -> Result<(), EnvSupervisorError> {
        self.tool
            .clean(&self.storage_dir, &lease.config_path, &lease.root)
            .await;

        let _guard = self.local.lock().await;
        let mut txn = self.begin_txn().await?;
        let now = pf_core::time_fmt::now_ts();
        txn.clear_lock(&lease.key);
        txn.touch_usage(&lease.key, now)?;
        self.sweep(&mut txn, now).await?;
        txn.commit()?;
        Ok(())
    }

    /// Delete idle environments, regenerate outdated ones, and free leases
    /// whose owning process died.
    async fn sweep(&self, txn: &mut StoreTxn, now: i64) -> Result<(), EnvSupervisorError> {
        for key in txn.lock_keys() {
            let holder = txn.lock_of(&key).cloned().flatten();
            if let Some(owner) = holder {
                if pid_alive(owner.pid) {
                    // Held by a live process; nothing to clean up here.
                    continue;
                }
                warn!(
                    environment = %key,
                    pid = owner.pid,
                    "environment is locked by a dead process, marking it as free"
                );
                txn.clear_lock(&key);
            }

            let Some(stats) = txn.stats_of(&key) else {
                // Statistics absence means a serious bug or store
                // corruption; abort the current operation.
                error!(
                    environment = %key,
                    "no statistics found, please verify the store integrity"
                );
                return Err(StoreError::MissingStats(key).into());
            };

            let config_path = self.storage_dir.join(&key);
            let root = chroot_name(&key);
            if now - stats.last_used_ts > self.idle_time.as_secs() as i64 {
                info!(environment = %key, "deleting expired environment");
                self.tool
                    .scrub_all(&self.storage_dir, &config_path, &root)
                    .await;
                txn.remove_entry(&key);
                if config_path.exists() {
                    std::fs::remove_file(&config_path)?;
                }
            } else if now - stats.created_ts > self.refresh_time.as_secs() as i64 {
                info!(environment = %key, "regenerating outdated environment");
                self.tool
                    .scrub_all(&self.storage_dir, &config_path, &root)
                    .await;
                txn.reset_stats(&key, now);
            }
        }
        Ok(())
    }

    /// Config files on disk that belong to one fingerprint, sorted.
    fn existing_config_files(&self, fingerprint: &str) -> Result<Vec<String>, EnvSupervisorError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.storage_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(rest) = name.strip_prefix(fingerprint) {
                let mut parts = rest.splitn(3, '.');
                if parts.next() == Some("")
                    && parts.next().is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
                    && parts.next() == Some("cfg")
                {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// The store blocks on the cross-process flock; keep that off the
    /// async runtime.
    async fn begin_txn(&self) -> Result<StoreTxn, EnvSupervisorError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.begin())
            .await
            .map_err(|e| EnvSupervisorError::TxnTask(e.to_string()))?
            .map_err(Into::into)
    }

    fn write_site_defaults(&self) -> Result<(), EnvSupervisorError> {
        let path = self.storage_dir.join("site-defaults.cfg");
        info!(dir = %self.storage_dir.display(), "generating site-defaults.cfg");
        std::fs::write(path, SITE_DEFAULTS)?;
        Ok(())
    }

    /// Symlink the system tool logging config in when the host provides
    /// one and the link is absent.
    fn link_tool_logging_config(&self) -> Result<(), EnvSupervisorError> {
        let src = Path::new(TOOL_LOGGING_CONFIG);
        let dst = self.storage_dir.join("logging.ini");
        if src.exists() && !dst.exists() {
            std::os::unix::fs::symlink(src, &dst)?;
        }
        Ok(())
    }
}

/// The per-toolchain supervisors of one node process, created at startup
/// and threaded through the constructors that need them.
pub struct Supervisors {
    pub rpm: Arc<EnvSupervisor>,
    pub deb: Arc<EnvSupervisor>,
}

impl Supervisors {
    pub fn init(config: &NodeConfig) -> Result<Arc<Self>, EnvSupervisorError> {
        Ok(Arc::new(Self {
            rpm: EnvSupervisor::new(config.env_configs_dir(), ToolKind::Mock)?,
            deb: EnvSupervisor::new(config.deb_env_configs_dir(), ToolKind::Pbuilder)?,
        }))
    }
}

/// Chroot name of a config file: the name without its `.cfg` suffix.
fn chroot_name(config_file: &str) -> String {
    config_file
        .strip_suffix(".cfg")
        .unwrap_or(config_file)
        .to_string()
}

/// Whether a process with this pid exists. Signal 0 probes without
/// delivering; EPERM still proves liveness.
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
