// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-file transactional lease store.
//!
//! Two named sub-stores live in one JSON state file next to the environment
//! configuration cache:
//!
//! - `locks`: config file name → lease owner, `null` meaning free;
//! - `stats`: config file name → `(created_ts, last_used_ts, use_count)`.
//!
//! A transaction holds an exclusive flock on a sibling `.lock` file for its
//! whole lifetime, so read–modify–write across both sub-stores is atomic
//! between worker processes on one host. Commits write a temp file, fsync,
//! and atomically rename over the state file; a corrupt state file is
//! rotated to `.bak` and replaced by an empty store.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use pf_core::LeaseOwner;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// State file name inside the environment configuration directory.
const STATE_FILE: &str = "supervisor.json";

/// Lock file guarding cross-process transactions.
const LOCK_FILE: &str = "supervisor.lock";

/// Errors from lease store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A lock record exists without its stats record. This means a serious
    /// bug or state corruption; the caller aborts the current operation.
    #[error("there is no statistics found for the {0} environment")]
    MissingStats(String),
}

/// Usage statistics of one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvStats {
    pub created_ts: i64,
    pub last_used_ts: i64,
    pub use_count: u64,
}

/// On-disk shape of the state file: the two named sub-stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    locks: BTreeMap<String, Option<LeaseOwner>>,
    #[serde(default)]
    stats: BTreeMap<String, EnvStats>,
}

/// Handle to the lease store of one environment cache directory.
///
/// Cheap to clone; every transaction re-acquires the file lock and reloads
/// the state, so clones never observe stale data.
#[derive(Debug, Clone)]
pub struct LeaseStore {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LeaseStore {
    /// Open (and create if needed) the store inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            state_path: dir.join(STATE_FILE),
            lock_path: dir.join(LOCK_FILE),
        })
    }

    /// Begin a transaction: blocks until the cross-process lock is held,
    /// then loads the current state.
    pub fn begin(&self) -> Result<StoreTxn, StoreError> {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;

        let state = load_state(&self.state_path)?;
        Ok(StoreTxn {
            state_path: self.state_path.clone(),
            _lock_file: lock_file,
            state,
        })
    }
}

/// One open transaction over both sub-stores.
///
/// The flock is released when the transaction is dropped, whether or not it
/// was committed; an uncommitted transaction leaves the state file
/// untouched.
pub struct StoreTxn {
    state_path: PathBuf,
    // NOTE(lifetime): held to maintain the exclusive flock; released on drop
    _lock_file: File,
    state: StoreState,
}

impl StoreTxn {
    /// All config file names that have a lock record.
    pub fn lock_keys(&self) -> Vec<String> {
        self.state.locks.keys().cloned().collect()
    }

    /// Current lock value: `None` when no record exists, `Some(None)` when
    /// the record exists and is free.
    pub fn lock_of(&self, key: &str) -> Option<&Option<LeaseOwner>> {
        self.state.locks.get(key)
    }

    /// Whether the key has no holder (no record, or a free record).
    pub fn is_free(&self, key: &str) -> bool {
        match self.state.locks.get(key) {
            None => true,
            Some(owner) => owner.is_none(),
        }
    }

    /// Write the holder of a key.
    pub fn set_lock(&mut self, key: &str, owner: LeaseOwner) {
        self.state.locks.insert(key.to_string(), Some(owner));
    }

    /// Mark a key free, keeping its record.
    pub fn clear_lock(&mut self, key: &str) {
        self.state.locks.insert(key.to_string(), None);
    }

    /// Drop both the lock and the stats record of a key.
    pub fn remove_entry(&mut self, key: &str) {
        self.state.locks.remove(key);
        self.state.stats.remove(key);
    }

    pub fn stats_of(&self, key: &str) -> Option<EnvStats> {
        self.state.stats.get(key).copied()
    }

    /// Record an acquisition: first use creates the stats record, later
    /// uses keep `created_ts`, refresh `last_used_ts` and bump the count.
    pub fn record_acquire(&mut self, key: &str, now: i64) {
        let entry = self
            .state
            .stats
            .entry(key.to_string())
            .or_insert(EnvStats {
                created_ts: now,
                last_used_ts: now,
                use_count: 0,
            });
        entry.last_used_ts = now;
        entry.use_count += 1;
    }

    /// Refresh `last_used_ts` on release. Missing stats for a known key is
    /// a store-integrity error.
    pub fn touch_usage(&mut self, key: &str, now: i64) -> Result<(), StoreError> {
        match self.state.stats.get_mut(key) {
            Some(stats) => {
                stats.last_used_ts = now;
                Ok(())
            }
            None => Err(StoreError::MissingStats(key.to_string())),
        }
    }

    /// Reset stats after an environment cache regeneration.
    pub fn reset_stats(&mut self, key: &str, now: i64) {
        self.state.stats.insert(
            key.to_string(),
            EnvStats {
                created_ts: now,
                last_used_ts: now,
                use_count: 0,
            },
        );
    }

    /// Commit the transaction: temp file + fsync + atomic rename.
    pub fn commit(self) -> Result<(), StoreError> {
        let tmp_path = self.state_path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &self.state)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }
}

/// Load the state file, rotating a corrupt one to `.bak`.
fn load_state(path: &Path) -> Result<StoreState, StoreError> {
    if !path.exists() {
        return Ok(StoreState::default());
    }
    let raw = fs::read_to_string(path)?;
    match serde_json::from_str(&raw) {
        Ok(state) => Ok(state),
        Err(e) => {
            let bak_path = path.with_extension("bak");
            warn!(
                error = %e,
                path = %path.display(),
                bak = %bak_path.display(),
                "corrupt lease state, moving to .bak and starting fresh",
            );
            fs::rename(path, &bak_path)?;
            Ok(StoreState::default())
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
