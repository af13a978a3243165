// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease owner identity for environment locks.
//!
//! A lock value names exactly one holder: the process id plus the worker
//! name inside that process. Serialization is deterministic (fixed field
//! order) so lock values compare bytewise across processes.

use serde::{Deserialize, Serialize};

/// Holder of one environment lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseOwner {
    pub pid: u32,
    pub thread: String,
}

impl LeaseOwner {
    /// Owner record for the current process and the given worker name.
    pub fn current(thread: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            thread: thread.into(),
        }
    }
}

impl std::fmt::Display for LeaseOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pid, self.thread)
    }
}

#[cfg(test)]
#[path = "owner_tests.rs"]
mod tests;
