// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only build logs.
//!
//! Each worker writes a persistent `bt-<name>.log` in its slot directory;
//! while a task is being processed, a per-task log file is attached and
//! receives the same lines. Task logs are themselves uploaded artifacts,
//! which is why they bypass the tracing stack. Each append opens, writes
//! and closes the file; the write frequency is low.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

pub struct TaskLogger {
    worker_log: PathBuf,
    task_log: Mutex<Option<PathBuf>>,
}

impl TaskLogger {
    pub fn new(worker_log: PathBuf) -> Self {
        Self {
            worker_log,
            task_log: Mutex::new(None),
        }
    }

    /// Start mirroring appends into a per-task log file.
    pub fn attach_task(&self, path: PathBuf) {
        *self.task_log.lock() = Some(path);
    }

    /// Stop mirroring; subsequent appends go to the worker log only.
    pub fn detach_task(&self) {
        *self.task_log.lock() = None;
    }

    pub fn task_log_path(&self) -> Option<PathBuf> {
        self.task_log.lock().clone()
    }

    pub fn info(&self, message: &str) {
        self.append("INFO", message);
    }

    pub fn debug(&self, message: &str) {
        self.append("DEBUG", message);
    }

    pub fn error(&self, message: &str) {
        self.append("ERROR", message);
    }

    /// Logging must not break the worker: failures are reported through
    /// tracing and otherwise ignored.
    fn append(&self, level: &str, message: &str) {
        let line = format!("{} {:<8}: {}\n", pf_core::time_fmt::log_ts(), level, message);
        if let Err(e) = append_line(&self.worker_log, &line) {
            tracing::warn!(path = %self.worker_log.display(), error = %e, "failed to write worker log");
        }
        let task_log = self.task_log.lock().clone();
        if let Some(path) = task_log {
            if let Err(e) = append_line(&path, &line) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write task log");
            }
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

#[cfg(test)]
#[path = "task_logger_tests.rs"]
mod tests;
