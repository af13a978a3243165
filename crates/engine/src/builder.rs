// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The builder worker: one task at a time, strict failure containment.
//!
//! A worker polls the master, prepares sources, drives the build, uploads
//! artifacts, reports the terminal status and cleans up — then polls again
//! until the graceful flag is observed. Nothing that happens inside one
//! task stops the worker from processing the next one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pf_adapters::master::{MasterApi, TaskReport};
use pf_adapters::subprocess::force_remove_tree;
use pf_adapters::ArtifactStore;
use pf_core::{BuildOutcome, NodeConfig, Task};
use rand::Rng;
use tracing::{error, info};

use crate::drivers::BuildDriver;
use crate::shutdown::Shutdown;
use crate::stats::BuildStats;
use crate::task_logger::TaskLogger;

/// Shared worker view: liveness plus the task currently held. The
/// heartbeat task reads this, the worker writes it.
pub struct WorkerState {
    name: String,
    current_task: parking_lot::Mutex<Option<i64>>,
    done: AtomicBool,
}

impl WorkerState {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            current_task: parking_lot::Mutex::new(None),
            done: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_task_id(&self) -> Option<i64> {
        *self.current_task.lock()
    }

    pub fn is_alive(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }

    fn set_task(&self, id: i64) {
        *self.current_task.lock() = Some(id);
    }

    fn clear_task(&self) {
        *self.current_task.lock() = None;
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn set_task_for_tests(&self, id: Option<i64>) {
        *self.current_task.lock() = id;
    }

    #[cfg(test)]
    pub(crate) fn mark_done_for_tests(&self) {
        self.mark_done();
    }
}

/// One builder worker bound to a slot directory.
pub struct BuilderWorker {
    config: Arc<NodeConfig>,
    state: Arc<WorkerState>,
    working_dir: PathBuf,
    master: Arc<dyn MasterApi>,
    store: Arc<dyn ArtifactStore>,
    driver: Arc<dyn BuildDriver>,
    shutdown: Arc<Shutdown>,
}

impl BuilderWorker {
    pub fn new(
        slot: usize,
        config: Arc<NodeConfig>,
        master: Arc<dyn MasterApi>,
        store: Arc<dyn ArtifactStore>,
        driver: Arc<dyn BuildDriver>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        let state = WorkerState::new(format!("Builder-{slot}"));
        let working_dir = config.worker_dir(slot);
        Self {
            config,
            state,
            working_dir,
            master,
            store,
            driver,
            shutdown,
        }
    }

    pub fn state(&self) -> Arc<WorkerState> {
        Arc::clone(&self.state)
    }

    /// Poll and build until the graceful flag is set.
    pub async fn run(self) {
        if let Err(e) = std::fs::create_dir_all(&self.working_dir) {
            error!(dir = %self.working_dir.display(), error = %e, "cannot create worker directory");
            self.state.mark_done();
            return;
        }
        let logger = TaskLogger::new(self.working_dir.join(format!("bt-{}.log", self.state.name)));
        logger.info(&format!("starting {}", self.state.name));

        let supported_arches = self.config.supported_arches();
        while !self.shutdown.graceful() {
            let Some(task) = self.master.get_task(&supported_arches).await else {
                logger.debug("there are no tasks to process");
                self.idle_wait().await;
                continue;
            };
            self.process_task(task, &logger).await;
        }
        logger.info(&format!("{} stopped", self.state.name));
        self.state.mark_done();
    }

    /// Sleep 5-10 s between polls; a shutdown trigger ends the wait early.
    async fn idle_wait(&self) {
        let secs = rand::rng().random_range(5..=10);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = self.shutdown.notified() => {}
        }
    }

    /// One full task cycle. Every failure inside ends in a terminal report;
    /// none of them escapes.
    async fn process_task(&self, task: Task, logger: &TaskLogger) {
        self.state.set_task(task.id);
        let ts = pf_core::time_fmt::now_ts();
        let task_dir = self.working_dir.join(task.id.to_string());
        let artifacts_dir = task_dir.join("artifacts");
        let task_log = task_dir.join(format!("albs.{ts}.log"));

        let outcome = match std::fs::create_dir_all(&artifacts_dir) {
            Ok(()) => {
                logger.attach_task(task_log.clone());
                logger.info(&format!(
                    "processing task {} (build {}, {})",
                    task.id, task.build_id, task.arch
                ));
                let mut stats = BuildStats::default();
                let outcome = self
                    .driver
                    .build(
                        &task,
                        self.state.name(),
                        &task_dir,
                        &artifacts_dir,
                        logger,
                        &mut stats,
                    )
                    .await;
                if let Err(e) = stats.write_yaml(&artifacts_dir) {
                    logger.error(&format!("cannot write build stats: {e}"));
                }
                outcome
            }
            Err(e) => {
                error!(task_id = task.id, error = %e, "cannot create task directories");
                BuildOutcome::Failed {
                    reason: format!("cannot create task directories: {e}"),
                }
            }
        };

        let artifacts = self
            .upload_artifacts(&artifacts_dir, &task_log, &outcome, logger)
            .await;

        // The master hears about every acquired task exactly once, whatever
        // happened locally. An upload failure downgrades the task to failed.
        let status = if artifacts.is_err() {
            "failed"
        } else {
            outcome.status()
        };
        let report = TaskReport {
            task_id: task.id,
            status: status.to_string(),
            artifacts: artifacts.unwrap_or_default(),
        };
        self.master.build_done(&report).await;
        info!(task_id = task.id, status, "task reported");

        logger.detach_task();
        self.state.clear_task();
        if task_dir.exists() {
            logger.debug(&format!(
                "cleaning up task build directory {}",
                task_dir.display()
            ));
            if let Err(e) = force_remove_tree(&task_dir).await {
                logger.error(&format!("cannot remove task directory: {e}"));
            }
        }
    }

    /// Upload logs always, packages only on success, plus the per-task log.
    /// `Err(())` marks an upload failure after the error is logged.
    async fn upload_artifacts(
        &self,
        artifacts_dir: &Path,
        task_log: &Path,
        outcome: &BuildOutcome,
        logger: &TaskLogger,
    ) -> Result<Vec<pf_core::Artifact>, ()> {
        if !artifacts_dir.exists() {
            return Ok(Vec::new());
        }
        let only_logs = !outcome.is_done();
        let mut artifacts = match self.store.upload(artifacts_dir, only_logs).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                logger.error(&format!("cannot upload task artifacts: {e}"));
                return Err(());
            }
        };
        if task_log.exists() {
            match self.store.upload_single_file(task_log).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    logger.error(&format!("cannot upload task log: {e}"));
                    return Err(());
                }
            }
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
