// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Format-specific build drivers.
//!
//! A driver takes a prepared task directory, runs the toolchain pipeline
//! for its package format, stages everything worth uploading into the
//! artifacts directory, and reports a [`BuildOutcome`]. Drivers never leak
//! errors to the worker loop; every failure collapses into the outcome.

pub mod deb;
pub mod rpm;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pf_adapters::sources::{GitSourceFetcher, SidecarDownloader};
use pf_adapters::SrpmInspector;
use pf_core::{BuildOutcome, NodeConfig, PlatformKind, Task};
use thiserror::Error;

use crate::stats::BuildStats;
use crate::supervisor::Supervisors;
use crate::task_logger::TaskLogger;

/// Internal driver failure, folded into the outcome by the dispatcher.
#[derive(Debug, Error)]
pub(crate) enum DriverError {
    #[error("{0}")]
    Excluded(String),

    #[error("{0}")]
    Build(String),
}

/// Shared collaborators of every driver.
pub struct DriverCtx {
    pub config: Arc<NodeConfig>,
    pub supervisors: Arc<Supervisors>,
    pub inspector: Arc<dyn SrpmInspector>,
    pub git: GitSourceFetcher,
    pub sidecar: SidecarDownloader,
    pub http: reqwest::Client,
}

impl DriverCtx {
    pub fn new(
        config: Arc<NodeConfig>,
        supervisors: Arc<Supervisors>,
        inspector: Arc<dyn SrpmInspector>,
    ) -> Self {
        let git = GitSourceFetcher::new(
            config.git_repos_cache_dir.clone(),
            config.git_cache_locks_dir.clone(),
        );
        let sidecar = SidecarDownloader::new(&config.sources_blob_url);
        Self {
            config,
            supervisors,
            inspector,
            git,
            sidecar,
            http: reqwest::Client::new(),
        }
    }
}

/// One build attempt over a prepared task directory.
#[async_trait]
pub trait BuildDriver: Send + Sync {
    async fn build(
        &self,
        task: &Task,
        worker: &str,
        task_dir: &Path,
        artifacts_dir: &Path,
        logger: &TaskLogger,
        stats: &mut BuildStats,
    ) -> BuildOutcome;
}

/// Production driver set: dispatches on the task's platform format.
pub struct ToolchainDrivers {
    ctx: DriverCtx,
}

impl ToolchainDrivers {
    pub fn new(ctx: DriverCtx) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl BuildDriver for ToolchainDrivers {
    async fn build(
        &self,
        task: &Task,
        worker: &str,
        task_dir: &Path,
        artifacts_dir: &Path,
        logger: &TaskLogger,
        stats: &mut BuildStats,
    ) -> BuildOutcome {
        let all_start = pf_core::time_fmt::stage_ts();
        let result = match task.platform.kind {
            PlatformKind::Rpm => {
                rpm::build(&self.ctx, task, worker, task_dir, artifacts_dir, logger, stats).await
            }
            PlatformKind::Deb => {
                deb::build(&self.ctx, task, worker, task_dir, artifacts_dir, logger, stats).await
            }
        };
        stats.record("build_all", all_start, pf_core::time_fmt::stage_ts());

        match result {
            Ok(()) => BuildOutcome::Done,
            Err(DriverError::Excluded(reason)) => {
                logger.info(&format!("task {} build excluded: {reason}", task.id));
                BuildOutcome::Excluded { reason }
            }
            Err(DriverError::Build(reason)) => {
                logger.error(&format!("task {} build failed: {reason}", task.id));
                BuildOutcome::Failed { reason }
            }
        }
    }
}

/// Locate a spec file in a sources tree, also looking under `SPECS/`.
pub(crate) fn locate_spec_file(sources_dir: &Path) -> Result<PathBuf, DriverError> {
    let mut folders = vec![sources_dir.to_owned()];
    let specs_dir = sources_dir.join("SPECS");
    if specs_dir.exists() {
        folders.push(specs_dir);
    }
    for folder in folders {
        let Ok(entries) = std::fs::read_dir(&folder) else {
            continue;
        };
        let mut specs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "spec"))
            .collect();
        specs.sort();
        if let Some(spec) = specs.into_iter().next() {
            return Ok(spec);
        }
    }
    Err(DriverError::Build("spec file is not found".to_string()))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
