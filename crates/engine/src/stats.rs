// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build stage timing, uploaded as `build_stats.yml` with the other
//! artifacts.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StageTiming {
    pub start_ts: String,
    pub end_ts: String,
}

/// Start and end timestamps per build stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildStats(BTreeMap<String, StageTiming>);

impl BuildStats {
    pub fn record(&mut self, stage: &str, start_ts: String, end_ts: String) {
        self.0.insert(stage.to_string(), StageTiming { start_ts, end_ts });
    }

    pub fn stage(&self, name: &str) -> Option<&StageTiming> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize into `build_stats.yml` inside the artifacts directory.
    pub fn write_yaml(&self, artifacts_dir: &Path) -> std::io::Result<std::path::PathBuf> {
        let rendered = serde_yaml::to_string(&self.0)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let path = artifacts_dir.join("build_stats.yml");
        std::fs::write(&path, rendered)?;
        Ok(path)
    }
}

/// Run a stage, recording its start and end time whatever the result.
pub async fn measure_stage<T, F>(stats: &mut BuildStats, stage: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start_ts = pf_core::time_fmt::stage_ts();
    let result = fut.await;
    stats.record(stage, start_ts, pf_core::time_fmt::stage_ts());
    result
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
