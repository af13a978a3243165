// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build task wire models received from the master.
//!
//! The platform `data` map is opaque to the master protocol and carries
//! toolchain hints; the accessors here centralize the keys the node
//! understands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of source reference a task points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// A git repository to check out and build from.
    Git,
    /// A src-RPM previously built by this system.
    BuiltSrpm,
    /// A src-RPM hosted outside the system.
    ExternalSrpm,
}

/// Source reference of a build task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRef {
    pub url: String,
    pub kind: RefKind,
    #[serde(default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
}

/// Package format of the target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Rpm,
    Deb,
}

/// Target platform description. `data` is forwarded unchanged from the
/// master and interpreted only through the accessors below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlatform {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PlatformKind,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl TaskPlatform {
    /// Build timeout in seconds, forwarded to the build tool.
    pub fn build_timeout(&self) -> Option<u64> {
        self.data.get("timeout").and_then(Value::as_u64)
    }

    /// RPM macro definitions (`--define` pairs).
    pub fn definitions(&self) -> BTreeMap<String, String> {
        let mut defs = BTreeMap::new();
        if let Some(Value::Object(map)) = self.data.get("definitions") {
            for (name, value) in map {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                defs.insert(name.clone(), rendered);
            }
        }
        defs
    }

    /// Extra chroot options under the `mock` key.
    pub fn chroot_options(&self) -> Map<String, Value> {
        match self.data.get("mock") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// Distribution tag (e.g. `el8`) used for result-dir substitution.
    pub fn dist_tag(&self) -> Option<&str> {
        self.data.get("mock_dist").and_then(Value::as_str)
    }

    /// Regexes of extra build logs to capture from the chroot.
    pub fn custom_logs(&self) -> Vec<String> {
        match self.data.get("custom_logs") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether remote spec sources may be downloaded during preparation.
    pub fn allow_sources_download(&self) -> bool {
        self.data
            .get("allow_sources_download")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Package-manager configuration overrides under the `yum` key.
    pub fn repo_options(&self) -> Map<String, Value> {
        match self.data.get("yum") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// One package repository made available inside the build environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRepo {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Who requested the build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreatedBy {
    pub name: String,
    pub email: String,
}

impl TaskCreatedBy {
    pub fn full_name(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// A build task, immutable once received from the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub build_id: i64,
    pub arch: String,
    #[serde(rename = "ref")]
    pub reference: TaskRef,
    pub platform: TaskPlatform,
    #[serde(default)]
    pub repositories: Vec<TaskRepo>,
    pub created_by: TaskCreatedBy,
    #[serde(default)]
    pub srpm_hash: Option<String>,
    #[serde(default)]
    pub commit_provenance: Option<String>,
    #[serde(default)]
    pub is_secure_boot: bool,
}

impl Task {
    /// Whether a src-RPM still has to be built from sources. Pre-built
    /// src-RPM references skip straight to the rebuild stage.
    pub fn srpm_build_required(&self) -> bool {
        !(self.reference.url.ends_with("src.rpm")
            || matches!(
                self.reference.kind,
                RefKind::BuiltSrpm | RefKind::ExternalSrpm
            ))
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
