// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build artifact values reported to the master after upload.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Artifact classification, derived from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Rpm,
    Srpm,
    BuildLog,
    Config,
    Other,
}

impl ArtifactKind {
    /// Classify a file by name: `.src.rpm` before `.rpm`, logs, rendered
    /// environment configs, everything else is `Other`.
    pub fn classify(file_name: &str) -> Self {
        if file_name.ends_with(".src.rpm") {
            ArtifactKind::Srpm
        } else if file_name.ends_with(".rpm") || file_name.ends_with(".deb") {
            ArtifactKind::Rpm
        } else if file_name.ends_with(".log") {
            ArtifactKind::BuildLog
        } else if file_name.ends_with(".cfg") {
            ArtifactKind::Config
        } else {
            ArtifactKind::Other
        }
    }
}

/// One uploaded build artifact. `href` is the stable content-store
/// reference; `sha256` matches the local file at the moment of upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub href: String,
    pub sha256: String,
    pub path: PathBuf,
    #[serde(default)]
    pub cas_hash: Option<String>,
}

impl Artifact {
    /// Assemble an artifact record for a local file and its store reference.
    pub fn for_file(path: &Path, href: String, sha256: String) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            kind: ArtifactKind::classify(&name),
            name,
            href,
            sha256,
            path: path.to_owned(),
            cas_hash: None,
        }
    }
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
