// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Architecture constraint extraction from src-RPM metadata.
//!
//! The package-format parser stays external: the implementation drives
//! `rpm -qp --queryformat` and only interprets its two output lines.

use std::path::Path;

use async_trait::async_trait;
use pf_core::ArchConstraints;
use thiserror::Error;

use crate::subprocess::{run_captured, SubprocessError, QUERY_TIMEOUT};

/// Query format producing one whitespace-separated line per tag.
const QUERY_FORMAT: &str = "[%{EXCLUDEARCH} ]\\n[%{EXCLUSIVEARCH} ]\\n";

#[derive(Debug, Error)]
pub enum RpmQueryError {
    #[error(transparent)]
    Subprocess(#[from] SubprocessError),

    #[error(transparent)]
    Command(#[from] pf_core::CommandError),
}

/// Reads the architecture constraints of a src-RPM.
#[async_trait]
pub trait SrpmInspector: Send + Sync {
    async fn arch_constraints(&self, srpm: &Path) -> Result<ArchConstraints, RpmQueryError>;
}

/// `rpm -qp`-backed inspector.
#[derive(Debug, Default, Clone)]
pub struct RpmQuery;

#[async_trait]
impl SrpmInspector for RpmQuery {
    async fn arch_constraints(&self, srpm: &Path) -> Result<ArchConstraints, RpmQueryError> {
        let srpm_str = srpm.to_string_lossy().into_owned();
        let output = run_captured(
            "rpm",
            &["-qp", "--queryformat", QUERY_FORMAT, &srpm_str],
            None,
            Some(QUERY_TIMEOUT),
        )
        .await?;
        if !output.success() {
            return Err(RpmQueryError::Command(output.into_error()));
        }
        Ok(parse_query_output(&output.stdout))
    }
}

/// Parse the two query lines: excluded arches first, exclusive second.
fn parse_query_output(stdout: &str) -> ArchConstraints {
    let mut lines = stdout.lines();
    let split = |line: Option<&str>| -> Vec<String> {
        line.unwrap_or_default()
            .split_whitespace()
            .filter(|token| *token != "(none)")
            .map(str::to_string)
            .collect()
    };
    ArchConstraints {
        exclude_arch: split(lines.next()),
        exclusive_arch: split(lines.next()),
    }
}

/// Fixed-answer inspector for driver tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default, Clone)]
pub struct FakeSrpmInspector {
    pub constraints: ArchConstraints,
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl SrpmInspector for FakeSrpmInspector {
    async fn arch_constraints(&self, _srpm: &Path) -> Result<ArchConstraints, RpmQueryError> {
        Ok(self.constraints.clone())
    }
}
