// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Architecture-exclusion rules.
//!
//! A build is *excluded* (as opposed to failed) when the source package
//! declares itself incompatible with the target architecture, either through
//! its `ExcludeArch`/`ExclusiveArch` metadata or through a recognized build
//! tool log line.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// The 32-bit x86 family is treated jointly: membership of any member in
/// `ExclusiveArch` implies membership for all of them.
const BIT32_ARCHES: [&str; 4] = ["i386", "i486", "i586", "i686"];

static ARCH_NOT_INCLUDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error:\s+Architecture\s+is\s+not\s+included:\s+(.*?)$")
        .expect("constant regex pattern is valid")
});

static NO_COMPATIBLE_ARCHES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error:\s+No\s+compatible\s+architectures\s+found")
        .expect("constant regex pattern is valid")
});

static BUILD_TIMEOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"commandTimeoutExpired:\s+Timeout\((\d+)\)\s+expired")
        .expect("constant regex pattern is valid")
});

/// Architecture constraints declared by a source package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchConstraints {
    pub exclude_arch: Vec<String>,
    pub exclusive_arch: Vec<String>,
}

impl ArchConstraints {
    /// Why a build for `arch` must be excluded, or `None` when it may run.
    pub fn excluded_reason(&self, arch: &str) -> Option<String> {
        if self.exclude_arch.iter().any(|a| a == arch) {
            return Some(format!(
                "the \"{arch}\" architecture is listed in ExcludeArch"
            ));
        }
        if !self.exclusive_arch.is_empty() {
            let is_bit32 = BIT32_ARCHES.contains(&arch);
            let allowed = if is_bit32 {
                self.exclusive_arch
                    .iter()
                    .any(|a| BIT32_ARCHES.contains(&a.as_str()))
            } else {
                self.exclusive_arch.iter().any(|a| a == arch)
            };
            if !allowed {
                return Some(format!(
                    "the \"{arch}\" architecture is not listed in ExclusiveArch"
                ));
            }
        }
        None
    }
}

/// Detect an excluded-architecture error in one build log line.
pub fn excluded_arch_in_line(line: &str) -> Option<String> {
    if let Some(caps) = ARCH_NOT_INCLUDED.captures(line) {
        return Some(format!("architecture \"{}\" is excluded", &caps[1]));
    }
    if NO_COMPATIBLE_ARCHES.is_match(line) {
        return Some("target architecture is not compatible".to_string());
    }
    None
}

/// Detect a build-timeout expiry in one build log line.
pub fn timeout_in_line(line: &str) -> Option<String> {
    BUILD_TIMEOUT
        .captures(line)
        .map(|caps| format!("build timeout {} second(s) expired", &caps[1]))
}

/// Scan a build log file for an excluded-architecture error.
///
/// Non-UTF-8 lines are skipped; the scan stops at the first match.
pub fn scan_log_for_exclusion(log_file: &Path) -> std::io::Result<Option<String>> {
    let file = std::fs::File::open(log_file)?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(reason) = excluded_arch_in_line(&line) {
            return Ok(Some(reason));
        }
    }
}

#[cfg(test)]
#[path = "archcheck_tests.rs"]
mod tests;
