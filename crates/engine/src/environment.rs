// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scoped build environment handle with one typed operation per tool verb.
//!
//! Every verb shares one `exec` primitive that runs the chroot tool with a
//! neutral environment and captures its output. The result directory comes
//! either from the caller or from a recognized line in the tool's stderr;
//! both absent is a typed error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::LazyLock;

use pf_adapters::subprocess::{run_captured, SubprocessError};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::supervisor::{EnvLease, EnvSupervisor, EnvSupervisorError};

static RESULTS_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^INFO:\s+Results\s+and/or\s+logs\s+in:\s+(.*)$")
        .expect("constant regex pattern is valid")
});

static RESULTDIR_EQ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^DEBUG:\s+resultdir\s+=\s+(.*)$").expect("constant regex pattern is valid")
});

/// Cache scrub scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrubScope {
    All,
    Chroot,
    Cache,
    RootCache,
    CCache,
    PackageCache,
}

impl ScrubScope {
    fn as_arg(self) -> &'static str {
        match self {
            ScrubScope::All => "all",
            ScrubScope::Chroot => "chroot",
            ScrubScope::Cache => "cache",
            ScrubScope::RootCache => "root-cache",
            ScrubScope::CCache => "c-cache",
            ScrubScope::PackageCache => "yum-cache",
        }
    }
}

/// Successful tool command execution.
#[derive(Debug, Clone)]
pub struct EnvResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Rendered environment configuration at execution time.
    pub config: String,
    pub resultdir: Option<PathBuf>,
}

impl EnvResult {
    /// Binary packages in the result directory.
    pub fn rpms(&self) -> Vec<PathBuf> {
        self.result_files(|name| name.ends_with(".rpm") && !name.ends_with(".src.rpm"))
    }

    /// The built source package, if any.
    pub fn srpm(&self) -> Option<PathBuf> {
        self.result_files(|name| name.ends_with(".src.rpm"))
            .into_iter()
            .next()
    }

    /// Log files, including those captured under a nested `chroot_scan/`
    /// tree.
    pub fn logs(&self) -> Vec<PathBuf> {
        let mut logs = self.result_files(|name| name.ends_with(".log"));
        if let Some(resultdir) = &self.resultdir {
            collect_logs_recursive(&resultdir.join("chroot_scan"), &mut logs);
        }
        logs
    }

    fn result_files(&self, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let Some(resultdir) = &self.resultdir else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(resultdir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| keep(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }
}

fn collect_logs_recursive(dir: &Path, logs: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_logs_recursive(&path, logs);
        } else if path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(".log"))
            .unwrap_or(false)
        {
            logs.push(path);
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("command \"{}\" returned {}", .0.command, .0.exit_code)]
    CommandFailed(Box<EnvResult>),

    #[error("resultdir is not found in the tool output")]
    MissingResultDir(Box<EnvResult>),

    #[error(transparent)]
    Subprocess(#[from] SubprocessError),

    #[error(transparent)]
    Supervisor(#[from] EnvSupervisorError),
}

impl EnvError {
    /// The execution record behind this error, when there is one.
    pub fn result(&self) -> Option<&EnvResult> {
        match self {
            EnvError::CommandFailed(result) | EnvError::MissingResultDir(result) => Some(result),
            _ => None,
        }
    }
}

/// One leased build environment.
///
/// Released exactly once: `release` is idempotent, so error paths may call
/// it unconditionally.
pub struct BuildEnv {
    supervisor: Arc<EnvSupervisor>,
    lease: EnvLease,
    released: AtomicBool,
}

impl BuildEnv {
    pub fn new(supervisor: Arc<EnvSupervisor>, lease: EnvLease) -> Self {
        Self {
            supervisor,
            lease,
            released: AtomicBool::new(false),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.lease.config_path
    }

    pub fn root(&self) -> &str {
        &self.lease.root
    }

    /// Current rendered configuration; empty when the file is gone.
    pub fn rendered_config(&self) -> String {
        std::fs::read_to_string(&self.lease.config_path).unwrap_or_default()
    }

    /// Return the environment to the supervisor. Only the first call acts.
    pub async fn release(&self) -> Result<(), EnvSupervisorError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.supervisor.release(&self.lease).await
    }

    pub async fn init(&self, resultdir: Option<&Path>) -> Result<EnvResult, EnvError> {
        let result = self.exec(&["--init"], resultdir, &BTreeMap::new(), None).await?;
        // The result directory is only required when the caller asked for one.
        if resultdir.is_some() {
            return require_resultdir(result);
        }
        Ok(result)
    }

    pub async fn install(&self, package: &str, resultdir: Option<&Path>) -> Result<EnvResult, EnvError> {
        let result = self
            .exec(&["--install", package, "--verbose"], resultdir, &BTreeMap::new(), None)
            .await?;
        require_resultdir(result)
    }

    pub async fn build_srpm(
        &self,
        spec: &Path,
        sources: &Path,
        resultdir: &Path,
        definitions: &BTreeMap<String, String>,
        timeout: Option<u64>,
    ) -> Result<EnvResult, EnvError> {
        let spec = spec.to_string_lossy().into_owned();
        let sources = sources.to_string_lossy().into_owned();
        let result = self
            .exec(
                &["--buildsrpm", "--spec", &spec, "--sources", &sources],
                Some(resultdir),
                definitions,
                timeout,
            )
            .await?;
        require_resultdir(result)
    }

    pub async fn rebuild(
        &self,
        srpm: &Path,
        resultdir: &Path,
        definitions: &BTreeMap<String, String>,
        timeout: Option<u64>,
    ) -> Result<EnvResult, EnvError> {
        let srpm = srpm.to_string_lossy().into_owned();
        let result = self
            .exec(&["--rebuild", &srpm], Some(resultdir), definitions, timeout)
            .await?;
        require_resultdir(result)
    }

    pub async fn shell(&self, command: &str, resultdir: Option<&Path>) -> Result<EnvResult, EnvError> {
        let result = self
            .exec(&["--shell", command], resultdir, &BTreeMap::new(), None)
            .await?;
        require_resultdir(result)
    }

    pub async fn copy_in(&self, sources: &[&Path], dst: &Path) -> Result<EnvResult, EnvError> {
        let mut args = vec!["--copyin".to_string()];
        for src in sources {
            args.push(src.to_string_lossy().into_owned());
        }
        args.push(dst.to_string_lossy().into_owned());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec(&arg_refs, None, &BTreeMap::new(), None).await
    }

    pub async fn clean(&self) -> Result<EnvResult, EnvError> {
        self.exec(&["--clean"], None, &BTreeMap::new(), None).await
    }

    pub async fn scrub(&self, scope: ScrubScope) -> Result<EnvResult, EnvError> {
        self.exec(&["--scrub", scope.as_arg()], None, &BTreeMap::new(), None)
            .await
    }

    /// Shared verb primitive: build the full argument list, run the tool,
    /// extract the result directory, convert non-zero exits into typed
    /// errors.
    async fn exec(
        &self,
        verb_args: &[&str],
        resultdir: Option<&Path>,
        definitions: &BTreeMap<String, String>,
        timeout: Option<u64>,
    ) -> Result<EnvResult, EnvError> {
        let configdir = self
            .lease
            .config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_string_lossy()
            .into_owned();

        let mut args: Vec<String> = vec![
            "--configdir".to_string(),
            configdir,
            "--root".to_string(),
            self.lease.root.clone(),
        ];
        args.extend(verb_args.iter().map(|s| s.to_string()));
        for (name, value) in definitions {
            args.push("--define".to_string());
            args.push(format!("{name} {value}"));
        }
        if let Some(secs) = timeout {
            args.push("--rpmbuild-timeout".to_string());
            args.push(secs.to_string());
        }
        let resultdir_arg = resultdir.map(|p| p.to_string_lossy().into_owned());
        if let Some(dir) = &resultdir_arg {
            args.push("--resultdir".to_string());
            args.push(dir.clone());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!(root = %self.lease.root, "executing tool command: mock {}", args.join(" "));
        let output = run_captured("mock", &arg_refs, None, None).await?;

        let resultdir = resultdir
            .map(Path::to_path_buf)
            .or_else(|| parse_resultdir(&output.stderr));
        let result = EnvResult {
            command: output.command,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            config: self.rendered_config(),
            resultdir,
        };
        if result.exit_code != 0 {
            return Err(EnvError::CommandFailed(Box::new(result)));
        }
        Ok(result)
    }
}

/// A result-producing verb without a result directory is a typed error.
fn require_resultdir(result: EnvResult) -> Result<EnvResult, EnvError> {
    if result.resultdir.is_none() {
        return Err(EnvError::MissingResultDir(Box::new(result)));
    }
    Ok(result)
}

/// Extract the result directory from tool output.
pub fn parse_resultdir(output: &str) -> Option<PathBuf> {
    for pattern in [&*RESULTS_IN, &*RESULTDIR_EQ] {
        if let Some(caps) = pattern.captures(output) {
            return Some(PathBuf::from(caps[1].trim()));
        }
    }
    None
}

#[cfg(test)]
#[path = "environment_tests.rs"]
mod tests;
