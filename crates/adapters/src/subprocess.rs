// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution helpers.
//!
//! Build tool invocations run with a neutral environment (`HISTFILE=/dev/null`
//! so shell history stays clean, `LANG=C` so output is parseable English).

use std::path::Path;
use std::time::Duration;

use pf_core::CommandError;
use thiserror::Error;
use tokio::process::Command;

/// Default timeout for git mirror operations.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default timeout for src-RPM unpacking.
pub const UNPACK_TIMEOUT: Duration = Duration::from_secs(900);

/// Default timeout for metadata queries (`rpm -qp`).
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors spawning or waiting for a subprocess. A non-zero exit is not an
/// error at this layer; it is reported through [`CommandOutput::exit_code`].
#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("{command} failed to start: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
}

/// Captured result of one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into the shared typed command error.
    pub fn into_error(self) -> CommandError {
        CommandError::new(self.command, self.exit_code, self.stdout, self.stderr)
    }
}

/// Run a command to completion, capturing stdout/stderr, with an optional
/// timeout. The child is killed when the timeout elapses (tokio kills the
/// child on drop).
pub async fn run_captured(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandOutput, SubprocessError> {
    let rendered = render_command(program, args);
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("HISTFILE", "/dev/null")
        .env("LANG", "C")
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output_fut = cmd.output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, output_fut).await {
            Ok(result) => result,
            Err(_elapsed) => {
                return Err(SubprocessError::Timeout {
                    command: rendered,
                    timeout: limit,
                })
            }
        },
        None => output_fut.await,
    }
    .map_err(|source| SubprocessError::Spawn {
        command: rendered.clone(),
        source,
    })?;

    Ok(CommandOutput {
        command: rendered,
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Remove a directory tree, escalating when plain removal cannot.
///
/// Build artifacts sometimes carry modes that make plain unlink impossible
/// for the node user (e.g. unwritable directories); those trees go through
/// non-interactive sudo.
pub async fn force_remove_tree(path: &Path) -> Result<(), CommandError> {
    if !path.exists() {
        return Ok(());
    }
    if std::fs::remove_dir_all(path).is_ok() {
        return Ok(());
    }
    let path_str = path.to_string_lossy();
    let output = run_captured("sudo", &["-n", "rm", "-rf", "--", &path_str], None, None)
        .await
        .map_err(spawn_to_command_error)?;
    if output.success() {
        Ok(())
    } else {
        Err(output.into_error())
    }
}

/// Reclaim ownership of a directory tree for the node user.
pub async fn reclaim_ownership(path: &Path) -> Result<(), CommandError> {
    let uid = nix::unistd::getuid();
    let gid = nix::unistd::getgid();
    let spec = format!("{uid}:{gid}");
    let path_str = path.to_string_lossy();
    let output = run_captured(
        "sudo",
        &["-n", "chown", "-R", &spec, "--", &path_str],
        None,
        None,
    )
    .await
    .map_err(spawn_to_command_error)?;
    if output.success() {
        Ok(())
    } else {
        Err(output.into_error())
    }
}

fn spawn_to_command_error(err: SubprocessError) -> CommandError {
    CommandError::new(err.to_string(), -1, String::new(), String::new())
}

fn render_command(program: &str, args: &[&str]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
