// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error carriers for subprocess-driven operations.

use thiserror::Error;

/// A shell command that exited non-zero or could not be spawned.
///
/// Carried inside higher-level errors so failure reports keep the full
/// command, exit code and captured output.
#[derive(Debug, Error)]
#[error("command \"{command}\" returned {exit_code}")]
pub struct CommandError {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandError {
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}
