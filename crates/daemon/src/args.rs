// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line arguments of the node daemon.

use std::path::PathBuf;

use clap::Parser;
use pf_core::Overrides;

#[derive(Debug, Parser)]
#[command(
    name = "pfnode",
    version,
    about = "packforge distributed build system build node"
)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Build node unique identifier
    #[arg(short, long)]
    pub id: Option<String>,

    /// Build server connection URL
    #[arg(short, long)]
    pub master: Option<String>,

    /// Build threads count
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Working directory path
    #[arg(short, long)]
    pub working_dir: Option<PathBuf>,

    /// Enable additional debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Configuration overrides carried by the command line.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            node_id: self.id.clone(),
            master_url: self.master.clone(),
            threads_count: self.threads,
            working_dir: self.working_dir.clone(),
        }
    }
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
