// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! packforge build node daemon (pfnode)
//!
//! Long-running worker process of the distributed package-build cluster:
//! pulls build tasks from the master, builds them in supervised chroot
//! environments, uploads the artifacts and reports back.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod args;

use std::process::ExitCode;

use clap::Parser;
use pf_core::NodeConfig;
use tracing::error;

use crate::args::Args;

/// Exit code for configuration errors, distinct from runtime failures.
const CONFIG_ERROR_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);

    let config = match NodeConfig::load(args.config.as_deref(), args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            eprintln!("pfnode: configuration error: {e}");
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };

    let code = pf_engine::run(config).await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
