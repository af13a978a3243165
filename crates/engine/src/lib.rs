// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Build node engine: environment supervision, build drivers, the builder
//! worker loop and the node runtime.

pub mod builder;
pub mod drivers;
pub mod env_config;
pub mod environment;
pub mod heartbeat;
pub mod node;
pub mod shutdown;
pub mod stats;
pub mod supervisor;
pub mod task_logger;

pub use builder::{BuilderWorker, WorkerState};
pub use drivers::{BuildDriver, DriverCtx, ToolchainDrivers};
pub use env_config::{EnvConfig, EnvConfigError, EnvRecipe, OptValue, RepoConfig};
pub use environment::{BuildEnv, EnvError, EnvResult, ScrubScope};
pub use heartbeat::BuilderSupervisor;
pub use node::run;
pub use shutdown::Shutdown;
pub use stats::BuildStats;
pub use supervisor::{EnvLease, EnvSupervisor, EnvSupervisorError, Supervisors, ToolKind};
pub use task_logger::TaskLogger;
