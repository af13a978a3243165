// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builder supervisor: heartbeats active work to the master.
//!
//! Every minute the supervisor reads each worker's liveness and held task
//! id and posts the active set to the master. When every worker is dead it
//! returns, and the node runtime respawns it alongside fresh workers.

use std::sync::Arc;
use std::time::Duration;

use pf_adapters::master::MasterApi;
use tracing::{debug, warn};

use crate::builder::WorkerState;
use crate::shutdown::Shutdown;

/// Heartbeat interval.
const PING_INTERVAL: Duration = Duration::from_secs(60);

/// The shared registry of worker states; the node runtime replaces entries
/// when it respawns workers.
pub type WorkerRegistry = Arc<parking_lot::Mutex<Vec<Arc<WorkerState>>>>;

pub struct BuilderSupervisor {
    master: Arc<dyn MasterApi>,
    workers: WorkerRegistry,
    shutdown: Arc<Shutdown>,
    interval: Duration,
}

impl BuilderSupervisor {
    pub fn new(master: Arc<dyn MasterApi>, workers: WorkerRegistry, shutdown: Arc<Shutdown>) -> Self {
        Self {
            master,
            workers,
            shutdown,
            interval: PING_INTERVAL,
        }
    }

    /// Shrink the ping interval; tests use milliseconds.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Loop until the terminate flag is set or every worker is dead.
    pub async fn run(self) {
        while !self.shutdown.terminated() {
            let (alive, active_tasks) = {
                let workers = self.workers.lock();
                let alive = workers.iter().filter(|w| w.is_alive()).count();
                let mut active: Vec<i64> =
                    workers.iter().filter_map(|w| w.current_task_id()).collect();
                active.sort_unstable();
                active.dedup();
                (alive, active)
            };

            if alive == 0 {
                warn!("all builders are dead, exiting");
                return;
            }

            debug!(?active_tasks, "sending active tasks");
            self.master.ping(&active_tasks).await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
