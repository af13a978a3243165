// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node runtime: owns the worker pool and keeps it alive.
//!
//! Startup order: reclaim the working directory, install signal handlers,
//! build the environment supervisors, spawn N workers plus the heartbeat
//! task, then monitor. The monitor replaces any worker whose task has
//! finished unexpectedly and respawns a dead heartbeat; it never dies on a
//! worker fault. A termination signal drains the pool: in-flight builds
//! complete and report before the process exits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pf_adapters::master::{MasterApi, MasterClient};
use pf_adapters::subprocess::{force_remove_tree, reclaim_ownership};
use pf_adapters::uploader::ContentStoreClient;
use pf_adapters::{ArtifactStore, RpmQuery};
use pf_core::NodeConfig;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::builder::{BuilderWorker, WorkerState};
use crate::drivers::{BuildDriver, DriverCtx, ToolchainDrivers};
use crate::heartbeat::{BuilderSupervisor, WorkerRegistry};
use crate::shutdown::Shutdown;
use crate::supervisor::Supervisors;

/// Worker liveness check cadence.
const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Bound on joining a dead or draining task.
const JOIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Run the node until a termination signal drains it. Returns the process
/// exit code.
pub async fn run(config: NodeConfig) -> i32 {
    run_with_shutdown(config, Shutdown::new()).await
}

pub(crate) async fn run_with_shutdown(config: NodeConfig, shutdown: Arc<Shutdown>) -> i32 {
    if let Err(e) = init_working_dir(&config).await {
        error!(error = %e, "cannot initialize the working directory");
        return 1;
    }
    if let Err(e) = install_signal_handlers(Arc::clone(&shutdown)) {
        error!(error = %e, "cannot install signal handlers");
        return 1;
    }

    let config = Arc::new(config);
    let supervisors = match Supervisors::init(&config) {
        Ok(supervisors) => supervisors,
        Err(e) => {
            error!(error = %e, "cannot initialize environment supervisors");
            return 1;
        }
    };
    let uploader: Arc<dyn ArtifactStore> = match ContentStoreClient::new(
        &config.store_url,
        &config.store_username,
        &config.store_password,
        config.store_chunk_size,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "cannot initialize the artifact store client");
            return 1;
        }
    };
    let driver: Arc<dyn BuildDriver> = Arc::new(ToolchainDrivers::new(DriverCtx::new(
        Arc::clone(&config),
        Arc::clone(&supervisors),
        Arc::new(RpmQuery),
    )));

    // Each worker owns a persistent master client; the heartbeat gets its
    // own as well.
    let deps = WorkerDeps {
        config: Arc::clone(&config),
        uploader,
        driver,
        shutdown: Arc::clone(&shutdown),
    };

    let registry: WorkerRegistry = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut workers = Vec::with_capacity(config.threads_count);
    for slot in 0..config.threads_count {
        match spawn_worker(slot, &deps) {
            Ok((state, handle)) => {
                registry.lock().push(Arc::clone(&state));
                workers.push(WorkerSlot { slot, handle });
            }
            Err(code) => return code,
        }
    }

    let mut heartbeat = match spawn_heartbeat(&deps, Arc::clone(&registry)) {
        Ok(handle) => handle,
        Err(code) => return code,
    };

    info!(
        node_id = %config.node_id,
        workers = config.threads_count,
        "build node started"
    );

    // The first tick fires immediately, so a pre-signalled node drains
    // without waiting a full interval.
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        interval.tick().await;

        if shutdown.terminated() {
            for slot in workers.drain(..) {
                join_bounded(slot.handle, &format!("Builder-{}", slot.slot)).await;
            }
            join_bounded(heartbeat, "builders supervisor").await;
            break;
        }

        for slot in workers.iter_mut() {
            if !slot.handle.is_finished() {
                continue;
            }
            info!(slot = slot.slot, "restarting builder");
            let finished = std::mem::replace(&mut slot.handle, tokio::spawn(async {}));
            join_bounded(finished, &format!("Builder-{}", slot.slot)).await;
            match spawn_worker(slot.slot, &deps) {
                Ok((state, handle)) => {
                    registry.lock()[slot.slot] = state;
                    slot.handle = handle;
                }
                Err(_) => {
                    error!(slot = slot.slot, "cannot respawn builder, retrying next cycle");
                }
            }
        }

        if heartbeat.is_finished() {
            join_bounded(heartbeat, "builders supervisor").await;
            info!("restarting builders supervisor");
            heartbeat = match spawn_heartbeat(&deps, Arc::clone(&registry)) {
                Ok(handle) => handle,
                Err(_) => {
                    error!("cannot respawn builders supervisor, retrying next cycle");
                    tokio::spawn(async {})
                }
            };
        }
    }

    info!("build node stopped");
    0
}

struct WorkerSlot {
    slot: usize,
    handle: JoinHandle<()>,
}

struct WorkerDeps {
    config: Arc<NodeConfig>,
    uploader: Arc<dyn ArtifactStore>,
    driver: Arc<dyn BuildDriver>,
    shutdown: Arc<Shutdown>,
}

fn spawn_worker(slot: usize, deps: &WorkerDeps) -> Result<(Arc<WorkerState>, JoinHandle<()>), i32> {
    let master = master_client(&deps.config)?;
    let worker = BuilderWorker::new(
        slot,
        Arc::clone(&deps.config),
        master,
        Arc::clone(&deps.uploader),
        Arc::clone(&deps.driver),
        Arc::clone(&deps.shutdown),
    );
    let state = worker.state();
    let handle = tokio::spawn(worker.run());
    Ok((state, handle))
}

fn spawn_heartbeat(deps: &WorkerDeps, registry: WorkerRegistry) -> Result<JoinHandle<()>, i32> {
    let master = master_client(&deps.config)?;
    let supervisor = BuilderSupervisor::new(master, registry, Arc::clone(&deps.shutdown));
    Ok(tokio::spawn(supervisor.run()))
}

fn master_client(config: &NodeConfig) -> Result<Arc<dyn MasterApi>, i32> {
    match MasterClient::new(&config.master_url, &config.jwt_token, config.request_timeout) {
        Ok(client) => Ok(Arc::new(client)),
        Err(e) => {
            error!(error = %e, "cannot initialize the master client");
            Err(1)
        }
    }
}

async fn join_bounded(handle: JoinHandle<()>, what: &str) {
    if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
        warn!(task = what, "did not stop within the join timeout");
    }
}

/// Reclaim the working tree and wipe per-worker directories left by a
/// previous run. Build artifacts can carry modes plain unlink cannot
/// remove, hence the escalating removal.
pub(crate) async fn init_working_dir(config: &NodeConfig) -> std::io::Result<()> {
    let working_dir = &config.working_dir;
    if working_dir.exists() {
        if let Err(e) = reclaim_ownership(working_dir).await {
            warn!(dir = %working_dir.display(), error = %e, "cannot reclaim working directory ownership");
        }
        for entry in std::fs::read_dir(working_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("builder-") {
                force_remove_tree(&entry.path())
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
            }
        }
    } else {
        create_private_dir(working_dir)?;
    }
    Ok(())
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o750))
}

/// SIGINT, SIGTERM and SIGUSR1 all drain the node: both flags are set so
/// workers finish their current task and stop acquiring new ones.
fn install_signal_handlers(shutdown: Arc<Shutdown>) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("terminating build node: SIGINT received"),
            _ = sigterm.recv() => info!("terminating build node: SIGTERM received"),
            _ = sigusr1.recv() => info!("terminating build node: SIGUSR1 received"),
        }
        shutdown.trigger();
    });
    Ok(())
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
