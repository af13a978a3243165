// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pf_adapters::FakeMaster;

fn registry(states: Vec<Arc<WorkerState>>) -> WorkerRegistry {
    Arc::new(parking_lot::Mutex::new(states))
}

#[tokio::test]
async fn pings_with_the_active_task_ids() {
    let first = WorkerState::new("Builder-0");
    let second = WorkerState::new("Builder-1");
    first.set_task_for_tests(Some(42));

    let master = Arc::new(FakeMaster::new(Vec::new()));
    let shutdown = Shutdown::new();
    let supervisor = BuilderSupervisor::new(
        Arc::clone(&master) as Arc<dyn MasterApi>,
        registry(vec![first, second]),
        Arc::clone(&shutdown),
    )
    .with_interval(Duration::from_millis(10));

    let handle = tokio::spawn(supervisor.run());
    tokio::time::timeout(Duration::from_secs(5), async {
        while master.pings.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let pings = master.pings.lock();
    assert_eq!(pings[0], vec![42]);
}

#[tokio::test]
async fn idle_workers_produce_an_empty_active_set() {
    let master = Arc::new(FakeMaster::new(Vec::new()));
    let shutdown = Shutdown::new();
    let supervisor = BuilderSupervisor::new(
        Arc::clone(&master) as Arc<dyn MasterApi>,
        registry(vec![WorkerState::new("Builder-0")]),
        Arc::clone(&shutdown),
    )
    .with_interval(Duration::from_millis(10));

    let handle = tokio::spawn(supervisor.run());
    tokio::time::timeout(Duration::from_secs(5), async {
        while master.pings.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    shutdown.trigger();
    handle.await.unwrap();

    assert_eq!(master.pings.lock()[0], Vec::<i64>::new());
}

#[tokio::test]
async fn returns_when_every_worker_is_dead() {
    let state = WorkerState::new("Builder-0");
    state.mark_done_for_tests();

    let master = Arc::new(FakeMaster::new(Vec::new()));
    let supervisor = BuilderSupervisor::new(
        Arc::clone(&master) as Arc<dyn MasterApi>,
        registry(vec![state]),
        Shutdown::new(),
    )
    .with_interval(Duration::from_millis(10));

    // Returns on its own without a shutdown trigger.
    tokio::time::timeout(Duration::from_secs(5), supervisor.run())
        .await
        .unwrap();
    assert!(master.pings.lock().is_empty());
}

#[tokio::test]
async fn terminate_flag_ends_the_loop() {
    let master = Arc::new(FakeMaster::new(Vec::new()));
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let supervisor = BuilderSupervisor::new(
        Arc::clone(&master) as Arc<dyn MasterApi>,
        registry(vec![WorkerState::new("Builder-0")]),
        shutdown,
    )
    .with_interval(Duration::from_millis(10));

    tokio::time::timeout(Duration::from_secs(5), supervisor.run())
        .await
        .unwrap();
}
