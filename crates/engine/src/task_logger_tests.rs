// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn writes_to_the_worker_log() {
    let dir = tempfile::tempdir().unwrap();
    let worker_log = dir.path().join("bt-Builder-0.log");
    let logger = TaskLogger::new(worker_log.clone());

    logger.info("starting Builder-0");
    logger.debug("there are no tasks to process");

    let content = std::fs::read_to_string(&worker_log).unwrap();
    assert!(content.contains("INFO    : starting Builder-0"));
    assert!(content.contains("DEBUG   : there are no tasks to process"));
}

#[test]
fn attached_task_log_mirrors_lines_until_detach() {
    let dir = tempfile::tempdir().unwrap();
    let worker_log = dir.path().join("bt-Builder-0.log");
    let task_log = dir.path().join("421/albs.1700000000.log");
    let logger = TaskLogger::new(worker_log.clone());

    logger.info("before attach");
    logger.attach_task(task_log.clone());
    assert_eq!(logger.task_log_path(), Some(task_log.clone()));
    logger.info("processing the task");
    logger.error("task 421 build failed");
    logger.detach_task();
    logger.info("after detach");

    let task_content = std::fs::read_to_string(&task_log).unwrap();
    assert!(!task_content.contains("before attach"));
    assert!(task_content.contains("processing the task"));
    assert!(task_content.contains("ERROR   : task 421 build failed"));
    assert!(!task_content.contains("after detach"));

    // The worker log received everything.
    let worker_content = std::fs::read_to_string(&worker_log).unwrap();
    assert!(worker_content.contains("before attach"));
    assert!(worker_content.contains("processing the task"));
    assert!(worker_content.contains("after detach"));
}

#[test]
fn logging_failures_do_not_panic() {
    // A worker log path under a file (not a directory) cannot be created.
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "x").unwrap();
    let logger = TaskLogger::new(blocker.join("bt-Builder-0.log"));
    logger.info("goes nowhere");
}
