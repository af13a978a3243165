// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn current_uses_this_process_pid() {
    let owner = LeaseOwner::current("Builder-3");
    assert_eq!(owner.pid, std::process::id());
    assert_eq!(owner.thread, "Builder-3");
}

#[test]
fn serialization_is_deterministic() {
    let owner = LeaseOwner {
        pid: 42,
        thread: "Builder-0".to_string(),
    };
    let first = serde_json::to_string(&owner).unwrap();
    let second = serde_json::to_string(&owner).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, r#"{"pid":42,"thread":"Builder-0"}"#);
}

#[test]
fn round_trips_through_json() {
    let owner = LeaseOwner::current("Builder-1");
    let raw = serde_json::to_string(&owner).unwrap();
    let back: LeaseOwner = serde_json::from_str(&raw).unwrap();
    assert_eq!(back, owner);
}
