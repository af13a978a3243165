// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn task_json() -> serde_json::Value {
    serde_json::json!({
        "id": 421,
        "build_id": 77,
        "arch": "x86_64",
        "ref": {
            "url": "https://git.example.org/packages/bash.git",
            "kind": "git",
            "git_ref": "el8-branch"
        },
        "platform": {
            "name": "el8",
            "type": "rpm",
            "data": {
                "timeout": 3600,
                "mock_dist": "el8",
                "definitions": {"dist": ".el8", "rhel": 8},
                "mock": {"chroot_setup_cmd": "install @buildsys-build"},
                "custom_logs": ["config\\.log"],
                "allow_sources_download": true
            }
        },
        "repositories": [
            {"name": "base", "url": "http://repo/base", "priority": 10}
        ],
        "created_by": {"name": "Build Bot", "email": "bot@example.org"}
    })
}

#[test]
fn deserializes_master_task_json() {
    let task: Task = serde_json::from_value(task_json()).unwrap();
    assert_eq!(task.id, 421);
    assert_eq!(task.reference.kind, RefKind::Git);
    assert_eq!(task.platform.kind, PlatformKind::Rpm);
    // Absent wire fields fall back to defaults.
    assert!(!task.is_secure_boot);
    assert!(task.srpm_hash.is_none());
    assert!(task.repositories[0].enabled);
}

#[test]
fn platform_data_accessors() {
    let task: Task = serde_json::from_value(task_json()).unwrap();
    let platform = &task.platform;

    assert_eq!(platform.build_timeout(), Some(3600));
    assert_eq!(platform.dist_tag(), Some("el8"));
    assert!(platform.allow_sources_download());
    assert_eq!(platform.custom_logs(), vec!["config\\.log".to_string()]);

    let defs = platform.definitions();
    assert_eq!(defs.get("dist").map(String::as_str), Some(".el8"));
    // Non-string definition values are rendered to their JSON form.
    assert_eq!(defs.get("rhel").map(String::as_str), Some("8"));

    let chroot = platform.chroot_options();
    assert_eq!(
        chroot.get("chroot_setup_cmd").and_then(|v| v.as_str()),
        Some("install @buildsys-build")
    );
}

#[test]
fn empty_platform_data_yields_defaults() {
    let mut json = task_json();
    json["platform"]["data"] = serde_json::json!({});
    let task: Task = serde_json::from_value(json).unwrap();
    assert_eq!(task.platform.build_timeout(), None);
    assert!(!task.platform.allow_sources_download());
    assert!(task.platform.definitions().is_empty());
    assert!(task.platform.custom_logs().is_empty());
}

#[yare::parameterized(
    git_tree      = { "https://git.example.org/p/bash.git", "git", true },
    external_srpm = { "https://example.org/bash-5.1-2.el8.src.rpm", "external_srpm", false },
    built_srpm    = { "https://store.example.org/built/bash.src.rpm", "built_srpm", false },
)]
fn srpm_build_required_by_ref_kind(url: &str, kind: &str, expected: bool) {
    let mut json = task_json();
    json["ref"]["url"] = serde_json::Value::String(url.to_string());
    json["ref"]["kind"] = serde_json::Value::String(kind.to_string());
    let task: Task = serde_json::from_value(json).unwrap();
    assert_eq!(task.srpm_build_required(), expected);
}

#[test]
fn created_by_full_name() {
    let task: Task = serde_json::from_value(task_json()).unwrap();
    assert_eq!(task.created_by.full_name(), "Build Bot <bot@example.org>");
}
