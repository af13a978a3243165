// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders for tests in this crate and downstream crates.

use serde_json::Map;

use crate::task::{
    PlatformKind, RefKind, Task, TaskCreatedBy, TaskPlatform, TaskRef, TaskRepo,
};

/// A minimal RPM git-ref task for worker and driver tests.
pub fn sample_task(id: i64) -> Task {
    Task {
        id,
        build_id: id * 10,
        arch: "x86_64".to_string(),
        reference: TaskRef {
            url: "https://git.example.org/packages/hello.git".to_string(),
            kind: RefKind::Git,
            git_ref: Some("main".to_string()),
            commit_hash: None,
        },
        platform: TaskPlatform {
            name: "el8".to_string(),
            kind: PlatformKind::Rpm,
            data: Map::new(),
        },
        repositories: vec![TaskRepo {
            name: "base".to_string(),
            url: "http://repo.example.org/base".to_string(),
            priority: 10,
            enabled: true,
        }],
        created_by: TaskCreatedBy {
            name: "Build Bot".to_string(),
            email: "bot@example.org".to_string(),
        },
        srpm_hash: None,
        commit_provenance: None,
        is_secure_boot: false,
    }
}

/// Same task shape pointed at a pre-built src-RPM.
pub fn sample_srpm_task(id: i64, srpm_url: &str) -> Task {
    let mut task = sample_task(id);
    task.reference = TaskRef {
        url: srpm_url.to_string(),
        kind: RefKind::ExternalSrpm,
        git_ref: None,
        commit_hash: None,
    };
    task
}
