// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    binary_rpm = { "bash-5.1-2.el8.x86_64.rpm", ArtifactKind::Rpm },
    source_rpm = { "bash-5.1-2.el8.src.rpm", ArtifactKind::Srpm },
    deb        = { "bash_5.1-2_amd64.deb", ArtifactKind::Rpm },
    build_log  = { "mock_build.1700000000.log", ArtifactKind::BuildLog },
    env_config = { "mock.1700000000.cfg", ArtifactKind::Config },
    stats      = { "build_stats.yml", ArtifactKind::Other },
)]
fn classifies_by_file_name(name: &str, expected: ArtifactKind) {
    assert_eq!(ArtifactKind::classify(name), expected);
}

#[test]
fn for_file_uses_the_file_name() {
    let artifact = Artifact::for_file(
        Path::new("/tmp/task/artifacts/bash-5.1-2.el8.src.rpm"),
        "/pulp/api/v3/artifacts/1/".to_string(),
        "deadbeef".to_string(),
    );
    assert_eq!(artifact.name, "bash-5.1-2.el8.src.rpm");
    assert_eq!(artifact.kind, ArtifactKind::Srpm);
    assert_eq!(artifact.href, "/pulp/api/v3/artifacts/1/");
}

#[test]
fn serializes_kind_as_type() {
    let artifact = Artifact::for_file(
        Path::new("build.log"),
        "href".to_string(),
        "aa".to_string(),
    );
    let value = serde_json::to_value(&artifact).unwrap();
    assert_eq!(value["type"], "build_log");
}
