// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::environment::EnvResult;

fn result_over(dir: &Path, stderr: &str) -> EnvResult {
    EnvResult {
        command: "mock --rebuild hello.src.rpm".to_string(),
        exit_code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
        config: "config_opts[\"root\"] = \"h.0\"\n".to_string(),
        resultdir: Some(dir.to_owned()),
    }
}

#[test]
fn remote_source_urls_are_extracted_from_spec_text() {
    let spec = "\
Name: hello
Source0: https://example.org/hello-1.0.tar.gz
Source1: hello.sysconfig
Patch0: ftp://example.org/fix.patch
Patch1: local.patch
";
    let urls: Vec<&str> = SPEC_REMOTE_SOURCE
        .captures_iter(spec)
        .map(|c| c.get(1).unwrap().as_str())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://example.org/hello-1.0.tar.gz",
            "ftp://example.org/fix.patch"
        ]
    );
}

#[test]
fn staging_copies_packages_configs_and_renamed_logs() {
    let dir = tempfile::tempdir().unwrap();
    let result_dir = dir.path().join("result");
    let artifacts_dir = dir.path().join("artifacts");
    std::fs::create_dir_all(&result_dir).unwrap();
    std::fs::create_dir_all(&artifacts_dir).unwrap();

    std::fs::write(result_dir.join("hello-1-1.el8.src.rpm"), "srpm").unwrap();
    std::fs::write(result_dir.join("hello-1-1.el8.x86_64.rpm"), "rpm").unwrap();
    std::fs::write(result_dir.join("build.log"), "log").unwrap();
    std::fs::write(result_dir.join("root.log"), "log").unwrap();

    let result = EnvResult {
        exit_code: 0,
        ..result_over(&result_dir, "mock stderr text")
    };
    save_build_artifacts(&result, &artifacts_dir, true).unwrap();

    let names: Vec<String> = std::fs::read_dir(&artifacts_dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n == "hello-1-1.el8.src.rpm"));
    assert!(names.iter().any(|n| n == "hello-1-1.el8.x86_64.rpm"));
    assert!(names.iter().any(|n| n.starts_with("mock.srpm.") && n.ends_with(".cfg")));
    assert!(names.iter().any(|n| n.starts_with("mock_build.srpm.") && n.ends_with(".log")));
    assert!(names.iter().any(|n| n.starts_with("mock_root.srpm.") && n.ends_with(".log")));
    assert!(names.iter().any(|n| n.starts_with("mock_stderr.srpm.") && n.ends_with(".log")));
}

#[test]
fn staging_twice_replaces_the_srpm() {
    // Artifact saving runs after the src-RPM stage and again after the
    // rebuild, which rediscovers the same src-RPM.
    let dir = tempfile::tempdir().unwrap();
    let result_dir = dir.path().join("result");
    let artifacts_dir = dir.path().join("artifacts");
    std::fs::create_dir_all(&result_dir).unwrap();
    std::fs::create_dir_all(&artifacts_dir).unwrap();
    std::fs::write(result_dir.join("hello-1-1.el8.src.rpm"), "srpm").unwrap();

    let result = EnvResult {
        exit_code: 0,
        stderr: String::new(),
        ..result_over(&result_dir, "")
    };
    save_build_artifacts(&result, &artifacts_dir, true).unwrap();
    save_build_artifacts(&result, &artifacts_dir, false).unwrap();
    assert!(artifacts_dir.join("hello-1-1.el8.src.rpm").exists());
}

#[test]
fn excluded_arch_is_detected_in_the_build_log() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("build.log"),
        "Executing(%prep)\nerror: Architecture is not included: x86_64\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("root.log"), "clean root log\n").unwrap();

    let result = result_over(dir.path(), "");
    let reason = excluded_from_build_log(&result).unwrap();
    assert_eq!(reason, "architecture \"x86_64\" is excluded");
}

#[test]
fn ordinary_failures_are_not_excluded() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("build.log"),
        "error: Bad exit status from /var/tmp/rpm-tmp (%build)\n",
    )
    .unwrap();
    let result = result_over(dir.path(), "");
    assert!(excluded_from_build_log(&result).is_none());
}

#[test]
fn timeout_refines_the_failure_reason() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("build.log"),
        "commandTimeoutExpired: Timeout(3600) expired\n",
    )
    .unwrap();
    let result = result_over(dir.path(), "");
    let error = EnvError::CommandFailed(Box::new(result));

    let reason = classified_failure("RPM build failed", &error);
    assert_eq!(reason, "RPM build failed: build timeout 3600 second(s) expired");
}

#[test]
fn failures_without_a_timeout_keep_the_generic_reason() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("build.log"), "error: something else\n").unwrap();
    let result = result_over(dir.path(), "");
    let error = EnvError::CommandFailed(Box::new(result));

    let reason = classified_failure("RPM build failed", &error);
    assert!(reason.starts_with("RPM build failed: command"));
}
