// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPM build pipeline.
//!
//! Two stages: build a src-RPM from the prepared sources in one leased
//! environment, then rebuild the binary RPMs from that src-RPM in another.
//! Architecture exclusion is checked twice: against the src-RPM metadata
//! before the rebuild, and against the build log when the src-RPM stage
//! itself fails.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use pf_adapters::sources;
use pf_core::{archcheck, Task};
use regex::Regex;

use super::{locate_spec_file, DriverCtx, DriverError};
use crate::env_config::EnvConfig;
use crate::environment::{BuildEnv, EnvError, EnvResult};
use crate::stats::{measure_stage, BuildStats};
use crate::task_logger::TaskLogger;

static SPEC_REMOTE_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:Source|Patch)\d*:\s*((?:https?|ftp)://\S+)\s*$")
        .expect("constant regex pattern is valid")
});

pub(crate) async fn build(
    ctx: &DriverCtx,
    task: &Task,
    worker: &str,
    task_dir: &Path,
    artifacts_dir: &Path,
    logger: &TaskLogger,
    stats: &mut BuildStats,
) -> Result<(), DriverError> {
    let (sources_dir, spec_file) = prepare_sources(ctx, task, task_dir, logger).await?;
    build_packages(
        ctx,
        task,
        worker,
        task_dir,
        artifacts_dir,
        logger,
        stats,
        &sources_dir,
        &spec_file,
    )
    .await
}

/// Produce a build sources directory and a spec file, from git or a
/// src-RPM. The spec lives in the tree root (or `SPECS/`); the tarballs and
/// patches the build consumes live next to it, or under `SOURCES/` when the
/// tree carries one (sidecar downloads typically land there).
async fn prepare_sources(
    ctx: &DriverCtx,
    task: &Task,
    task_dir: &Path,
    logger: &TaskLogger,
) -> Result<(PathBuf, PathBuf), DriverError> {
    let tree = if task.srpm_build_required() {
        let git_sources_dir = task_dir.join("git_sources");
        std::fs::create_dir_all(&git_sources_dir)
            .map_err(|e| DriverError::Build(format!("cannot create sources directory: {e}")))?;

        logger.info(&format!(
            "checking out {} from {}",
            task.reference.git_ref.as_deref().unwrap_or("HEAD"),
            task.reference.url
        ));
        let commit = ctx
            .git
            .checkout(
                &task.reference.url,
                task.reference.git_ref.as_deref(),
                &git_sources_dir,
            )
            .await
            .map_err(|e| DriverError::Build(format!("source checkout failed: {e}")))?;
        logger.info(&format!("git commit id: {commit}"));

        let fetched = ctx
            .sidecar
            .download_all(&git_sources_dir)
            .await
            .map_err(|e| DriverError::Build(format!("sidecar source download failed: {e}")))?;
        if fetched > 0 {
            logger.info(&format!("downloaded {fetched} sidecar source file(s)"));
        }
        git_sources_dir
    } else {
        let srpm_dir = task_dir.join("srpm_sources");
        std::fs::create_dir_all(&srpm_dir)
            .map_err(|e| DriverError::Build(format!("cannot create sources directory: {e}")))?;

        logger.info(&format!(
            "repacking previously built src-RPM {}",
            task.reference.url
        ));
        let srpm = sources::download_file(&ctx.http, &task.reference.url, &srpm_dir)
            .await
            .map_err(|e| DriverError::Build(format!("src-RPM download failed: {e}")))?;
        sources::unpack_src_rpm(&srpm, &srpm_dir)
            .await
            .map_err(|e| DriverError::Build(format!("src-RPM unpack failed: {e}")))?;
        logger.info("sources are prepared");
        srpm_dir
    };

    let spec_file = locate_spec_file(&tree)?;
    let sources_subdir = tree.join("SOURCES");
    let build_sources = if sources_subdir.is_dir() {
        sources_subdir
    } else {
        tree
    };
    if task.platform.allow_sources_download() {
        download_missing_remote_sources(ctx, &spec_file, &build_sources, logger).await?;
    }
    Ok((build_sources, spec_file))
}

/// Fetch remote `Source:`/`Patch:` URLs that are not yet present in the
/// sources directory. Sidecar downloads ran first; this pass only fills
/// gaps.
async fn download_missing_remote_sources(
    ctx: &DriverCtx,
    spec_file: &Path,
    sources_dir: &Path,
    logger: &TaskLogger,
) -> Result<(), DriverError> {
    let spec = std::fs::read_to_string(spec_file)
        .map_err(|e| DriverError::Build(format!("cannot read spec file: {e}")))?;
    for caps in SPEC_REMOTE_SOURCE.captures_iter(&spec) {
        let url = &caps[1];
        let Some(file_name) = url.split('/').next_back().filter(|n| !n.is_empty()) else {
            continue;
        };
        if sources_dir.join(file_name).exists() {
            continue;
        }
        logger.debug(&format!("downloading remote source {url}"));
        sources::download_file(&ctx.http, url, sources_dir)
            .await
            .map_err(|e| DriverError::Build(format!("remote source download failed: {e}")))?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn build_packages(
    ctx: &DriverCtx,
    task: &Task,
    worker: &str,
    task_dir: &Path,
    artifacts_dir: &Path,
    logger: &TaskLogger,
    stats: &mut BuildStats,
    sources_dir: &Path,
    spec_file: &Path,
) -> Result<(), DriverError> {
    let definitions = task.platform.definitions();
    let timeout = task.platform.build_timeout();

    // Stage one: src-RPM.
    logger.info("starting src-RPM build");
    let srpm_result_dir = task_dir.join("srpm_result");
    std::fs::create_dir_all(&srpm_result_dir)
        .map_err(|e| DriverError::Build(format!("cannot create result directory: {e}")))?;

    let env_config = EnvConfig::from_task(&ctx.config, task)
        .map_err(|e| DriverError::Build(format!("environment configuration failed: {e}")))?;
    let env = acquire(ctx, &env_config, worker).await?;
    let srpm_build = measure_stage(
        stats,
        "build_srpm",
        env.build_srpm(spec_file, sources_dir, &srpm_result_dir, &definitions, timeout),
    )
    .await;
    let release = env.release().await;
    log_release_error(logger, release);

    let srpm_result = match srpm_build {
        Ok(result) => {
            save_build_artifacts(&result, artifacts_dir, true)
                .map_err(|e| DriverError::Build(format!("cannot save artifacts: {e}")))?;
            result
        }
        Err(e) => {
            if let Some(result) = e.result() {
                let _ = save_build_artifacts(result, artifacts_dir, true);
                if let Some(reason) = excluded_from_build_log(result) {
                    return Err(DriverError::Excluded(reason));
                }
            }
            return Err(DriverError::Build(classified_failure("src-RPM build failed", &e)));
        }
    };

    let srpm_path = srpm_result
        .srpm()
        .ok_or_else(|| DriverError::Build("src-RPM is not found in the result directory".to_string()))?;
    logger.info(&format!("src-RPM {} was successfully built", srpm_path.display()));

    // The src-RPM metadata may exclude this architecture outright.
    let constraints = ctx
        .inspector
        .arch_constraints(&srpm_path)
        .await
        .map_err(|e| DriverError::Build(format!("src-RPM metadata query failed: {e}")))?;
    if let Some(reason) = constraints.excluded_reason(&task.arch) {
        return Err(DriverError::Excluded(reason));
    }

    // Stage two: binary RPMs, in a fresh lease.
    logger.info("starting RPM build");
    let rpm_result_dir = task_dir.join("rpm_result");
    std::fs::create_dir_all(&rpm_result_dir)
        .map_err(|e| DriverError::Build(format!("cannot create result directory: {e}")))?;

    let env = acquire(ctx, &env_config, worker).await?;
    let rebuild = measure_stage(
        stats,
        "build_binary",
        env.rebuild(&srpm_path, &rpm_result_dir, &definitions, timeout),
    )
    .await;
    let release = env.release().await;
    log_release_error(logger, release);

    match rebuild {
        Ok(result) => {
            save_build_artifacts(&result, artifacts_dir, false)
                .map_err(|e| DriverError::Build(format!("cannot save artifacts: {e}")))?;
        }
        Err(e) => {
            if let Some(result) = e.result() {
                let _ = save_build_artifacts(result, artifacts_dir, false);
            }
            return Err(DriverError::Build(classified_failure("RPM build failed", &e)));
        }
    }
    logger.info("RPM build completed");
    Ok(())
}

async fn acquire(
    ctx: &DriverCtx,
    env_config: &EnvConfig,
    worker: &str,
) -> Result<BuildEnv, DriverError> {
    let lease = ctx
        .supervisors
        .rpm
        .environment(env_config, worker)
        .await
        .map_err(|e| DriverError::Build(format!("cannot acquire build environment: {e}")))?;
    Ok(BuildEnv::new(std::sync::Arc::clone(&ctx.supervisors.rpm), lease))
}

fn log_release_error(logger: &TaskLogger, result: Result<(), crate::supervisor::EnvSupervisorError>) {
    if let Err(e) = result {
        logger.error(&format!("cannot release build environment: {e}"));
    }
}

/// Failed tool run classified through its build log: a recognized timeout
/// line refines the reason.
fn classified_failure(prefix: &str, error: &EnvError) -> String {
    if let Some(result) = error.result() {
        for log in result.logs() {
            if log.file_name().is_none_or(|n| n != "build.log") {
                continue;
            }
            if let Some(reason) = scan_lines(&log, archcheck::timeout_in_line) {
                return format!("{prefix}: {reason}");
            }
        }
    }
    format!("{prefix}: {error}")
}

/// An src-RPM stage failure caused by an excluded architecture is not a
/// node failure.
fn excluded_from_build_log(result: &EnvResult) -> Option<String> {
    for log in result.logs() {
        if log.file_name().is_none_or(|n| n != "build.log") {
            continue;
        }
        if let Ok(Some(reason)) = archcheck::scan_log_for_exclusion(&log) {
            return Some(reason);
        }
    }
    None
}

fn scan_lines(path: &Path, detect: impl Fn(&str) -> Option<String>) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().find_map(detect)
}

/// Stage a finished tool run into the artifacts directory: the rendered
/// config, the packages, every log (renamed with the stage suffix and a
/// timestamp), and captured stderr.
pub(crate) fn save_build_artifacts(
    result: &EnvResult,
    artifacts_dir: &Path,
    srpm_stage: bool,
) -> std::io::Result<()> {
    let suffix = if srpm_stage { ".srpm" } else { "" };
    let ts = pf_core::time_fmt::now_ts();

    std::fs::write(
        artifacts_dir.join(format!("mock{suffix}.{ts}.cfg")),
        &result.config,
    )?;

    if let Some(srpm) = result.srpm() {
        if let Some(name) = srpm.file_name() {
            let dst = artifacts_dir.join(name);
            // Artifact saving runs after both stages; the src-RPM from the
            // first stage may already be in place.
            if dst.exists() {
                std::fs::remove_file(&dst)?;
            }
            link_or_copy(&srpm, &dst)?;
        }
    }
    for rpm in result.rpms() {
        if let Some(name) = rpm.file_name() {
            link_or_copy(&rpm, &artifacts_dir.join(name))?;
        }
    }
    for log in result.logs() {
        let Some(stem) = log.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let dst = artifacts_dir.join(format!("mock_{stem}{suffix}.{ts}.log"));
        link_or_copy(&log, &dst)?;
    }
    if !result.stderr.is_empty() {
        std::fs::write(
            artifacts_dir.join(format!("mock_stderr{suffix}.{ts}.log")),
            &result.stderr,
        )?;
    }
    Ok(())
}

/// The tool sometimes leaves files with modes hard links cannot span; fall
/// back to a plain copy.
fn link_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    if std::fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
#[path = "rpm_tests.rs"]
mod tests;
