// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debian build pipeline.
//!
//! The Debian toolchain builds from a git working tree: a source package
//! (`dpkg-source -b`) followed by a chrooted binary build (`pbuilder
//! --build`) against a leased base image. The base image is created or
//! updated under the supervisor's lease, so concurrent workers on one host
//! never regenerate the same image twice.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use pf_adapters::subprocess::run_captured;
use pf_core::Task;

use super::{DriverCtx, DriverError};
use crate::env_config::EnvRecipe;
use crate::stats::{measure_stage, BuildStats};
use crate::task_logger::TaskLogger;

/// Wall-clock bound for a binary build when the task carries no timeout.
const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(4 * 3600);

/// Debian build environment recipe: shell-style `KEY="VALUE"` assignments.
///
/// The fingerprint covers everything that affects chroot contents
/// (distribution, architecture, mirrors); the base image and apt cache
/// paths derive from the chroot name and are only rendered when the name
/// is known.
#[derive(Debug, Clone)]
pub struct PbuilderConfig {
    work_dir: std::path::PathBuf,
    entries: BTreeMap<String, String>,
}

impl PbuilderConfig {
    pub fn from_task(work_dir: std::path::PathBuf, task: &Task) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("DISTRIBUTION".to_string(), task.platform.name.clone());
        entries.insert("ARCHITECTURE".to_string(), deb_arch(&task.arch).to_string());
        entries.insert("APTCACHEHARDLINK".to_string(), "no".to_string());
        let mirrors: Vec<String> = task
            .repositories
            .iter()
            .filter(|repo| repo.enabled)
            .map(|repo| format!("deb [trusted=yes] {} ./", repo.url))
            .collect();
        if !mirrors.is_empty() {
            entries.insert("OTHERMIRROR".to_string(), mirrors.join(" | "));
        }
        Self { work_dir, entries }
    }
}

impl EnvRecipe for PbuilderConfig {
    fn render(&self, root: Option<&str>) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(&format!("{key}=\"{value}\"\n"));
        }
        if let Some(root) = root {
            let base = self.work_dir.join(format!("{root}.base.tgz"));
            let aptcache = self.work_dir.join(format!("{root}.aptcache"));
            let buildplace = self.work_dir.join(format!("{root}.build"));
            out.push_str(&format!("BASETGZ=\"{}\"\n", base.display()));
            out.push_str(&format!("APTCACHE=\"{}\"\n", aptcache.display()));
            out.push_str(&format!("BUILDPLACE=\"{}\"\n", buildplace.display()));
        }
        out
    }
}

/// Map an RPM-style architecture to its Debian name.
fn deb_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "i386" | "i486" | "i586" | "i686" => "i386",
        "armhfp" => "armhf",
        other => other,
    }
}

pub(crate) async fn build(
    ctx: &DriverCtx,
    task: &Task,
    worker: &str,
    task_dir: &Path,
    artifacts_dir: &Path,
    logger: &TaskLogger,
    stats: &mut BuildStats,
) -> Result<(), DriverError> {
    if !matches!(task.reference.kind, pf_core::RefKind::Git) {
        return Err(DriverError::Build(
            "debian builds take a git reference".to_string(),
        ));
    }

    let sources_dir = task_dir.join("deb_sources");
    std::fs::create_dir_all(&sources_dir)
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
            &sources_dir,
        )
        .await
        .map_err(|e| DriverError::Build(format!("source checkout failed: {e}")))?;
    logger.info(&format!("git commit id: {commit}"));

    let recipe = PbuilderConfig::from_task(ctx.supervisors.deb.storage_dir().to_owned(), task);
    let lease = ctx
        .supervisors
        .deb
        .environment(&recipe, worker)
        .await
        .map_err(|e| DriverError::Build(format!("cannot acquire build environment: {e}")))?;

    let result = build_in_lease(ctx, task, task_dir, artifacts_dir, logger, stats, &sources_dir, &lease)
        .await;

    if let Err(e) = ctx.supervisors.deb.release(&lease).await {
        logger.error(&format!("cannot release build environment: {e}"));
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn build_in_lease(
    ctx: &DriverCtx,
    task: &Task,
    task_dir: &Path,
    artifacts_dir: &Path,
    logger: &TaskLogger,
    stats: &mut BuildStats,
    sources_dir: &Path,
    lease: &crate::supervisor::EnvLease,
) -> Result<(), DriverError> {
    let config_file = lease.config_path.to_string_lossy().into_owned();
    let work_dir = ctx.supervisors.deb.storage_dir();
    let base_tgz = work_dir.join(format!("{}.base.tgz", lease.root));

    // Create the base image on first use, refresh it otherwise.
    let action = if base_tgz.exists() { "--update" } else { "--create" };
    logger.info(&format!("preparing debian build environment ({action})"));
    let env_setup = run_captured(
        "sudo",
        &["-n", "pbuilder", action, "--configfile", &config_file, "--override-config"],
        None,
        Some(DEFAULT_BUILD_TIMEOUT),
    )
    .await
    .map_err(|e| DriverError::Build(format!("cannot initialize debian environment: {e}")))?;
    stage_output_log(artifacts_dir, "pbuilder_env", &env_setup.stdout, &env_setup.stderr);
    if !env_setup.success() {
        return Err(DriverError::Build(format!(
            "cannot initialize debian environment: exit code {}",
            env_setup.exit_code
        )));
    }

    // Source package from the working tree.
    logger.info("building debian source package");
    let sources_str = sources_dir.to_string_lossy().into_owned();
    let dsc_build = run_captured(
        "dpkg-source",
        &["-b", &sources_str],
        Some(task_dir),
        Some(Duration::from_secs(600)),
    )
    .await
    .map_err(|e| DriverError::Build(format!("source package build failed: {e}")))?;
    if !dsc_build.success() {
        stage_output_log(artifacts_dir, "dpkg_source", &dsc_build.stdout, &dsc_build.stderr);
        return Err(DriverError::Build(format!(
            "source package build failed: exit code {}",
            dsc_build.exit_code
        )));
    }
    let dsc = find_by_extension(task_dir, "dsc")
        .ok_or_else(|| DriverError::Build("source package (.dsc) is not found".to_string()))?;

    // Binary build inside the chroot.
    logger.info("starting debian binary build");
    let result_dir = task_dir.join("deb_result");
    std::fs::create_dir_all(&result_dir)
        .map_err(|e| DriverError::Build(format!("cannot create result directory: {e}")))?;
    let timeout = task
        .platform
        .build_timeout()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_BUILD_TIMEOUT);
    let result_str = result_dir.to_string_lossy().into_owned();
    let dsc_str = dsc.to_string_lossy().into_owned();

    let binary_build = measure_stage(
        stats,
        "build_binary",
        run_captured(
            "sudo",
            &[
                "-n",
                "pbuilder",
                "--build",
                "--configfile",
                &config_file,
                "--buildresult",
                &result_str,
                &dsc_str,
            ],
            None,
            Some(timeout),
        ),
    )
    .await
    .map_err(|e| DriverError::Build(format!("debian build failed: {e}")))?;
    stage_output_log(artifacts_dir, "pbuilder_build", &binary_build.stdout, &binary_build.stderr);
    save_deb_artifacts(&result_dir, artifacts_dir, lease)
        .map_err(|e| DriverError::Build(format!("cannot save artifacts: {e}")))?;
    if !binary_build.success() {
        return Err(DriverError::Build(format!(
            "debian build failed: exit code {}",
            binary_build.exit_code
        )));
    }
    logger.info("debian build completed");
    Ok(())
}

/// Stage packages, source control files and logs from the result
/// directory, plus the rendered environment config.
fn save_deb_artifacts(
    result_dir: &Path,
    artifacts_dir: &Path,
    lease: &crate::supervisor::EnvLease,
) -> std::io::Result<()> {
    let ts = pf_core::time_fmt::now_ts();
    if let Ok(config) = std::fs::read_to_string(&lease.config_path) {
        std::fs::write(artifacts_dir.join(format!("pbuilder.{ts}.cfg")), config)?;
    }
    let Ok(entries) = std::fs::read_dir(result_dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let keep = name.ends_with(".deb")
            || name.ends_with(".dsc")
            || name.ends_with(".changes")
            || name.ends_with(".build");
        if !keep {
            continue;
        }
        let dst = if name.ends_with(".build") {
            artifacts_dir.join(format!("pbuilder_{name}.{ts}.log"))
        } else {
            artifacts_dir.join(&name)
        };
        std::fs::copy(&path, &dst)?;
    }
    Ok(())
}

/// Write one captured command output into the artifacts directory.
fn stage_output_log(artifacts_dir: &Path, name: &str, stdout: &str, stderr: &str) {
    let ts = pf_core::time_fmt::now_ts();
    let path = artifacts_dir.join(format!("{name}.{ts}.log"));
    let mut content = String::new();
    if !stdout.is_empty() {
        content.push_str(stdout);
    }
    if !stderr.is_empty() {
        content.push_str(stderr);
    }
    if let Err(e) = std::fs::write(&path, content) {
        tracing::warn!(path = %path.display(), error = %e, "cannot stage command output log");
    }
}

fn find_by_extension(dir: &Path, extension: &str) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut matches: Vec<std::path::PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == extension))
        .collect();
    matches.sort();
    matches.into_iter().next()
}

#[cfg(test)]
#[path = "deb_tests.rs"]
mod tests;
