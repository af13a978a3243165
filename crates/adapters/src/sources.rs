// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source acquisition: mirrored git checkouts, sidecar blob downloads and
//! src-RPM unpacking.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use fs2::FileExt;
use pf_core::CommandError;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::subprocess::{run_captured, CommandOutput, SubprocessError, GIT_TIMEOUT, UNPACK_TIMEOUT};

static SIDECAR_METADATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\..*\.metadata$").expect("constant regex pattern is valid"));

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Subprocess(#[from] SubprocessError),

    #[error("malformed sidecar metadata line: {0:?}")]
    BadMetadata(String),

    #[error("cannot derive a file name from {0}")]
    NoFileName(String),

    #[error("download of {url} returned HTTP {status}")]
    DownloadStatus { url: String, status: u16 },
}

fn command_result(output: CommandOutput) -> Result<CommandOutput, SourceError> {
    if output.success() {
        Ok(output)
    } else {
        Err(SourceError::Command(output.into_error()))
    }
}

/// Mirrored git checkouts.
///
/// Concurrent checkouts of one URL on a host share a bare mirror under the
/// cache directory; a per-URL file lock serializes mirror creation and
/// refresh. Task working trees are cloned from the mirror.
#[derive(Debug, Clone)]
pub struct GitSourceFetcher {
    repos_cache_dir: PathBuf,
    locks_dir: PathBuf,
}

impl GitSourceFetcher {
    pub fn new(repos_cache_dir: PathBuf, locks_dir: PathBuf) -> Self {
        Self {
            repos_cache_dir,
            locks_dir,
        }
    }

    /// Obtain a working tree of `url` at `git_ref` in `dest`.
    ///
    /// Returns the checked-out HEAD commit id.
    pub async fn checkout(
        &self,
        url: &str,
        git_ref: Option<&str>,
        dest: &Path,
    ) -> Result<String, SourceError> {
        let key = url_key(url);
        let mirror_dir = self.repos_cache_dir.join(format!("{key}.git"));
        std::fs::create_dir_all(&self.repos_cache_dir)?;
        std::fs::create_dir_all(&self.locks_dir)?;

        // Held for the whole mirror refresh; released on drop.
        let _mirror_lock = self.acquire_mirror_lock(&key).await?;

        if mirror_dir.exists() {
            debug!(url, "refreshing mirror");
            let mirror = mirror_dir.to_string_lossy().into_owned();
            command_result(
                run_captured(
                    "git",
                    &["--git-dir", &mirror, "fetch", "--prune", "origin"],
                    None,
                    Some(GIT_TIMEOUT),
                )
                .await?,
            )?;
        } else {
            info!(url, "creating mirror");
            let mirror = mirror_dir.to_string_lossy().into_owned();
            command_result(
                run_captured(
                    "git",
                    &["clone", "--mirror", url, &mirror],
                    None,
                    Some(GIT_TIMEOUT),
                )
                .await?,
            )?;
        }

        let mirror = mirror_dir.to_string_lossy().into_owned();
        let dest_str = dest.to_string_lossy().into_owned();
        command_result(
            run_captured(
                "git",
                &["clone", &mirror, &dest_str],
                None,
                Some(GIT_TIMEOUT),
            )
            .await?,
        )?;

        if let Some(reference) = git_ref {
            command_result(
                run_captured(
                    "git",
                    &["-C", &dest_str, "checkout", reference],
                    None,
                    Some(GIT_TIMEOUT),
                )
                .await?,
            )?;
        }

        let head = command_result(
            run_captured(
                "git",
                &["-C", &dest_str, "rev-parse", "HEAD"],
                None,
                Some(GIT_TIMEOUT),
            )
            .await?,
        )?;
        Ok(head.stdout.trim().to_string())
    }

    /// Acquire the per-URL mirror lock off the async runtime.
    async fn acquire_mirror_lock(&self, key: &str) -> Result<std::fs::File, SourceError> {
        let lock_path = self.locks_dir.join(format!("{key}.lock"));
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;
        Ok(file)
    }
}

/// Hash-derived cache key for one repository URL.
fn url_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

/// Downloads out-of-tree sources referenced by a hidden sidecar metadata
/// file: one `(checksum, relative_path)` pair per line, fetched from a
/// content-addressed blob store.
pub struct SidecarDownloader {
    blob_base_url: String,
    client: reqwest::Client,
}

impl SidecarDownloader {
    pub fn new(blob_base_url: &str) -> Self {
        Self {
            blob_base_url: blob_base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// The hidden metadata file of a checked-out tree, if any.
    pub fn find_metadata_file(sources_dir: &Path) -> Option<PathBuf> {
        let entries = std::fs::read_dir(sources_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if SIDECAR_METADATA.is_match(&name.to_string_lossy()) {
                return Some(entry.path());
            }
        }
        None
    }

    /// Download every listed blob into its path under `sources_dir`.
    /// Returns the number of files fetched (zero when there is no sidecar).
    pub async fn download_all(&self, sources_dir: &Path) -> Result<usize, SourceError> {
        let Some(metadata_file) = Self::find_metadata_file(sources_dir) else {
            return Ok(0);
        };
        let raw = std::fs::read_to_string(&metadata_file)?;
        let mut count = 0usize;
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut parts = trimmed.split_whitespace();
            let (Some(checksum), Some(rel_path), None) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(SourceError::BadMetadata(trimmed.to_string()));
            };
            let target = sources_dir.join(rel_path);
            let url = format!("{}/{checksum}", self.blob_base_url);
            debug!(url, target = %target.display(), "downloading sidecar source");
            download_to(&self.client, &url, &target).await?;
            count += 1;
        }
        Ok(count)
    }
}

/// Download `url` into `dir`, deriving the file name from the URL path.
/// `file://` URLs are copied straight from the local filesystem.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
) -> Result<PathBuf, SourceError> {
    let name = url
        .split('/')
        .next_back()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SourceError::NoFileName(url.to_string()))?;
    let target = dir.join(name);
    if let Some(local) = url.strip_prefix("file://") {
        std::fs::copy(local, &target)?;
        return Ok(target);
    }
    download_to(client, url, &target).await?;
    Ok(target)
}

async fn download_to(
    client: &reqwest::Client,
    url: &str,
    target: &Path,
) -> Result<(), SourceError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(SourceError::DownloadStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let bytes = response.bytes().await?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, &bytes)?;
    Ok(())
}

/// Unpack a src-RPM into `dest` through the system unpack utilities.
pub async fn unpack_src_rpm(srpm: &Path, dest: &Path) -> Result<(), SourceError> {
    std::fs::create_dir_all(dest)?;
    let srpm_str = srpm.to_string_lossy();
    // pipefail so a broken src-RPM fails the pipeline even when cpio
    // swallows the empty stream.
    let pipeline = format!("set -o pipefail; rpm2cpio '{srpm_str}' | cpio -idmu --quiet");
    let output = run_captured("bash", &["-c", &pipeline], Some(dest), Some(UNPACK_TIMEOUT)).await?;
    command_result(output)?;
    Ok(())
}

#[cfg(test)]
#[path = "sources_tests.rs"]
mod tests;
