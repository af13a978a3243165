// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resumable chunked uploads to the artifact content store.
//!
//! Protocol per file:
//! 1. `POST /uploads {size}` → upload handle.
//! 2. One ranged `PUT` when the file fits a chunk, otherwise the file is
//!    split into fixed-size chunks on disk and each chunk is sent as
//!    `bytes L-H/total` with `L` advancing by the actual chunk size.
//! 3. `POST <handle>commit/ {sha256}` → async task handle.
//! 4. Poll the task until `completed` (the created resource becomes the
//!    artifact `href`) or `failed`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use pf_core::Artifact;
use reqwest::header::CONTENT_RANGE;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error};

/// Task poll interval while the store ingests a committed upload.
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Read buffer for hashing and chunk splitting.
const IO_BUF_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected store response for {url}: {detail}")]
    UnexpectedResponse { url: String, detail: String },

    #[error("store task {task} failed: {detail}")]
    TaskFailed { task: String, detail: String },

    #[error("unable to upload files: {}", files.join(", "))]
    FilesFailed { files: Vec<String> },
}

/// Artifact store operations as seen by the worker loop.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload every regular file in `dir` (only `.log` files when
    /// `only_logs`). Individual failures are collected; any failure makes
    /// the whole upload fail after the survivors are recorded.
    async fn upload(&self, dir: &Path, only_logs: bool) -> Result<Vec<Artifact>, UploadError>;

    /// Upload one file and return its artifact record.
    async fn upload_single_file(&self, path: &Path) -> Result<Artifact, UploadError>;
}

#[derive(Debug, Deserialize)]
struct UploadHandle {
    href: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    task: String,
}

#[derive(Debug, Deserialize)]
struct TaskState {
    state: String,
    #[serde(default)]
    created_resources: Vec<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// HTTP content-store client.
pub struct ContentStoreClient {
    base_url: String,
    client: reqwest::Client,
    chunk_size: u64,
    poll_interval: Duration,
}

impl ContentStoreClient {
    pub fn new(
        store_url: &str,
        username: &str,
        password: &str,
        chunk_size: u64,
    ) -> Result<Self, UploadError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !username.is_empty() {
            let credentials = format!("{username}:{password}");
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            if let Ok(value) =
                reqwest::header::HeaderValue::from_str(&format!("Basic {encoded}"))
            {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self {
            base_url: store_url.trim_end_matches('/').to_string(),
            client,
            chunk_size: chunk_size.max(1),
            poll_interval: TASK_POLL_INTERVAL,
        })
    }

    /// Shrink the task poll interval; tests use milliseconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create_upload(&self, size: u64) -> Result<String, UploadError> {
        let url = self.url("/uploads");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "size": size }))
            .send()
            .await?
            .error_for_status()?;
        let handle: UploadHandle =
            response
                .json()
                .await
                .map_err(|e| UploadError::UnexpectedResponse {
                    url,
                    detail: e.to_string(),
                })?;
        Ok(handle.href)
    }

    async fn put_range(
        &self,
        handle: &str,
        low: u64,
        high: u64,
        total: u64,
        body: Vec<u8>,
    ) -> Result<(), UploadError> {
        self.client
            .put(self.url(handle))
            .header(CONTENT_RANGE, format!("bytes {low}-{high}/{total}"))
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Split the file into chunk files on disk, then send each part. The
    /// last part may be smaller, so the lower bound advances by the actual
    /// chunk size.
    async fn put_large_file(
        &self,
        path: &Path,
        handle: &str,
        total: u64,
    ) -> Result<(), UploadError> {
        let chunks_dir = chunk_dir_for(path);
        std::fs::create_dir_all(&chunks_dir)?;
        let result = self.put_chunks_from(path, &chunks_dir, handle, total).await;
        let _ = std::fs::remove_dir_all(&chunks_dir);
        result
    }

    async fn put_chunks_from(
        &self,
        path: &Path,
        chunks_dir: &Path,
        handle: &str,
        total: u64,
    ) -> Result<(), UploadError> {
        let chunk_paths = split_into_chunks(path, chunks_dir, self.chunk_size)?;
        let mut low = 0u64;
        for chunk_path in chunk_paths {
            let body = std::fs::read(&chunk_path)?;
            let size = body.len() as u64;
            let high = low + size - 1;
            self.put_range(handle, low, high, total, body).await?;
            low += size;
        }
        Ok(())
    }

    async fn commit_upload(&self, handle: &str, sha256: &str) -> Result<String, UploadError> {
        let url = self.url(&format!("{handle}commit/"));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "sha256": sha256 }))
            .send()
            .await?
            .error_for_status()?;
        let commit: CommitResponse =
            response
                .json()
                .await
                .map_err(|e| UploadError::UnexpectedResponse {
                    url,
                    detail: e.to_string(),
                })?;
        self.wait_for_task(&commit.task).await
    }

    /// Poll the ingest task until it completes or fails.
    async fn wait_for_task(&self, task: &str) -> Result<String, UploadError> {
        loop {
            let url = self.url(task);
            let state: TaskState = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .map_err(|e| UploadError::UnexpectedResponse {
                    url,
                    detail: e.to_string(),
                })?;

            match state.state.as_str() {
                "completed" => {
                    return state.created_resources.into_iter().next().ok_or_else(|| {
                        UploadError::TaskFailed {
                            task: task.to_string(),
                            detail: "completed without created resources".to_string(),
                        }
                    });
                }
                "failed" => {
                    return Err(UploadError::TaskFailed {
                        task: task.to_string(),
                        detail: state
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown error".to_string()),
                    });
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn send_file(&self, path: &Path) -> Result<Artifact, UploadError> {
        let total = std::fs::metadata(path)?.len();
        let handle = self.create_upload(total).await?;
        if total > self.chunk_size {
            self.put_large_file(path, &handle, total).await?;
        } else {
            let body = std::fs::read(path)?;
            let high = total.saturating_sub(1);
            self.put_range(&handle, 0, high, total, body).await?;
        }
        let sha256 = hash_file(path)?;
        let href = self.commit_upload(&handle, &sha256).await?;
        debug!(path = %path.display(), href, "artifact uploaded");
        Ok(Artifact::for_file(path, href, sha256))
    }
}

#[async_trait]
impl ArtifactStore for ContentStoreClient {
    async fn upload(&self, dir: &Path, only_logs: bool) -> Result<Vec<Artifact>, UploadError> {
        let mut artifacts = Vec::new();
        let mut failed = Vec::new();
        for path in upload_candidates(dir, only_logs)? {
            match self.send_file(&path).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "cannot upload artifact");
                    failed.push(path.to_string_lossy().into_owned());
                }
            }
        }
        if !failed.is_empty() {
            return Err(UploadError::FilesFailed { files: failed });
        }
        Ok(artifacts)
    }

    async fn upload_single_file(&self, path: &Path) -> Result<Artifact, UploadError> {
        self.send_file(path).await
    }
}

/// Regular files to upload from a directory, sorted for determinism.
fn upload_candidates(dir: &Path, only_logs: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        if only_logs && path.extension().is_none_or(|ext| ext != "log") {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// SHA-256 of a file's current on-disk contents.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; IO_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn chunk_dir_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("pf_upload_{}_{}", std::process::id(), name))
}

/// Write `<source>` into numbered chunk files of at most `chunk_size` bytes.
fn split_into_chunks(
    source: &Path,
    chunks_dir: &Path,
    chunk_size: u64,
) -> std::io::Result<Vec<PathBuf>> {
    use std::io::Write;

    let mut input = std::fs::File::open(source)?;
    let mut chunk_paths = Vec::new();
    let mut buf = vec![0u8; IO_BUF_SIZE];
    let mut index = 0usize;

    'outer: loop {
        let chunk_path = chunks_dir.join(format!("chunk_{index:05}"));
        let mut output = std::fs::File::create(&chunk_path)?;
        let mut written = 0u64;
        while written < chunk_size {
            let want = ((chunk_size - written) as usize).min(buf.len());
            let n = input.read(&mut buf[..want])?;
            if n == 0 {
                if written == 0 {
                    // Nothing went into this chunk; drop the empty file.
                    drop(output);
                    std::fs::remove_file(&chunk_path)?;
                } else {
                    chunk_paths.push(chunk_path);
                }
                break 'outer;
            }
            output.write_all(&buf[..n])?;
            written += n as u64;
        }
        chunk_paths.push(chunk_path);
        index += 1;
    }
    Ok(chunk_paths)
}

/// Recording store double for worker tests. Returns artifact records with
/// real hashes and synthetic hrefs.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeArtifactStore {
    pub uploads: parking_lot::Mutex<Vec<(PathBuf, bool)>>,
    pub fail_uploads: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl FakeArtifactStore {
    pub fn new() -> Self {
        Self {
            uploads: parking_lot::Mutex::new(Vec::new()),
            fail_uploads: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn upload(&self, dir: &Path, only_logs: bool) -> Result<Vec<Artifact>, UploadError> {
        self.uploads.lock().push((dir.to_owned(), only_logs));
        if self.fail_uploads.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(UploadError::FilesFailed {
                files: vec![dir.to_string_lossy().into_owned()],
            });
        }
        let mut artifacts = Vec::new();
        for path in upload_candidates(dir, only_logs)? {
            let sha256 = hash_file(&path)?;
            let href = format!("fake://{}", path.display());
            artifacts.push(Artifact::for_file(&path, href, sha256));
        }
        Ok(artifacts)
    }

    async fn upload_single_file(&self, path: &Path) -> Result<Artifact, UploadError> {
        let sha256 = hash_file(path)?;
        Ok(Artifact::for_file(
            path,
            format!("fake://{}", path.display()),
            sha256,
        ))
    }
}

#[cfg(test)]
#[path = "uploader_tests.rs"]
mod tests;
