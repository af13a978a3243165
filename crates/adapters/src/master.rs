// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master protocol client.
//!
//! Three RPCs under `<master>/build_node/`: `get_task`, `ping` and
//! `build_done`. Retries are a middleware shared by every endpoint; the
//! `409` semantics ("already taken" / "already closed") belong to the
//! endpoint layer. Exhausted retries and non-retryable errors never
//! propagate to the worker loop — they surface as an empty reply
//! (`get_task`) or a logged failure (`ping`, `build_done`).

use std::time::Duration;

use async_trait::async_trait;
use pf_core::{Artifact, Task};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Total retry attempts on top of the initial request.
const TOTAL_RETRIES: u32 = 5;

/// HTTP statuses worth retrying.
const STATUSES_TO_RETRY: [u16; 5] = [413, 429, 502, 503, 504];

/// Base delay of the exponential backoff. The resulting schedule is
/// 1, 2, 4, 8, 16 seconds.
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Terminal task report sent through `build_done`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: i64,
    pub status: String,
    pub artifacts: Vec<Artifact>,
}

/// Master protocol operations as seen by the worker loop.
///
/// Implementations absorb transport failures: a worker must keep running
/// whatever the network does.
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// Request a task for the given architectures. `None` means no work,
    /// including the already-taken and error cases.
    async fn get_task(&self, supported_arches: &[String]) -> Option<Task>;

    /// Heartbeat with the task ids currently held by live workers.
    async fn ping(&self, active_tasks: &[i64]);

    /// Report a terminal task status. Failures are logged and swallowed.
    async fn build_done(&self, report: &TaskReport);
}

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid bearer token")]
    InvalidToken,
}

/// Retry middleware settings. Tests shrink the base delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub total_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total_retries: TOTAL_RETRIES,
            base_backoff: BASE_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based): base × 2^attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }

    pub fn retryable_status(status: StatusCode) -> bool {
        STATUSES_TO_RETRY.contains(&status.as_u16())
    }
}

/// HTTP master client: one persistent connection pool per worker, bearer
/// auth from the process-wide token.
pub struct MasterClient {
    base_url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl MasterClient {
    pub fn new(
        master_url: &str,
        jwt_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, MasterError> {
        Self::with_policy(master_url, jwt_token, request_timeout, RetryPolicy::default())
    }

    pub fn with_policy(
        master_url: &str,
        jwt_token: &str,
        request_timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self, MasterError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {jwt_token}"))
            .map_err(|_| MasterError::InvalidToken)?;
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: master_url.trim_end_matches('/').to_string(),
            client,
            policy,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/build_node/{name}", self.base_url)
    }

    /// Send a request, retrying retryable statuses and network errors with
    /// exponential backoff. Returns the last response or error once the
    /// budget is spent.
    async fn send_with_retry<B: Serialize>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<Response, reqwest::Error> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .request(method.clone(), url)
                .json(body)
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => RetryPolicy::retryable_status(response.status()),
                Err(_) => true,
            };

            if !retryable || attempt >= self.policy.total_retries {
                return result;
            }

            let delay = self.policy.backoff_delay(attempt);
            debug!(url, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "retrying master request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl MasterApi for MasterClient {
    async fn get_task(&self, supported_arches: &[String]) -> Option<Task> {
        let url = self.endpoint("get_task");
        let body = serde_json::json!({ "supported_arches": supported_arches });
        let response = match self.send_with_retry(Method::GET, &url, &body).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "can't request new task from master");
                return None;
            }
        };

        // The task was taken by another node between poll and grant.
        if response.status() == StatusCode::CONFLICT {
            debug!("get_task returned 409, task already taken");
            return None;
        }
        if !response.status().is_success() {
            warn!(status = %response.status(), "can't request new task from master");
            return None;
        }

        let raw = match response.text().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "can't read get_task response");
                return None;
            }
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" || trimmed == "{}" {
            return None;
        }
        match serde_json::from_str::<Task>(trimmed) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(error = %e, "master returned an unreadable task");
                None
            }
        }
    }

    async fn ping(&self, active_tasks: &[i64]) {
        let url = self.endpoint("ping");
        let body = serde_json::json!({ "active_tasks": active_tasks });
        match self.send_with_retry(Method::POST, &url, &body).await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "can't report active tasks to master");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "can't report active tasks to master"),
        }
    }

    async fn build_done(&self, report: &TaskReport) {
        let url = self.endpoint("build_done");
        match self.send_with_retry(Method::POST, &url, report).await {
            Ok(response) if response.status() == StatusCode::CONFLICT => {
                // The master already closed this task.
                debug!(task_id = report.task_id, "build_done returned 409, already closed");
            }
            Ok(response) if !response.status().is_success() => {
                warn!(
                    task_id = report.task_id,
                    status = %response.status(),
                    "can't report task status to master"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(task_id = report.task_id, error = %e, "can't report task status to master");
            }
        }
    }
}

/// Scripted master double for worker tests.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeMaster {
    tasks: parking_lot::Mutex<std::collections::VecDeque<Task>>,
    pub pings: parking_lot::Mutex<Vec<Vec<i64>>>,
    pub reports: parking_lot::Mutex<Vec<TaskReport>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeMaster {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: parking_lot::Mutex::new(tasks.into()),
            pings: parking_lot::Mutex::new(Vec::new()),
            reports: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl MasterApi for FakeMaster {
    async fn get_task(&self, _supported_arches: &[String]) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    async fn ping(&self, active_tasks: &[i64]) {
        self.pings.lock().push(active_tasks.to_vec());
    }

    async fn build_done(&self, report: &TaskReport) {
        self.reports.lock().push(report.clone());
    }
}

#[cfg(test)]
#[path = "master_tests.rs"]
mod tests;
