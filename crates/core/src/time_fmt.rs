// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timestamp helpers for the append-only build logs.

use chrono::Utc;

/// Current time as Unix seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Format a log-line timestamp: `08:14:09 30.01.26`.
pub fn log_ts() -> String {
    Utc::now().format("%H:%M:%S %d.%m.%y").to_string()
}

/// RFC 3339 timestamp for build-stage stats.
pub fn stage_ts() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
