// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shutdown flags shared by the node runtime, the workers and the
//! heartbeat task.
//!
//! `terminated` means "finish the current task and stop"; `graceful`
//! additionally forbids acquiring a new task. Every termination signal the
//! node handles sets both, so a signalled node drains and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Shutdown {
    terminated: AtomicBool,
    graceful: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set both flags and wake every sleeper.
    pub fn trigger(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.graceful.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn graceful(&self) -> bool {
        self.graceful.load(Ordering::SeqCst)
    }

    /// Wait until the next trigger. Sleepers race this against their timer
    /// so idle waits end promptly on shutdown.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_sets_both_flags_and_wakes_sleepers() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.terminated());
        assert!(!shutdown.graceful());

        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.notified().await })
        };
        // Give the waiter a chance to park before triggering.
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown.trigger();
        assert!(shutdown.terminated());
        assert!(shutdown.graceful());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
