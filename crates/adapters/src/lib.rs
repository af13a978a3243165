// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapters for the build node's external I/O: the master protocol,
//! the artifact content store, source acquisition and subprocess plumbing.

pub mod master;
pub mod rpmmeta;
pub mod sources;
pub mod subprocess;
pub mod uploader;

pub use master::{MasterApi, MasterClient, RetryPolicy, TaskReport};
pub use rpmmeta::{RpmQuery, RpmQueryError, SrpmInspector};
pub use sources::{GitSourceFetcher, SidecarDownloader, SourceError};
pub use subprocess::{run_captured, CommandOutput, SubprocessError};
pub use uploader::{ArtifactStore, ContentStoreClient, UploadError};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use master::FakeMaster;
#[cfg(any(test, feature = "test-support"))]
pub use rpmmeta::FakeSrpmInspector;
#[cfg(any(test, feature = "test-support"))]
pub use uploader::FakeArtifactStore;
