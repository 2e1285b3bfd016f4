//! The calls a sync client makes against a backend.
//!
//! Implemented over HTTP by [`HttpSyncApi`](super::HttpSyncApi) and
//! in-process by the server's backend.

use std::future::Future;

use tokio::sync::watch;

use super::error::SyncError;
use super::protocol::{ClientId, Snapshot, Step, StepsResponse, SubmitStepsResult, Version};

/// Remote operations used by the reconciliation loop and document helpers.
pub trait SyncApi: Send + Sync {
    /// Nearest snapshot at or below `version` (latest if `None`).
    fn get_snapshot(
        &self,
        id: &str,
        version: Option<Version>,
    ) -> impl Future<Output = Result<Option<Snapshot>, SyncError>> + Send;

    /// Store a full snapshot. Idempotent for identical content.
    fn submit_snapshot(
        &self,
        id: &str,
        version: Version,
        content: &str,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Latest version of the document, `None` if it does not exist.
    fn latest_version(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Version>, SyncError>> + Send;

    /// Steps after `after_version`, up to `target_version` if given.
    fn get_steps(
        &self,
        id: &str,
        after_version: Version,
        target_version: Option<Version>,
    ) -> impl Future<Output = Result<StepsResponse, SyncError>> + Send;

    /// Submit steps based on `base_version`.
    fn submit_steps(
        &self,
        id: &str,
        base_version: Version,
        client_id: &ClientId,
        steps: &[Step],
    ) -> impl Future<Output = Result<SubmitStepsResult, SyncError>> + Send;

    /// Subscribe to the document's latest version.
    ///
    /// The returned receiver already holds the current value.
    fn watch_version(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<watch::Receiver<Option<Version>>, SyncError>> + Send;
}
