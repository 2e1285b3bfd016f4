//! The sync backend: one entry point per protocol call.
//!
//! Wraps the store, coordinator, reconstructor and pruner, applies the
//! server's snapshot policy and keeps the [`SyncHub`] current. Also
//! implements [`SyncApi`] so server-side code can use the same document
//! helpers as remote clients.

use std::sync::Arc;

use sqlx::SqlitePool;
use stepsync_core::sync::{
    ClientId, DocumentState, Snapshot, Step, StepsResponse, SubmitStepsResult, SyncApi, SyncError,
    Version,
};
use tokio::sync::watch;

use super::reconstruct::Reconstructor;
use super::retention::{run_to_completion, PruneOutcome, PruneRequest, Pruner, DEFAULT_PRUNE_BATCH};
use super::storage::{validate_document_id, DocumentStore, SnapshotWrite, StoreError};
use super::sync::{SyncCoordinator, SyncHub, DEFAULT_SCAN_LIMIT};

/// Called with `(id, content, version)` before a snapshot is stored.
pub type SnapshotHook = Arc<dyn Fn(&str, &str, Version) + Send + Sync>;

/// Server-side policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendOptions {
    /// Drop intermediate snapshots when a new one is stored, unless the
    /// request says otherwise.
    pub prune_snapshots: bool,
    /// Most deltas scanned by one submission or query.
    pub scan_limit: usize,
    /// Most rows removed by one pruning batch.
    pub prune_batch: usize,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            prune_snapshots: true,
            scan_limit: DEFAULT_SCAN_LIMIT,
            prune_batch: DEFAULT_PRUNE_BATCH,
        }
    }
}

#[derive(Clone)]
pub struct SyncBackend {
    store: DocumentStore,
    hub: Arc<SyncHub>,
    coordinator: SyncCoordinator,
    reconstructor: Reconstructor,
    pruner: Pruner,
    options: BackendOptions,
    on_snapshot: Option<SnapshotHook>,
}

impl SyncBackend {
    pub fn new(pool: SqlitePool, options: BackendOptions) -> Self {
        let store = DocumentStore::new(pool);
        let hub = Arc::new(SyncHub::new());
        Self {
            coordinator: SyncCoordinator::new(store.clone(), hub.clone(), options.scan_limit),
            reconstructor: Reconstructor::new(store.clone(), options.scan_limit),
            pruner: Pruner::new(store.clone(), options.prune_batch),
            store,
            hub,
            options,
            on_snapshot: None,
        }
    }

    pub fn with_snapshot_hook(mut self, hook: SnapshotHook) -> Self {
        self.on_snapshot = Some(hook);
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }

    pub fn options(&self) -> BackendOptions {
        self.options
    }

    /// Store a snapshot; `prune` overrides the server default.
    pub async fn submit_snapshot(
        &self,
        id: &str,
        version: Version,
        content: &str,
        prune: Option<bool>,
    ) -> Result<SnapshotWrite, StoreError> {
        validate_document_id(id)?;
        if let Some(hook) = &self.on_snapshot {
            hook(id, content, version);
        }

        let prune = prune.unwrap_or(self.options.prune_snapshots);
        let write = self.store.put_snapshot(id, version, content, prune).await?;
        if write == SnapshotWrite::Inserted {
            tracing::info!(doc = id, version, bytes = content.len(), "Snapshot stored");
            self.hub.publish(id, version).await;
        }
        Ok(write)
    }

    pub async fn get_snapshot(
        &self,
        id: &str,
        version: Option<Version>,
    ) -> Result<Option<Snapshot>, StoreError> {
        self.store.get_snapshot(id, version).await
    }

    pub async fn latest_version(&self, id: &str) -> Result<Option<Version>, StoreError> {
        self.store.latest_version(id).await
    }

    pub async fn get_steps(
        &self,
        id: &str,
        after_version: Version,
        target_version: Option<Version>,
    ) -> Result<StepsResponse, StoreError> {
        self.reconstructor
            .get_steps(id, after_version, target_version)
            .await
    }

    pub async fn submit_steps(
        &self,
        id: &str,
        base_version: Version,
        client_id: &ClientId,
        steps: &[Step],
    ) -> Result<SubmitStepsResult, StoreError> {
        self.coordinator
            .submit_steps(id, base_version, client_id, steps)
            .await
    }

    pub async fn get(
        &self,
        id: &str,
        version: Option<Version>,
        ignore_steps: bool,
    ) -> Result<DocumentState, StoreError> {
        self.reconstructor.get(id, version, ignore_steps).await
    }

    /// Subscribe to a document's latest version. The receiver holds the
    /// stored version on return.
    pub async fn watch(&self, id: &str) -> Result<watch::Receiver<Option<Version>>, StoreError> {
        validate_document_id(id)?;
        // Subscribe before reading so no publish between the two is missed.
        let receiver = self.hub.subscribe(id).await;
        if let Some(version) = self.store.latest_version(id).await? {
            self.hub.publish(id, version).await;
        }
        Ok(receiver)
    }

    /// Run one pruning batch.
    pub async fn prune_batch(
        &self,
        request: &PruneRequest,
    ) -> Result<PruneOutcome, StoreError> {
        validate_document_id(request.id())?;
        self.pruner.prune(request).await
    }

    /// Run `request` and its continuations to the end.
    pub async fn prune(&self, request: PruneRequest) -> Result<u64, StoreError> {
        validate_document_id(request.id())?;
        let removed = match &request {
            PruneRequest::Document { id } => Some(id.clone()),
            _ => None,
        };

        let deleted = run_to_completion(&self.pruner, request).await?;

        if let Some(id) = removed {
            tracing::info!(doc = %id, deleted, "Document deleted");
            self.hub.publish_removed(&id).await;
        }
        Ok(deleted)
    }

    pub async fn delete_snapshots(
        &self,
        id: &str,
        after_version: Option<Version>,
        before_version: Option<Version>,
    ) -> Result<u64, StoreError> {
        self.prune(PruneRequest::Snapshots {
            id: id.to_string(),
            after_version,
            before_version,
        })
        .await
    }

    pub async fn delete_steps(
        &self,
        id: &str,
        before_ts: i64,
        after_version: Option<Version>,
        delete_newer_than_latest_snapshot: bool,
    ) -> Result<u64, StoreError> {
        self.prune(PruneRequest::Steps {
            id: id.to_string(),
            before_ts,
            after_version,
            delete_newer_than_latest_snapshot,
        })
        .await
    }

    pub async fn delete_document(&self, id: &str) -> Result<u64, StoreError> {
        self.prune(PruneRequest::Document { id: id.to_string() })
            .await
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        match e {
            StoreError::Conflict { .. } => SyncError::Conflict(message),
            StoreError::MissingSteps { .. } => SyncError::MissingSteps(message),
            StoreError::InvalidDocumentId(_) | StoreError::InvalidArgument(_) => {
                SyncError::InvalidRequest(message)
            }
            StoreError::Database(_) | StoreError::Corrupt(_) => SyncError::Backend(message),
        }
    }
}

impl SyncApi for SyncBackend {
    async fn get_snapshot(
        &self,
        id: &str,
        version: Option<Version>,
    ) -> Result<Option<Snapshot>, SyncError> {
        Ok(SyncBackend::get_snapshot(self, id, version).await?)
    }

    async fn submit_snapshot(
        &self,
        id: &str,
        version: Version,
        content: &str,
    ) -> Result<(), SyncError> {
        SyncBackend::submit_snapshot(self, id, version, content, None).await?;
        Ok(())
    }

    async fn latest_version(&self, id: &str) -> Result<Option<Version>, SyncError> {
        Ok(SyncBackend::latest_version(self, id).await?)
    }

    async fn get_steps(
        &self,
        id: &str,
        after_version: Version,
        target_version: Option<Version>,
    ) -> Result<StepsResponse, SyncError> {
        Ok(SyncBackend::get_steps(self, id, after_version, target_version).await?)
    }

    async fn submit_steps(
        &self,
        id: &str,
        base_version: Version,
        client_id: &ClientId,
        steps: &[Step],
    ) -> Result<SubmitStepsResult, SyncError> {
        Ok(SyncBackend::submit_steps(self, id, base_version, client_id, steps).await?)
    }

    async fn watch_version(
        &self,
        id: &str,
    ) -> Result<watch::Receiver<Option<Version>>, SyncError> {
        Ok(self.watch(id).await?)
    }
}
