//! Bounded deletion of history that reconstruction no longer needs.
//!
//! Each call removes at most one batch of rows and hands back the request
//! that continues where it stopped. [`run_to_completion`] drives a request
//! until nothing is left.

use stepsync_core::sync::Version;

use super::storage::{DeleteBatch, DeltaCutoff, DocumentStore, StoreError};

/// Default number of rows removed per batch.
pub const DEFAULT_PRUNE_BATCH: usize = 1000;

/// What to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneRequest {
    /// Snapshots strictly between the bounds.
    Snapshots {
        id: String,
        after_version: Option<Version>,
        before_version: Option<Version>,
    },
    /// Deltas created before `before_ts` with a version above
    /// `after_version`. Unless `delete_newer_than_latest_snapshot`, deltas
    /// the latest snapshot does not cover are kept.
    Steps {
        id: String,
        before_ts: i64,
        after_version: Option<Version>,
        delete_newer_than_latest_snapshot: bool,
    },
    /// Every snapshot, then every delta.
    Document { id: String },
}

impl PruneRequest {
    pub fn id(&self) -> &str {
        match self {
            PruneRequest::Snapshots { id, .. }
            | PruneRequest::Steps { id, .. }
            | PruneRequest::Document { id } => id,
        }
    }

    /// Delete everything stored for `id`, steps included.
    fn all_steps(id: &str) -> Self {
        PruneRequest::Steps {
            id: id.to_string(),
            before_ts: i64::MAX,
            after_version: None,
            delete_newer_than_latest_snapshot: true,
        }
    }
}

/// Result of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneOutcome {
    pub deleted: u64,
    /// Continuation, if the batch was full or the request has another phase.
    pub next: Option<PruneRequest>,
}

/// Runs pruning batches against a store.
#[derive(Clone)]
pub struct Pruner {
    store: DocumentStore,
    batch: usize,
}

impl Pruner {
    pub fn new(store: DocumentStore, batch: usize) -> Self {
        Self {
            store,
            batch: batch.max(1),
        }
    }

    /// Process one batch of `request`.
    pub async fn prune(&self, request: &PruneRequest) -> Result<PruneOutcome, StoreError> {
        let outcome = match request {
            PruneRequest::Snapshots {
                id,
                after_version,
                before_version,
            } => {
                let batch = self
                    .store
                    .delete_snapshots_between(id, *after_version, *before_version, self.batch)
                    .await?;
                let next = self.full(&batch).then(|| PruneRequest::Snapshots {
                    id: id.clone(),
                    after_version: batch.last_version,
                    before_version: *before_version,
                });
                PruneOutcome {
                    deleted: batch.deleted,
                    next,
                }
            }
            PruneRequest::Steps {
                id,
                before_ts,
                after_version,
                delete_newer_than_latest_snapshot,
            } => {
                let cutoff = DeltaCutoff {
                    before_ts: *before_ts,
                    after_version: *after_version,
                    keep_after_latest_snapshot: !delete_newer_than_latest_snapshot,
                };
                let batch = self
                    .store
                    .delete_deltas_before(id, cutoff, self.batch)
                    .await?;
                let next = self.full(&batch).then(|| PruneRequest::Steps {
                    id: id.clone(),
                    before_ts: *before_ts,
                    after_version: batch.last_version,
                    delete_newer_than_latest_snapshot: *delete_newer_than_latest_snapshot,
                });
                PruneOutcome {
                    deleted: batch.deleted,
                    next,
                }
            }
            PruneRequest::Document { id } => {
                let batch = self
                    .store
                    .delete_snapshots_between(id, None, None, self.batch)
                    .await?;
                let next = if self.full(&batch) {
                    PruneRequest::Document { id: id.clone() }
                } else {
                    PruneRequest::all_steps(id)
                };
                PruneOutcome {
                    deleted: batch.deleted,
                    next: Some(next),
                }
            }
        };

        if outcome.deleted > 0 {
            tracing::info!(
                doc = request.id(),
                deleted = outcome.deleted,
                more = outcome.next.is_some(),
                "Pruned history"
            );
        }
        Ok(outcome)
    }

    fn full(&self, batch: &DeleteBatch) -> bool {
        batch.deleted >= self.batch as u64
    }
}

/// Run `request` and its continuations until none remain. Returns the total
/// number of rows deleted.
pub async fn run_to_completion(pruner: &Pruner, request: PruneRequest) -> Result<u64, StoreError> {
    let mut total = 0;
    let mut request = request;
    loop {
        let outcome = pruner.prune(&request).await?;
        total += outcome.deleted;
        match outcome.next {
            Some(next) => {
                tracing::debug!(doc = next.id(), ?next, "Continuing prune");
                request = next;
                tokio::task::yield_now().await;
            }
            None => return Ok(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::storage::tests::{append, setup};
    use crate::server::storage::now_ms;

    async fn snapshot_versions(store: &DocumentStore, id: &str) -> Vec<Version> {
        store
            .snapshot_versions(id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.version)
            .collect()
    }

    async fn delta_versions(store: &DocumentStore, id: &str) -> Vec<Version> {
        store
            .deltas_after(id, 0, 100)
            .await
            .unwrap()
            .iter()
            .map(|d| d.version)
            .collect()
    }

    #[tokio::test]
    async fn test_pruned_snapshot_falls_back_to_nearest_below() {
        let (_dir, store) = setup().await;
        for v in 1..=3 {
            store
                .put_snapshot("doc", v, &format!("c{}", v), false)
                .await
                .unwrap();
        }
        let pruner = Pruner::new(store.clone(), DEFAULT_PRUNE_BATCH);
        let request = PruneRequest::Snapshots {
            id: "doc".to_string(),
            after_version: Some(1),
            before_version: store.latest_version("doc").await.unwrap(),
        };

        let deleted = run_to_completion(&pruner, request).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(snapshot_versions(&store, "doc").await, vec![1, 3]);
        let at_2 = store.get_snapshot("doc", Some(2)).await.unwrap().unwrap();
        assert_eq!(at_2.version, 1);
        assert_eq!(at_2.content, "c1");
    }

    #[tokio::test]
    async fn test_prune_snapshots_returns_continuation() {
        let (_dir, store) = setup().await;
        for v in 1..=6 {
            store.put_snapshot("doc", v, "c", false).await.unwrap();
        }
        let pruner = Pruner::new(store.clone(), 2);
        let request = PruneRequest::Snapshots {
            id: "doc".to_string(),
            after_version: Some(1),
            before_version: Some(6),
        };

        let outcome = pruner.prune(&request).await.unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(
            outcome.next,
            Some(PruneRequest::Snapshots {
                id: "doc".to_string(),
                after_version: Some(3),
                before_version: Some(6),
            })
        );
        assert_eq!(snapshot_versions(&store, "doc").await, vec![1, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_run_to_completion_drains_snapshots() {
        let (_dir, store) = setup().await;
        for v in 1..=6 {
            store.put_snapshot("doc", v, "c", false).await.unwrap();
        }
        let pruner = Pruner::new(store.clone(), 2);

        let total = run_to_completion(
            &pruner,
            PruneRequest::Snapshots {
                id: "doc".to_string(),
                after_version: Some(1),
                before_version: Some(6),
            },
        )
        .await
        .unwrap();

        assert_eq!(total, 4);
        assert_eq!(snapshot_versions(&store, "doc").await, vec![1, 6]);
    }

    #[tokio::test]
    async fn test_prune_steps_keeps_steps_after_latest_snapshot() {
        let (_dir, store) = setup().await;
        store.put_snapshot("doc", 0, "c", false).await.unwrap();
        for base in 0..4 {
            append(&store, "doc", base, &["s"]).await;
        }
        store.put_snapshot("doc", 2, "c2", false).await.unwrap();
        store.set_snapshot_created_at("doc", 2, 1_000).await;
        for v in 1..=4 {
            store.set_delta_created_at("doc", v, 500).await;
        }
        let pruner = Pruner::new(store.clone(), 100);

        let deleted = run_to_completion(
            &pruner,
            PruneRequest::Steps {
                id: "doc".to_string(),
                before_ts: now_ms() + 60_000,
                after_version: None,
                delete_newer_than_latest_snapshot: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(delta_versions(&store, "doc").await, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_prune_steps_respects_timestamp_cutoff() {
        let (_dir, store) = setup().await;
        store.put_snapshot("doc", 0, "c", false).await.unwrap();
        for base in 0..3 {
            append(&store, "doc", base, &["s"]).await;
        }
        store.set_delta_created_at("doc", 1, 100).await;
        store.set_delta_created_at("doc", 2, 200).await;
        store.set_delta_created_at("doc", 3, 300).await;
        let pruner = Pruner::new(store.clone(), 100);

        let outcome = pruner
            .prune(&PruneRequest::Steps {
                id: "doc".to_string(),
                before_ts: 250,
                after_version: None,
                delete_newer_than_latest_snapshot: true,
            })
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.next, None);
        assert_eq!(delta_versions(&store, "doc").await, vec![3]);
    }

    #[tokio::test]
    async fn test_prune_steps_without_snapshot_deletes_nothing() {
        let (_dir, store) = setup().await;
        append(&store, "doc", 0, &["a", "b"]).await;
        let pruner = Pruner::new(store.clone(), 100);

        let outcome = pruner
            .prune(&PruneRequest::Steps {
                id: "doc".to_string(),
                before_ts: i64::MAX,
                after_version: None,
                delete_newer_than_latest_snapshot: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.next, None);
    }

    #[tokio::test]
    async fn test_prune_document_removes_everything() {
        let (_dir, store) = setup().await;
        store.put_snapshot("doc", 0, "c", false).await.unwrap();
        for base in 0..3 {
            append(&store, "doc", base, &["s"]).await;
        }
        store.put_snapshot("doc", 1, "c1", false).await.unwrap();
        store.put_snapshot("doc", 3, "c3", false).await.unwrap();
        store.put_snapshot("other", 1, "keep", false).await.unwrap();
        let pruner = Pruner::new(store.clone(), 2);

        let first = pruner
            .prune(&PruneRequest::Document {
                id: "doc".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(first.deleted, 2);
        assert_eq!(
            first.next,
            Some(PruneRequest::Document {
                id: "doc".to_string()
            })
        );

        let total = run_to_completion(&pruner, first.next.unwrap()).await.unwrap();

        assert_eq!(total, 4);
        assert_eq!(store.latest_version("doc").await.unwrap(), None);
        assert_eq!(store.latest_version("other").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_prune_missing_document() {
        let (_dir, store) = setup().await;
        let pruner = Pruner::new(store, DEFAULT_PRUNE_BATCH);

        let total = run_to_completion(
            &pruner,
            PruneRequest::Document {
                id: "missing".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(total, 0);
    }
}
