//! Step submission with optimistic concurrency, and version notifications.
//!
//! Writers submit steps against the version they last saw. If the log has
//! moved on, the submission is rejected with the newer steps so the writer
//! can rebase and retry; nothing is merged here.

use std::collections::HashMap;
use std::sync::Arc;

use stepsync_core::sync::{ClientId, Step, SubmitStepsResult, Version};
use tokio::sync::{watch, RwLock};

use super::storage::{AppendOutcome, Delta, DocumentStore, StoreError};

/// Default cap on the deltas scanned per submission or query.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// Tracks the latest version of every watched document.
///
/// Each document gets a `watch` channel, so subscribers only ever see the
/// newest version rather than a queue of updates.
pub struct SyncHub {
    channels: RwLock<HashMap<String, watch::Sender<Option<Version>>>>,
}

impl SyncHub {
    /// Creates a new sync hub.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to version changes for a document.
    ///
    /// A new channel starts at `None`; callers should follow up with
    /// [`SyncHub::publish`] of the stored version.
    pub async fn subscribe(&self, id: &str) -> watch::Receiver<Option<Version>> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(id) {
            sender.subscribe()
        } else {
            let (sender, receiver) = watch::channel(None);
            channels.insert(id.to_string(), sender);
            receiver
        }
    }

    /// Raises the published version of a document. Lower versions are
    /// ignored, so racing publishers cannot move it backwards.
    pub async fn publish(&self, id: &str, version: Version) {
        self.update(id, |current| {
            if *current < Some(version) {
                *current = Some(version);
                true
            } else {
                false
            }
        })
        .await;
    }

    /// Marks a document as gone.
    pub async fn publish_removed(&self, id: &str) {
        self.update(id, |current| current.take().is_some()).await;
    }

    async fn update(&self, id: &str, modify: impl FnOnce(&mut Option<Version>) -> bool) {
        let stale = {
            let channels = self.channels.read().await;
            match channels.get(id) {
                Some(sender) if sender.receiver_count() > 0 => {
                    sender.send_if_modified(modify);
                    false
                }
                Some(_) => true,
                None => false,
            }
        };

        if stale {
            let mut channels = self.channels.write().await;
            if channels
                .get(id)
                .is_some_and(|sender| sender.receiver_count() == 0)
            {
                channels.remove(id);
                tracing::debug!(doc = id, "Dropped version channel with no subscribers");
            }
        }
    }

    /// Number of documents with a live channel.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten deltas into parallel step and client-id lists.
pub fn flatten(deltas: Vec<Delta>) -> (Vec<Step>, Vec<ClientId>) {
    let mut steps = Vec::new();
    let mut client_ids = Vec::new();
    for delta in deltas {
        client_ids.extend(std::iter::repeat(delta.client_id).take(delta.steps.len()));
        steps.extend(delta.steps);
    }
    (steps, client_ids)
}

/// Accepts or rejects step submissions.
#[derive(Clone)]
pub struct SyncCoordinator {
    store: DocumentStore,
    hub: Arc<SyncHub>,
    scan_limit: usize,
}

impl SyncCoordinator {
    pub fn new(store: DocumentStore, hub: Arc<SyncHub>, scan_limit: usize) -> Self {
        Self {
            store,
            hub,
            scan_limit,
        }
    }

    /// Append `steps` at `base_version`, or return the newer steps.
    ///
    /// A rejection carries at most `scan_limit` deltas' worth of steps; the
    /// writer merges them and resubmits, possibly to be rejected again.
    pub async fn submit_steps(
        &self,
        id: &str,
        base_version: Version,
        client_id: &ClientId,
        steps: &[Step],
    ) -> Result<SubmitStepsResult, StoreError> {
        let outcome = self
            .store
            .compare_and_append(id, base_version, client_id, steps, self.scan_limit)
            .await?;

        match outcome {
            AppendOutcome::Appended { version } => {
                tracing::info!(
                    doc = id,
                    client = %client_id,
                    version,
                    steps = steps.len(),
                    "Steps accepted"
                );
                self.hub.publish(id, version).await;
                Ok(SubmitStepsResult::Synced)
            }
            AppendOutcome::Rejected(deltas) => {
                let (steps, client_ids) = flatten(deltas);
                tracing::debug!(
                    doc = id,
                    base_version,
                    behind = steps.len(),
                    "Submission needs rebase"
                );
                Ok(SubmitStepsResult::NeedsRebase { steps, client_ids })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::reconstruct::Reconstructor;
    use crate::server::storage::tests::{append, setup, steps};

    #[tokio::test]
    async fn test_sync_hub_subscribe_and_publish() {
        let hub = SyncHub::new();

        let mut rx = hub.subscribe("doc").await;
        assert_eq!(*rx.borrow(), None);

        hub.publish("doc", 3).await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(3));
    }

    #[tokio::test]
    async fn test_sync_hub_never_moves_backwards() {
        let hub = SyncHub::new();
        let rx = hub.subscribe("doc").await;

        hub.publish("doc", 5).await;
        hub.publish("doc", 4).await;
        assert_eq!(*rx.borrow(), Some(5));

        hub.publish_removed("doc").await;
        assert_eq!(*rx.borrow(), None);
    }

    #[tokio::test]
    async fn test_sync_hub_coalesces() {
        let hub = SyncHub::new();
        let mut rx = hub.subscribe("doc").await;

        for v in 1..=10 {
            hub.publish("doc", v).await;
        }

        // One wake-up, newest value.
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(10));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_sync_hub_isolated_documents() {
        let hub = SyncHub::new();
        let rx1 = hub.subscribe("doc1").await;
        let rx2 = hub.subscribe("doc2").await;

        hub.publish("doc1", 1).await;

        assert!(rx1.has_changed().unwrap());
        assert!(!rx2.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_sync_hub_drops_unwatched_channels() {
        let hub = SyncHub::new();
        let rx = hub.subscribe("doc").await;
        assert_eq!(hub.channel_count().await, 1);

        drop(rx);
        hub.publish("doc", 1).await;

        assert_eq!(hub.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_submit_steps_synced_then_needs_rebase() {
        let (_dir, store) = setup().await;
        let hub = Arc::new(SyncHub::new());
        let coordinator = SyncCoordinator::new(store.clone(), hub.clone(), DEFAULT_SCAN_LIMIT);
        store.put_snapshot("doc", 0, "c", false).await.unwrap();
        let rx = hub.subscribe("doc").await;

        let result = coordinator
            .submit_steps("doc", 0, &ClientId::from("c1"), &steps(&["1", "2"]))
            .await
            .unwrap();
        assert_eq!(result, SubmitStepsResult::Synced);
        assert_eq!(*rx.borrow(), Some(2));

        let result = coordinator
            .submit_steps("doc", 0, &ClientId::from("c2"), &steps(&["x"]))
            .await
            .unwrap();
        assert_eq!(
            result,
            SubmitStepsResult::NeedsRebase {
                steps: steps(&["1", "2"]),
                client_ids: vec![ClientId::from("c1"), ClientId::from("c1")],
            }
        );
    }

    #[tokio::test]
    async fn test_submit_steps_on_empty_log() {
        let (_dir, store) = setup().await;
        let coordinator =
            SyncCoordinator::new(store.clone(), Arc::new(SyncHub::new()), DEFAULT_SCAN_LIMIT);
        assert_eq!(store.latest_version("fresh").await.unwrap(), None);

        let result = coordinator
            .submit_steps("fresh", 0, &ClientId::from("c1"), &steps(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(result, SubmitStepsResult::Synced);

        let result = coordinator
            .submit_steps("fresh", 0, &ClientId::from("c2"), &steps(&["x"]))
            .await
            .unwrap();
        assert_eq!(
            result,
            SubmitStepsResult::NeedsRebase {
                steps: steps(&["a", "b"]),
                client_ids: vec![ClientId::from("c1"), ClientId::from("c1")],
            }
        );

        let resp = Reconstructor::new(store, DEFAULT_SCAN_LIMIT)
            .get_steps("fresh", 0, None)
            .await
            .unwrap();
        assert_eq!(resp.steps, steps(&["a", "b"]));
        assert_eq!(resp.client_ids, vec![ClientId::from("c1"), ClientId::from("c1")]);
        assert_eq!(resp.version, 2);
        assert!(!resp.truncated);
    }

    #[tokio::test]
    async fn test_needs_rebase_spans_deltas_in_order() {
        let (_dir, store) = setup().await;
        let coordinator =
            SyncCoordinator::new(store.clone(), Arc::new(SyncHub::new()), DEFAULT_SCAN_LIMIT);
        store.put_snapshot("doc", 1, "c", false).await.unwrap();
        append(&store, "doc", 1, &["a"]).await;
        coordinator
            .submit_steps("doc", 2, &ClientId::Int(9), &steps(&["b", "c"]))
            .await
            .unwrap();

        let result = coordinator
            .submit_steps("doc", 1, &ClientId::from("late"), &steps(&["z"]))
            .await
            .unwrap();

        assert_eq!(
            result,
            SubmitStepsResult::NeedsRebase {
                steps: steps(&["a", "b", "c"]),
                client_ids: vec![ClientId::from("c1"), ClientId::Int(9), ClientId::Int(9)],
            }
        );
    }

    #[test]
    fn test_flatten() {
        let (s, c) = flatten(vec![
            Delta {
                version: 2,
                client_id: ClientId::from("a"),
                steps: steps(&["1", "2"]),
            },
            Delta {
                version: 3,
                client_id: ClientId::Int(1),
                steps: steps(&["3"]),
            },
        ]);
        assert_eq!(s, steps(&["1", "2", "3"]));
        assert_eq!(
            c,
            vec![ClientId::from("a"), ClientId::from("a"), ClientId::Int(1)]
        );
    }
}
