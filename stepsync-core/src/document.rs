//! One-shot document operations for code that is not a live editor.
//!
//! Works against any [`SyncApi`], so server-side jobs can use the same
//! helpers as remote clients.

use crate::model::{DocumentModel, ModelError};
use crate::sync::{ClientId, SubmitStepsResult, SyncApi, SyncError, Version};

/// Version a freshly created document starts at.
pub const INITIAL_VERSION: Version = 1;

/// Create a document by storing its initial snapshot.
pub async fn create<A: SyncApi>(api: &A, id: &str, content: &str) -> Result<(), SyncError> {
    api.submit_snapshot(id, INITIAL_VERSION, content).await
}

/// Load the latest snapshot and apply every step after it.
pub async fn load_latest<A, D>(api: &A, id: &str, client_id: &ClientId) -> Result<D, SyncError>
where
    A: SyncApi,
    D: DocumentModel,
{
    let snapshot = api
        .get_snapshot(id, None)
        .await?
        .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

    let mut doc = D::load(&snapshot, client_id)?;
    catch_up(api, id, &mut doc).await?;
    Ok(doc)
}

/// Apply remote steps until the server reports nothing more.
pub(crate) async fn catch_up<A, D>(api: &A, id: &str, doc: &mut D) -> Result<(), SyncError>
where
    A: SyncApi,
    D: DocumentModel,
{
    loop {
        let resp = api.get_steps(id, doc.version(), None).await?;
        if resp.steps.is_empty() {
            return Ok(());
        }
        doc.receive_steps(&resp.steps, &resp.client_ids)?;
        if !resp.truncated {
            return Ok(());
        }
    }
}

/// Edit the latest version of a document and write the result back.
///
/// `f` edits a copy of the server state. If another writer got there first,
/// their steps are applied to the server copy and `f` runs again on a fresh
/// copy, so it must be safe to call more than once. On success a snapshot of
/// the new version is stored and the edited document returned. When `f`
/// produces no steps nothing is written.
pub async fn transform<A, D, F>(
    api: &A,
    id: &str,
    client_id: &ClientId,
    mut f: F,
) -> Result<D, SyncError>
where
    A: SyncApi,
    D: DocumentModel + Clone,
    F: FnMut(&mut D) -> Result<(), ModelError>,
{
    let mut server_doc: D = load_latest(api, id, client_id).await?;

    loop {
        let mut draft = server_doc.clone();
        f(&mut draft)?;

        let Some(sendable) = draft.sendable_steps() else {
            return Ok(draft);
        };

        let result = api
            .submit_steps(id, sendable.version, &sendable.client_id, &sendable.steps)
            .await?;

        match result {
            SubmitStepsResult::Synced => {
                let own = vec![sendable.client_id.clone(); sendable.steps.len()];
                draft.receive_steps(&sendable.steps, &own)?;
                api.submit_snapshot(id, draft.version(), &draft.content()?)
                    .await?;
                tracing::debug!(doc = id, version = draft.version(), "Transform committed");
                return Ok(draft);
            }
            SubmitStepsResult::NeedsRebase { steps, client_ids } => {
                if steps.is_empty() {
                    return Err(SyncError::Backend(
                        "needs-rebase without steps".to_string(),
                    ));
                }
                tracing::debug!(doc = id, behind = steps.len(), "Transform rebasing");
                server_doc.receive_steps(&steps, &client_ids)?;
            }
        }
    }
}
