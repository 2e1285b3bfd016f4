//! Interface to the document-model library that owns step semantics.
//!
//! The sync core never looks inside a step. Everything that applies,
//! rebases or serializes document content goes through [`DocumentModel`].

use crate::sync::{ClientId, Snapshot, Step, Version};

/// Error raised by a document model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ModelError(pub String);

impl From<ModelError> for crate::sync::SyncError {
    fn from(e: ModelError) -> Self {
        crate::sync::SyncError::Model(e.0)
    }
}

/// Local steps waiting to be confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendableSteps {
    /// Confirmed version the steps are based on.
    pub version: Version,
    pub steps: Vec<Step>,
    pub client_id: ClientId,
}

/// A collaborative document as seen by one writer.
///
/// The model tracks a confirmed version plus any unconfirmed local steps,
/// in the style of a collab plugin: confirmed steps arrive through
/// [`receive_steps`](DocumentModel::receive_steps), which must rebase the
/// unconfirmed ones on top and drop those that belong to this writer.
pub trait DocumentModel: Send {
    /// Build a model from stored content.
    fn load(snapshot: &Snapshot, client_id: &ClientId) -> Result<Self, ModelError>
    where
        Self: Sized;

    /// Last confirmed version.
    fn version(&self) -> Version;

    /// Unconfirmed local steps, if any.
    fn sendable_steps(&self) -> Option<SendableSteps>;

    /// Apply confirmed steps; `client_ids` runs parallel to `steps`.
    fn receive_steps(&mut self, steps: &[Step], client_ids: &[ClientId])
        -> Result<(), ModelError>;

    /// Serialized confirmed content at [`version`](DocumentModel::version),
    /// used for snapshots. Unconfirmed steps are not included.
    fn content(&self) -> Result<String, ModelError>;
}
