//! Sync error types.

use thiserror::Error;

/// Errors that can occur while talking to a sync backend.
///
/// `Clone` so a single round outcome can be handed to every caller that
/// coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Request could not be sent or the response could not be read
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server answered with an error status we have no dedicated variant for
    #[error("Server returned {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    /// A snapshot with different content already exists at that version
    #[error("Snapshot conflict: {0}")]
    Conflict(String),

    /// The delta log has a gap where steps were expected
    #[error("Missing steps: {0}")]
    MissingSteps(String),

    /// The document does not exist on the server
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The server rejected the request arguments
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The document model failed to apply or serialize steps
    #[error("Document model error: {0}")]
    Model(String),

    /// WebSocket subscription error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// In-process backend failure (storage, database)
    #[error("Backend error: {0}")]
    Backend(String),
}

impl SyncError {
    /// Map a server `{error, message}` body onto a variant.
    pub fn from_server(status: u16, code: &str, message: String) -> Self {
        match code {
            "conflict" => SyncError::Conflict(message),
            "missing_steps" => SyncError::MissingSteps(message),
            "not_found" => SyncError::NotFound(message),
            "invalid_argument" | "invalid_document_id" => SyncError::InvalidRequest(message),
            _ => SyncError::Server {
                status,
                code: code.to_string(),
                message,
            },
        }
    }

    /// True for errors that mean stored history is inconsistent.
    pub fn is_integrity(&self) -> bool {
        matches!(self, SyncError::Conflict(_) | SyncError::MissingSteps(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else {
            SyncError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}
