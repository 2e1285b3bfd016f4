//! Wire types for the stepsync HTTP/WebSocket protocol.
//!
//! Field names use camelCase on the wire. Steps and snapshot contents are
//! opaque strings; nothing in this crate looks inside them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-document version counter shared by snapshots and deltas.
pub type Version = u64;

/// An opaque edit step, interpreted only by the document model.
pub type Step = String;

/// Identity of the writer that produced a batch of steps.
///
/// Clients identify themselves either with a string or an integer; both
/// shapes are accepted on the wire and serialized back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientId {
    Int(i64),
    Str(String),
}

impl ClientId {
    /// Generate a random string client id.
    pub fn random() -> Self {
        ClientId::Str(uuid::Uuid::new_v4().to_string())
    }

    /// Encode as the JSON text used for storage.
    pub fn to_json(&self) -> String {
        match self {
            ClientId::Int(n) => n.to_string(),
            ClientId::Str(s) => serde_json::Value::String(s.clone()).to_string(),
        }
    }

    /// Decode from the JSON text produced by [`ClientId::to_json`].
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Int(n) => write!(f, "{}", n),
            ClientId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId::Str(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        ClientId::Str(s)
    }
}

impl From<i64> for ClientId {
    fn from(n: i64) -> Self {
        ClientId::Int(n)
    }
}

/// A stored full-content snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: Version,
    pub content: String,
}

/// Body of `getSnapshot`: `{content: null}` or `{content, version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl SnapshotBody {
    pub fn into_snapshot(self) -> Option<Snapshot> {
        match (self.content, self.version) {
            (Some(content), Some(version)) => Some(Snapshot { version, content }),
            _ => None,
        }
    }
}

impl From<Option<Snapshot>> for SnapshotBody {
    fn from(snapshot: Option<Snapshot>) -> Self {
        match snapshot {
            Some(s) => SnapshotBody {
                content: Some(s.content),
                version: Some(s.version),
            },
            None => SnapshotBody {
                content: None,
                version: None,
            },
        }
    }
}

/// Request body of `submitSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSnapshotRequest {
    pub version: Version,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_snapshots: Option<bool>,
}

/// Steps after some version, with parallel client attributions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsResponse {
    pub steps: Vec<Step>,
    pub client_ids: Vec<ClientId>,
    /// Version reached after applying `steps`.
    pub version: Version,
    /// Set when the server stopped at its scan limit and more steps exist.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Query parameters of `getSteps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsQuery {
    pub after_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<Version>,
}

/// Request body of `submitSteps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStepsRequest {
    pub base_version: Version,
    pub client_id: ClientId,
    pub steps: Vec<Step>,
}

/// Outcome of `submitSteps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SubmitStepsResult {
    /// The batch was appended to the log.
    Synced,
    /// Someone else wrote first; merge these and retry.
    NeedsRebase {
        steps: Vec<Step>,
        #[serde(rename = "clientIds")]
        client_ids: Vec<ClientId>,
    },
}

/// Query parameters of `get`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_steps: Option<bool>,
}

/// Raw document state: nearest snapshot plus the steps after it, unapplied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ids: Option<Vec<ClientId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Set when `steps` stopped at the scan limit short of the latest version.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Query parameters of `deleteSnapshots`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSnapshotsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_version: Option<Version>,
}

/// Query parameters of `deleteSteps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteStepsQuery {
    /// Milliseconds since the Unix epoch.
    pub before_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_version: Option<Version>,
    #[serde(default)]
    pub delete_newer_than_latest_snapshot: bool,
}

/// Frame pushed on the `watch` WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionUpdate {
    pub version: Option<Version>,
}

impl VersionUpdate {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

/// Error body returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
