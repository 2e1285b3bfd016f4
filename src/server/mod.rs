//! Server side of stepsync: storage, the sync protocol and its HTTP surface.
//!
//! Layers, bottom up:
//!
//! - [`storage`]: snapshots and deltas in SQLite
//! - [`sync`]: accepting or rejecting step submissions, version hub
//! - [`reconstruct`]: document state at any version
//! - [`retention`]: bounded pruning with continuations
//! - [`backend`]: the protocol calls, composed
//! - [`http`]: axum routes and API-key checks

pub mod backend;
pub mod http;
pub mod reconstruct;
pub mod retention;
pub mod storage;
pub mod sync;

pub use backend::{BackendOptions, SnapshotHook, SyncBackend};
pub use http::{router, ApiError, ApiKeyStore, AppState};
pub use reconstruct::Reconstructor;
pub use retention::{run_to_completion, PruneOutcome, PruneRequest, Pruner};
pub use storage::{DocumentStore, StoreError};
pub use sync::{SyncCoordinator, SyncHub};
