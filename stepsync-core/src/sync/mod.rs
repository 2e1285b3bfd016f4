//! Sync protocol: wire types, errors, and the remote API.
//!
//! ## Protocol
//!
//! A document is a log of step batches on top of full-content snapshots,
//! both keyed by a per-document version number.
//!
//! 1. Writers submit steps against the version they last saw
//! 2. The server appends them if nothing newer exists, otherwise it answers
//!    `needs-rebase` with the newer steps
//! 3. Writers merge those steps locally and resubmit
//! 4. Readers fetch the nearest snapshot plus the steps after it

mod api;
mod client;
mod error;
mod protocol;

pub use api::SyncApi;
pub use client::HttpSyncApi;
pub use error::SyncError;
pub use protocol::{
    ClientId, DeleteSnapshotsQuery, DeleteStepsQuery, DocumentQuery, DocumentState, ErrorBody,
    Snapshot, SnapshotBody, Step, StepsQuery, StepsResponse, SubmitSnapshotRequest,
    SubmitStepsRequest, SubmitStepsResult, Version, VersionUpdate,
};
