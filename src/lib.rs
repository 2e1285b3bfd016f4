//! stepsync: a step-log document sync server.
//!
//! Documents are append-only logs of opaque edit steps layered on full
//! snapshots. Writers submit steps against the version they last saw and
//! rebase when someone else got there first; see [`server`] for the pieces
//! and `stepsync-core` for the client side.

pub mod config;
pub mod db;
pub mod lines;
pub mod server;
