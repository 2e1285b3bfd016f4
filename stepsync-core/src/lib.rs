//! Stepsync Core Library
//!
//! Client side of the stepsync protocol: wire types, the HTTP client, the
//! per-document reconciliation loop, and one-shot document helpers.

pub mod document;
pub mod model;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;

pub use document::{create, load_latest, transform, INITIAL_VERSION};
pub use model::{DocumentModel, ModelError, SendableSteps};
pub use session::{ErrorHandler, SyncOptions, SyncSession};
pub use sync::{ClientId, HttpSyncApi, Snapshot, Step, SyncApi, SyncError, Version};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
