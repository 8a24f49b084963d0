//! Offline-tolerant note synchronization.
//!
//! A [`StateCoordinator`](sync::StateCoordinator) owns the note collection,
//! applies edits immediately, and writes them back to a remote store with
//! per-note debouncing, falling back to a local cache when the remote is
//! unreachable.

pub mod server;
pub mod storage;
pub mod sync;
