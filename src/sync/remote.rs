//! The authoritative note store kept by the remote side.
//!
//! [`RemoteCollection`] holds the server semantics (timestamp stamping,
//! replace vs. union merge). The HTTP server wraps it in routes and
//! [`InProcessRemote`] exposes it through [`RemoteStore`] without a network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::serde::ts_milliseconds_option;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::client::{RemoteError, RemoteStore, SyncResponse};
use super::reconcile::{authoritative_replace, stamp_incoming, union_merge};
use super::scheduler::Clock;
use crate::storage::{CollectionState, IncomingNote, Note, NoteFields, NoteId};

/// Body of an authoritative replace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceRequest {
    pub notes: Vec<IncomingNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_note_id: Option<NoteId>,
    #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    pub last_change_at: Option<DateTime<Utc>>,
}

impl From<&CollectionState> for ReplaceRequest {
    fn from(state: &CollectionState) -> Self {
        Self {
            notes: state.notes.iter().cloned().map(IncomingNote::from).collect(),
            active_note_id: state.active_note_id.clone(),
            last_change_at: Some(state.last_change_at),
        }
    }
}

/// Shared handle to a remote collection
pub type SharedCollection = Arc<RwLock<RemoteCollection>>;

/// Server-side note collection
#[derive(Debug, Clone, Default)]
pub struct RemoteCollection {
    state: CollectionState,
}

impl RemoteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedCollection {
        Arc::new(RwLock::new(self))
    }

    /// Current collection, with the active note resolved
    pub fn snapshot(&self) -> CollectionState {
        let mut state = self.state.clone();
        state.ensure_active();
        state
    }

    /// Make `request` the entire collection
    pub fn replace_all(&mut self, request: ReplaceRequest, now: DateTime<Utc>) -> CollectionState {
        let supplied = stamp_incoming(request.notes, now);
        let replacement = authoritative_replace(&self.state.notes, supplied);
        if !replacement.removed.is_empty() {
            log::debug!(
                "Remote store: replace removed {} note(s)",
                replacement.removed.len()
            );
        }
        self.state = CollectionState {
            notes: replacement.notes,
            active_note_id: request.active_note_id,
            last_change_at: request.last_change_at.unwrap_or(now),
        };
        self.state.normalize();
        self.state.clone()
    }

    pub fn get(&self, id: &str) -> Option<Note> {
        self.state.get(id).cloned()
    }

    /// Create or replace `id` with `fields`.
    ///
    /// The note is replaced whole: fields absent from the request take their
    /// defaults. `created_at` is kept for existing notes and taken from the
    /// request (or `now`) for new ones. `updated_at` is always `now`.
    pub fn upsert(&mut self, id: &str, fields: NoteFields, now: DateTime<Utc>) -> Note {
        let created_at = match self.state.get(id) {
            Some(existing) => existing.created_at,
            None => fields.created_at.unwrap_or(now),
        };

        let note = Note {
            id: id.to_string(),
            title: fields.title.unwrap_or_default(),
            content: fields.content.unwrap_or_default(),
            pinned: fields.pinned.unwrap_or(false),
            source_url: fields.source_url,
            created_at,
            updated_at: now.max(created_at),
        };

        self.state.notes = union_merge(std::mem::take(&mut self.state.notes), vec![note.clone()]);
        self.state.last_change_at = now;
        note
    }

    /// Returns false if `id` did not exist
    pub fn delete(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let removed = self.state.remove(id).is_some();
        if removed {
            self.state.last_change_at = now;
            if self.state.active_note_id.as_deref() == Some(id) {
                self.state.active_note_id = None;
            }
        }
        removed
    }

    /// Union-merge `incoming` and return the whole resulting collection
    pub fn sync_batch(&mut self, incoming: Vec<IncomingNote>, now: DateTime<Utc>) -> SyncResponse {
        let synced = incoming.len();
        let notes = stamp_incoming(incoming, now);
        self.state.notes = union_merge(std::mem::take(&mut self.state.notes), notes);
        self.state.last_change_at = now;
        SyncResponse {
            notes: self.state.notes.clone(),
            synced,
        }
    }
}

/// Remote store living in this process.
///
/// Can be marked unreachable, in which case every call fails with
/// [`RemoteError::Network`].
pub struct InProcessRemote {
    collection: SharedCollection,
    clock: Arc<dyn Clock>,
    reachable: AtomicBool,
}

impl InProcessRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_collection(RemoteCollection::new().shared(), clock)
    }

    pub fn with_collection(collection: SharedCollection, clock: Arc<dyn Clock>) -> Self {
        Self {
            collection,
            clock,
            reachable: AtomicBool::new(true),
        }
    }

    pub fn collection(&self) -> SharedCollection {
        Arc::clone(&self.collection)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Network("remote store unreachable".to_string()))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RemoteCollection>, RemoteError> {
        self.ensure_reachable()?;
        self.collection.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RemoteCollection>, RemoteError> {
        self.ensure_reachable()?;
        self.collection.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> RemoteError {
    RemoteError::Server {
        status: 500,
        message: "note store lock poisoned".to_string(),
    }
}

#[async_trait]
impl RemoteStore for InProcessRemote {
    async fn fetch_all(&self) -> Result<CollectionState, RemoteError> {
        Ok(self.read()?.snapshot())
    }

    async fn replace_all(&self, state: &CollectionState) -> Result<CollectionState, RemoteError> {
        let now = self.clock.now();
        Ok(self.write()?.replace_all(state.into(), now))
    }

    async fn get(&self, id: &str) -> Result<Note, RemoteError> {
        self.read()?
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn upsert(&self, id: &str, fields: &NoteFields) -> Result<Note, RemoteError> {
        let now = self.clock.now();
        Ok(self.write()?.upsert(id, fields.clone(), now))
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let now = self.clock.now();
        if self.write()?.delete(id, now) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(id.to_string()))
        }
    }

    async fn sync_batch(&self, notes: &[Note]) -> Result<SyncResponse, RemoteError> {
        let now = self.clock.now();
        let incoming = notes.iter().cloned().map(IncomingNote::from).collect();
        Ok(self.write()?.sync_batch(incoming, now))
    }
}
