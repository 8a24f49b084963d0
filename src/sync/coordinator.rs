use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::storage::text::export_file_name;
use crate::storage::{
    search, CacheBackend, CacheError, CollectionState, IncomingNote, Note, NoteFields, NoteId,
};

use super::client::{RemoteError, RemoteStore, SyncResponse};
use super::config::{Connectivity, SyncConfig, SyncStatus};
use super::reconcile::union_merge;
use super::scheduler::{Clock, Debouncer, Interval};

/// Shortest allowed periodic sync interval
const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid import: {0}")]
    Validation(String),
    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single-field edit of a note
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEdit {
    Title(String),
    Content(String),
    SourceUrl(Option<String>),
}

/// Work the coordinator wants done against its backends
#[derive(Debug, Clone)]
pub enum Effect {
    /// Upsert this snapshot of a note
    Persist(Note),
    /// Delete a note remotely
    Delete(NoteId),
    /// Push the whole collection through a batch sync
    Sync(Vec<Note>),
    /// Overwrite the local cache
    WriteCache(CollectionState),
}

/// Result of running an [`Effect`]
#[derive(Debug)]
pub enum Outcome {
    Persisted {
        /// The note as it was sent
        sent: Note,
        result: Result<Note, RemoteError>,
    },
    Deleted {
        id: NoteId,
        result: Result<(), RemoteError>,
    },
    Synced(Result<SyncResponse, RemoteError>),
    CacheWritten(Result<(), CacheError>),
}

/// Runs effects. Owns only shared handles, so its futures outlive any borrow
/// of the coordinator.
#[derive(Clone)]
pub struct EffectRunner {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<dyn CacheBackend>,
}

impl EffectRunner {
    pub async fn run(self, effect: Effect) -> Outcome {
        match effect {
            Effect::Persist(note) => {
                let result = self.remote.upsert(&note.id, &note.fields()).await;
                Outcome::Persisted { sent: note, result }
            }
            Effect::Delete(id) => {
                let result = self.remote.delete(&id).await;
                Outcome::Deleted { id, result }
            }
            Effect::Sync(notes) => Outcome::Synced(self.remote.sync_batch(&notes).await),
            Effect::WriteCache(state) => Outcome::CacheWritten(self.cache.write(&state).await),
        }
    }
}

/// Counts reported by an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Notes in the payload
    pub imported: usize,
    /// Ids that were not in the collection before
    pub added: usize,
}

/// Plain-text export of one note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextExport {
    pub file_name: String,
    pub content: String,
}

struct ParsedImport {
    notes: Vec<Note>,
    active_note_id: Option<NoteId>,
}

/// Owns the live note collection and keeps it in step with the cache and
/// the remote store.
///
/// Mutations apply immediately and only queue effects. Effects are handed out
/// by [`take_due`](Self::take_due) once their timers elapse and their results
/// come back through [`apply`](Self::apply).
pub struct StateCoordinator {
    state: CollectionState,
    online: bool,
    remote: Arc<dyn RemoteStore>,
    cache: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    /// Debounced upserts per note
    persists: Debouncer<NoteId>,
    /// Deletes not yet sent
    deletes: Vec<NoteId>,
    /// Deletes not yet confirmed, sent or not
    tombstones: HashSet<NoteId>,
    sync_timer: Interval,
    sync_in_flight: bool,
    sync_requeued: bool,
    /// Notes changed locally since the last sync snapshot was taken
    changed_since_sync: HashSet<NoteId>,
    cache_dirty: bool,
    cache_write_in_flight: bool,
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl StateCoordinator {
    pub fn new(
        config: &SyncConfig,
        remote: Arc<dyn RemoteStore>,
        cache: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut sync_timer = Interval::new(config.sync_interval().max(MIN_SYNC_INTERVAL));
        sync_timer.start(clock.now());
        Self {
            state: CollectionState::default(),
            online: true,
            remote,
            cache,
            clock,
            persists: Debouncer::new(config.debounce()),
            deletes: Vec::new(),
            tombstones: HashSet::new(),
            sync_timer,
            sync_in_flight: false,
            sync_requeued: false,
            changed_since_sync: HashSet::new(),
            cache_dirty: false,
            cache_write_in_flight: false,
            last_sync: None,
            last_error: None,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn state(&self) -> &CollectionState {
        &self.state
    }

    /// Notes in list order
    pub fn notes(&self) -> Vec<Note> {
        self.state.sorted()
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.state.get(id)
    }

    pub fn active_note(&self) -> Option<&Note> {
        self.state.active_note()
    }

    pub fn search(&self, query: &str) -> Vec<Note> {
        search(&self.state.notes, query)
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            connectivity: if self.online {
                Connectivity::Online
            } else {
                Connectivity::Offline
            },
            pending_changes: self.persists.pending(),
            pending_deletes: self.tombstones.len(),
            last_sync: self.last_sync,
            error: self.last_error.clone(),
        }
    }

    pub fn runner(&self) -> EffectRunner {
        EffectRunner {
            remote: Arc::clone(&self.remote),
            cache: Arc::clone(&self.cache),
        }
    }

    /// Load the collection from the remote store, or from the cache if the
    /// remote read fails. Returns the state exactly as loaded.
    pub async fn load(&mut self) -> CollectionState {
        let loaded = match self.remote.fetch_all().await {
            Ok(state) => {
                log::info!("Coordinator: loaded {} note(s) from remote", state.notes.len());
                self.last_error = None;
                self.cache_dirty = true;
                state
            }
            Err(e) => {
                log::warn!("Coordinator: remote read failed, using local cache: {}", e);
                self.last_error = Some(e.to_string());
                let state = self.cache.read().await;
                log::info!("Coordinator: loaded {} note(s) from cache", state.notes.len());
                state
            }
        };

        self.state = loaded.clone();
        self.state.normalize();
        self.persists = Debouncer::new(self.persists.delay());
        self.changed_since_sync.clear();
        if self.online {
            self.sync_timer.start(self.now());
        }
        loaded
    }

    // ===== Mutations =====

    fn mark_changed(&mut self, id: &str, now: DateTime<Utc>) {
        self.state.last_change_at = now;
        self.changed_since_sync.insert(id.to_string());
    }

    /// Create a note and make it active. It is persisted without delay.
    pub fn create_note(&mut self, fields: NoteFields) -> Note {
        let now = self.now();
        let note = Note::new(fields, now);
        self.state.notes.push(note.clone());
        self.state.active_note_id = Some(note.id.clone());
        self.mark_changed(&note.id, now);
        self.persists.trigger_now(note.id.clone(), now);
        log::debug!("Coordinator: created note {}", note.id);
        note
    }

    /// Create a note from text selected on a page
    pub fn capture_selection(&mut self, selection: &str, page_url: Option<&str>) -> Note {
        self.create_note(NoteFields::from_selection(selection, page_url))
    }

    /// Apply an edit. The write-back is debounced per note.
    pub fn edit_note(&mut self, id: &str, edit: NoteEdit) -> Result<Note, CoordinatorError> {
        let now = self.now();
        let note = self
            .state
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::NoteNotFound(id.to_string()))?;
        match edit {
            NoteEdit::Title(title) => note.title = title,
            NoteEdit::Content(content) => note.content = content,
            NoteEdit::SourceUrl(url) => note.source_url = url,
        }
        note.touch(now);
        let note = note.clone();

        self.mark_changed(id, now);
        self.persists.trigger(id.to_string(), now);
        Ok(note)
    }

    pub fn update_title(&mut self, id: &str, title: impl Into<String>) -> Result<Note, CoordinatorError> {
        self.edit_note(id, NoteEdit::Title(title.into()))
    }

    pub fn update_content(&mut self, id: &str, content: impl Into<String>) -> Result<Note, CoordinatorError> {
        self.edit_note(id, NoteEdit::Content(content.into()))
    }

    /// Flip the pinned flag. Persisted without delay.
    pub fn toggle_pin(&mut self, id: &str) -> Result<Note, CoordinatorError> {
        let now = self.now();
        let note = self
            .state
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::NoteNotFound(id.to_string()))?;
        note.pinned = !note.pinned;
        note.touch(now);
        let note = note.clone();

        self.mark_changed(id, now);
        self.persists.trigger_now(id.to_string(), now);
        Ok(note)
    }

    pub fn set_active(&mut self, id: &str) -> Result<(), CoordinatorError> {
        if !self.state.contains(id) {
            return Err(CoordinatorError::NoteNotFound(id.to_string()));
        }
        self.state.active_note_id = Some(id.to_string());
        Ok(())
    }

    /// Remove a note. If it was active, the most relevant remaining note
    /// becomes active.
    pub fn delete_note(&mut self, id: &str) -> Result<Note, CoordinatorError> {
        let now = self.now();
        let note = self
            .state
            .remove(id)
            .ok_or_else(|| CoordinatorError::NoteNotFound(id.to_string()))?;

        self.persists.cancel(&note.id);
        self.changed_since_sync.remove(&note.id);
        if !self.deletes.contains(&note.id) {
            self.deletes.push(note.id.clone());
        }
        self.tombstones.insert(note.id.clone());
        if self.state.active_note_id.as_deref() == Some(id) {
            self.state.active_note_id = None;
        }
        self.state.ensure_active();
        self.state.last_change_at = now;
        self.cache_dirty = true;
        log::debug!("Coordinator: deleted note {}", note.id);
        Ok(note)
    }

    // ===== Import / export =====

    /// Import a JSON export. See [`import`](Self::import).
    pub fn import_json(&mut self, payload: &str) -> Result<ImportSummary, CoordinatorError> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| CoordinatorError::Validation(format!("not valid JSON: {}", e)))?;
        self.import(&value)
    }

    /// Union-merge an exported collection into this one.
    ///
    /// The payload is validated in full first; if anything is wrong nothing
    /// changes. On success the cache is rewritten and a sync is scheduled.
    pub fn import(&mut self, payload: &serde_json::Value) -> Result<ImportSummary, CoordinatorError> {
        let now = self.now();
        let parsed = parse_import(payload, now)?;

        let incoming_ids: HashSet<&str> = parsed.notes.iter().map(|n| n.id.as_str()).collect();
        let summary = ImportSummary {
            imported: parsed.notes.len(),
            added: incoming_ids
                .iter()
                .filter(|id| !self.state.contains(id))
                .count(),
        };

        for note in &parsed.notes {
            self.tombstones.remove(&note.id);
            self.deletes.retain(|id| id != &note.id);
            self.changed_since_sync.insert(note.id.clone());
        }

        self.state.notes = union_merge(std::mem::take(&mut self.state.notes), parsed.notes);
        if let Some(active) = parsed.active_note_id {
            self.state.active_note_id = Some(active);
        }
        self.state.normalize();
        self.state.last_change_at = now;
        self.cache_dirty = true;
        self.sync_timer.fire_now(now);

        log::info!(
            "Coordinator: imported {} note(s), {} new",
            summary.imported,
            summary.added
        );
        Ok(summary)
    }

    /// Snapshot of the whole collection
    pub fn export(&self) -> CollectionState {
        self.state.clone()
    }

    /// Snapshot as pretty JSON, importable with [`import_json`](Self::import_json)
    pub fn export_json(&self) -> Result<String, CoordinatorError> {
        Ok(serde_json::to_string_pretty(&self.state)?)
    }

    pub fn export_note_text(&self, id: &str) -> Result<TextExport, CoordinatorError> {
        let note = self
            .state
            .get(id)
            .ok_or_else(|| CoordinatorError::NoteNotFound(id.to_string()))?;
        Ok(TextExport {
            file_name: export_file_name(&note.title),
            content: note.content.clone(),
        })
    }

    // ===== Connectivity and sync =====

    /// Environment connectivity signal. Coming back online syncs right away.
    pub fn set_online(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;
        if online {
            log::info!("Coordinator: back online, scheduling sync");
            self.sync_timer.fire_now(self.now());
        } else {
            log::info!("Coordinator: offline, persisting to local cache only");
        }
    }

    /// Schedule a sync as soon as possible
    pub fn request_sync(&mut self) {
        self.sync_timer.fire_now(self.now());
    }

    /// When the driver should next call [`take_due`](Self::take_due)
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        let now = self.now();
        let immediate = (self.online && !self.deletes.is_empty())
            || (self.cache_dirty && !self.cache_write_in_flight);
        let timers = [self.persists.next_deadline(), self.sync_timer.next_deadline()];
        let next = timers.into_iter().flatten().min();
        if immediate {
            Some(next.map_or(now, |at| at.min(now)))
        } else {
            next
        }
    }

    /// Collect the effects whose time has come.
    ///
    /// While offline, due persists become a cache write and periodic syncs
    /// are skipped.
    pub fn take_due(&mut self) -> Vec<Effect> {
        let now = self.now();
        let mut effects = Vec::new();
        let due = self.persists.take_due(now);

        if self.online {
            effects.extend(self.deletes.drain(..).map(Effect::Delete));
            for id in due {
                if let Some(note) = self.state.get(&id) {
                    effects.push(Effect::Persist(note.clone()));
                }
            }
            if self.sync_timer.take_due(now) {
                if self.sync_in_flight {
                    self.sync_requeued = true;
                } else {
                    log::debug!("Coordinator: syncing {} note(s)", self.state.notes.len());
                    self.sync_in_flight = true;
                    self.changed_since_sync.clear();
                    effects.push(Effect::Sync(self.state.notes.clone()));
                }
            }
        } else {
            if !due.is_empty() {
                self.cache_dirty = true;
            }
            if self.sync_timer.take_due(now) {
                log::debug!("Coordinator: offline, skipping periodic sync");
            }
        }

        if self.cache_dirty && !self.cache_write_in_flight {
            self.cache_dirty = false;
            self.cache_write_in_flight = true;
            effects.push(Effect::WriteCache(self.state.clone()));
        }
        effects
    }

    /// Fold the result of an effect back into the coordinator
    pub fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Persisted { sent, result } => match result {
                Ok(note) => {
                    self.last_error = None;
                    // The server's timestamps win only if the note is still what was sent.
                    if let Some(local) = self.state.get_mut(&sent.id) {
                        if *local == sent {
                            *local = note;
                        }
                    }
                    self.cache_dirty = true;
                }
                Err(e) => self.write_failed(&format!("persist of {}", sent.id), e),
            },
            Outcome::Deleted { id, result } => match result {
                Ok(()) => {
                    self.tombstones.remove(&id);
                    self.cache_dirty = true;
                }
                Err(RemoteError::NotFound(_)) => {
                    log::debug!("Coordinator: note {} already gone remotely", id);
                    self.tombstones.remove(&id);
                    self.cache_dirty = true;
                }
                Err(e) => {
                    if !self.deletes.contains(&id) {
                        self.deletes.push(id.clone());
                    }
                    self.write_failed(&format!("delete of {}", id), e);
                }
            },
            Outcome::Synced(result) => {
                self.sync_in_flight = false;
                if std::mem::take(&mut self.sync_requeued) {
                    self.sync_timer.fire_now(self.now());
                }
                match result {
                    Ok(response) => self.apply_sync(response),
                    Err(e) => self.write_failed("sync", e),
                }
            }
            Outcome::CacheWritten(result) => {
                self.cache_write_in_flight = false;
                if let Err(e) = result {
                    log::error!("Coordinator: cache write failed: {}", e);
                }
            }
        }
    }

    /// Replace local notes with the merged remote collection, keeping notes
    /// that changed locally while the sync was in flight.
    fn apply_sync(&mut self, response: SyncResponse) {
        let remote_notes: Vec<Note> = response
            .notes
            .into_iter()
            .filter(|n| !self.tombstones.contains(&n.id))
            .collect();
        let local_changes: Vec<Note> = self
            .state
            .notes
            .iter()
            .filter(|n| self.changed_since_sync.contains(&n.id))
            .cloned()
            .collect();

        log::info!(
            "Coordinator: sync complete, {} pushed, {} note(s) remote, {} kept from local edits",
            response.synced,
            remote_notes.len(),
            local_changes.len()
        );

        self.state.notes = union_merge(remote_notes, local_changes);
        self.state.normalize();
        self.last_sync = Some(self.now());
        self.last_error = None;
        self.cache_dirty = true;
    }

    fn write_failed(&mut self, what: &str, error: RemoteError) {
        log::warn!("Coordinator: {} failed, falling back to local cache: {}", what, error);
        self.online = false;
        self.last_error = Some(error.to_string());
        self.cache_dirty = true;
    }

    /// Run every due effect to completion, one at a time
    pub async fn flush_due(&mut self) {
        loop {
            let effects = self.take_due();
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                let outcome = self.runner().run(effect).await;
                self.apply(outcome);
            }
        }
    }

    /// Persist everything pending now, ignoring quiet windows
    pub async fn flush_all(&mut self) {
        self.persists.fire_all(self.now());
        self.flush_due().await;
    }
}

fn parse_import(payload: &serde_json::Value, now: DateTime<Utc>) -> Result<ParsedImport, CoordinatorError> {
    let object = payload
        .as_object()
        .ok_or_else(|| CoordinatorError::Validation("expected a JSON object".to_string()))?;
    let items = object
        .get("notes")
        .and_then(|v| v.as_array())
        .ok_or_else(|| CoordinatorError::Validation("missing or invalid note list".to_string()))?;

    let active_note_id = match object.get("activeNoteId") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(id)) => Some(id.clone()),
        Some(_) => {
            return Err(CoordinatorError::Validation(
                "activeNoteId must be a string".to_string(),
            ))
        }
    };

    let mut notes = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if !item.is_object() {
            return Err(CoordinatorError::Validation(format!("note {} is not an object", i)));
        }
        let incoming: IncomingNote = serde_json::from_value(item.clone())
            .map_err(|e| CoordinatorError::Validation(format!("note {}: {}", i, e)))?;
        let note = incoming
            .into_note(now)
            .ok_or_else(|| CoordinatorError::Validation(format!("note {} has no id", i)))?;
        notes.push(note);
    }

    Ok(ParsedImport {
        notes,
        active_note_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCache;
    use crate::sync::remote::InProcessRemote;
    use crate::sync::scheduler::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    /// Remote that records calls before delegating to an in-process store
    struct RecordingRemote {
        inner: InProcessRemote,
        upserts: Mutex<Vec<(NoteId, NoteFields)>>,
        syncs: Mutex<usize>,
    }

    impl RecordingRemote {
        fn upserts(&self) -> Vec<(NoteId, NoteFields)> {
            self.upserts.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.upserts.lock().unwrap().clear();
            *self.syncs.lock().unwrap() = 0;
        }

        fn sync_count(&self) -> usize {
            *self.syncs.lock().unwrap()
        }
    }

    #[async_trait]
    impl RemoteStore for RecordingRemote {
        async fn fetch_all(&self) -> Result<CollectionState, RemoteError> {
            self.inner.fetch_all().await
        }

        async fn replace_all(&self, state: &CollectionState) -> Result<CollectionState, RemoteError> {
            self.inner.replace_all(state).await
        }

        async fn get(&self, id: &str) -> Result<Note, RemoteError> {
            self.inner.get(id).await
        }

        async fn upsert(&self, id: &str, fields: &NoteFields) -> Result<Note, RemoteError> {
            self.upserts.lock().unwrap().push((id.to_string(), fields.clone()));
            self.inner.upsert(id, fields).await
        }

        async fn delete(&self, id: &str) -> Result<(), RemoteError> {
            self.inner.delete(id).await
        }

        async fn sync_batch(&self, notes: &[Note]) -> Result<SyncResponse, RemoteError> {
            *self.syncs.lock().unwrap() += 1;
            self.inner.sync_batch(notes).await
        }
    }

    struct Harness {
        clock: ManualClock,
        remote: Arc<RecordingRemote>,
        cache: Arc<MemoryCache>,
        coordinator: StateCoordinator,
    }

    fn harness_with_cache(cache: MemoryCache) -> Harness {
        let clock = ManualClock::new(t(0));
        let remote = Arc::new(RecordingRemote {
            inner: InProcessRemote::new(Arc::new(clock.clone())),
            upserts: Mutex::new(Vec::new()),
            syncs: Mutex::new(0),
        });
        let cache = Arc::new(cache);
        let coordinator = StateCoordinator::new(
            &SyncConfig::default(),
            remote.clone(),
            cache.clone(),
            Arc::new(clock.clone()),
        );
        Harness {
            clock,
            remote,
            cache,
            coordinator,
        }
    }

    fn harness() -> Harness {
        harness_with_cache(MemoryCache::new())
    }

    #[tokio::test]
    async fn test_create_then_delete_only_note() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("A", "x"));
        assert_eq!(note.created_at, t(0));
        assert_eq!(note.updated_at, t(0));
        assert_eq!(h.coordinator.notes(), vec![note.clone()]);
        assert_eq!(h.coordinator.state().active_note_id.as_deref(), Some(note.id.as_str()));

        h.coordinator.delete_note(&note.id).unwrap();
        assert!(h.coordinator.state().notes.is_empty());
        assert_eq!(h.coordinator.state().active_note_id, None);
    }

    #[tokio::test]
    async fn test_create_persists_immediately() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("A", "x"));
        h.coordinator.flush_due().await;
        let upserts = h.remote.upserts();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, note.id);
        assert!(h.cache.write_count() >= 1);
        assert_eq!(h.cache.read().await.notes.len(), 1);
    }

    #[tokio::test]
    async fn test_debounced_edits_persist_once_with_final_content() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::default());
        h.coordinator.flush_due().await;
        h.remote.clear();

        for (ms, text) in [(0, "h"), (50, "he"), (100, "hel"), (150, "hello")] {
            h.clock.set(t(ms));
            h.coordinator.update_content(&note.id, text).unwrap();
            h.coordinator.flush_due().await;
        }
        // Read-your-writes before anything was sent
        assert_eq!(h.coordinator.get(&note.id).unwrap().content, "hello");

        h.clock.set(t(449));
        h.coordinator.flush_due().await;
        assert!(h.remote.upserts().is_empty());

        h.clock.set(t(450));
        h.coordinator.flush_due().await;
        let upserts = h.remote.upserts();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].1.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_load_falls_back_to_cache() {
        let cached = CollectionState {
            notes: vec![Note::new(NoteFields::titled("cached", ""), t(-10))],
            active_note_id: None,
            last_change_at: t(-5),
        };
        let mut h = harness_with_cache(MemoryCache::with_state(cached.clone()));
        h.remote.inner.set_reachable(false);

        let loaded = h.coordinator.load().await;
        assert_eq!(loaded, cached);
        assert_eq!(h.coordinator.state().notes, cached.notes);
        // Normalization picks the active note
        assert_eq!(
            h.coordinator.state().active_note_id.as_deref(),
            Some(cached.notes[0].id.as_str())
        );
        assert!(h.coordinator.status().error.is_some());
    }

    #[tokio::test]
    async fn test_load_from_remote_backs_up_to_cache() {
        let mut h = harness();
        h.remote
            .inner
            .upsert("r1", &NoteFields::titled("remote", "body"))
            .await
            .unwrap();

        let loaded = h.coordinator.load().await;
        assert_eq!(loaded.notes.len(), 1);
        h.coordinator.flush_due().await;
        assert_eq!(h.cache.read().await.notes.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_goes_offline_and_caches() {
        let mut h = harness();
        h.remote.inner.set_reachable(false);
        let note = h.coordinator.create_note(NoteFields::titled("offline", "x"));
        h.coordinator.flush_due().await;

        assert!(!h.coordinator.is_online());
        let status = h.coordinator.status();
        assert_eq!(status.connectivity, Connectivity::Offline);
        assert!(status.error.is_some());
        assert_eq!(h.cache.read().await.get(&note.id), Some(&note));
        assert_eq!(h.coordinator.get(&note.id), Some(&note));
    }

    #[tokio::test]
    async fn test_offline_skips_remote_and_periodic_sync() {
        let mut h = harness();
        h.coordinator.set_online(false);
        let note = h.coordinator.create_note(NoteFields::titled("local", ""));
        h.clock.advance(Duration::from_secs(31));
        h.coordinator.flush_due().await;

        assert!(h.remote.upserts().is_empty());
        assert_eq!(h.remote.sync_count(), 0);
        assert!(h.cache.read().await.contains(&note.id));
    }

    #[tokio::test]
    async fn test_back_online_triggers_one_sync() {
        let mut h = harness();
        h.coordinator.set_online(false);
        h.coordinator.create_note(NoteFields::titled("made offline", ""));
        h.coordinator.flush_due().await;

        h.coordinator.set_online(true);
        h.coordinator.flush_due().await;
        assert_eq!(h.remote.sync_count(), 1);
        assert_eq!(h.remote.inner.fetch_all().await.unwrap().notes.len(), 1);
        assert!(h.coordinator.status().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_periodic_sync_merges_remote_notes() {
        let mut h = harness();
        h.remote
            .inner
            .upsert("remote", &NoteFields::titled("from elsewhere", ""))
            .await
            .unwrap();
        let local = h.coordinator.create_note(NoteFields::titled("here", ""));
        h.coordinator.flush_due().await;
        assert_eq!(h.remote.sync_count(), 0);

        h.clock.advance(Duration::from_secs(30));
        h.coordinator.flush_due().await;
        assert_eq!(h.remote.sync_count(), 1);
        assert!(h.coordinator.get("remote").is_some());
        assert!(h.coordinator.get(&local.id).is_some());
    }

    #[tokio::test]
    async fn test_edit_during_sync_survives_result() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("n", "before"));
        h.coordinator.flush_due().await;

        h.coordinator.request_sync();
        let effects = h.coordinator.take_due();
        let sync = effects
            .into_iter()
            .find(|e| matches!(e, Effect::Sync(_)))
            .unwrap();

        h.coordinator.update_content(&note.id, "after").unwrap();
        let outcome = h.coordinator.runner().run(sync).await;
        h.coordinator.apply(outcome);

        assert_eq!(h.coordinator.get(&note.id).unwrap().content, "after");
    }

    #[tokio::test]
    async fn test_delete_missing_remotely_is_success() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("gone", ""));
        // Never persisted remotely
        h.coordinator.persists.cancel(&note.id);
        h.coordinator.delete_note(&note.id).unwrap();
        h.coordinator.flush_due().await;

        assert!(h.coordinator.is_online());
        assert_eq!(h.coordinator.status().pending_deletes, 0);
    }

    #[tokio::test]
    async fn test_deleted_note_not_resurrected_by_sync() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("doomed", ""));
        h.coordinator.flush_due().await;

        h.coordinator.set_online(false);
        h.coordinator.delete_note(&note.id).unwrap();
        h.coordinator.flush_due().await;
        assert!(!h.cache.read().await.contains(&note.id));

        h.coordinator.set_online(true);
        h.coordinator.flush_due().await;
        assert!(h.coordinator.get(&note.id).is_none());
        assert!(h.remote.inner.get(&note.id).await.is_err());
    }

    #[tokio::test]
    async fn test_online_delete_rewrites_cache() {
        let mut h = harness();
        let keep = h.coordinator.create_note(NoteFields::titled("keep", ""));
        let note = h.coordinator.create_note(NoteFields::titled("doomed", ""));
        h.coordinator.flush_due().await;
        assert!(h.cache.read().await.contains(&note.id));

        h.coordinator.delete_note(&note.id).unwrap();
        h.coordinator.flush_all().await;

        assert!(h.coordinator.is_online());
        assert!(h.remote.inner.get(&note.id).await.is_err());
        let cached = h.cache.read().await;
        assert!(!cached.contains(&note.id));
        assert!(cached.contains(&keep.id));
    }

    #[tokio::test]
    async fn test_stale_persist_echo_keeps_newer_edit() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("race", ""));
        h.coordinator.flush_due().await;

        fn take_persist(c: &mut StateCoordinator) -> Effect {
            c.take_due()
                .into_iter()
                .find(|e| matches!(e, Effect::Persist(_)))
                .unwrap()
        }

        h.coordinator.update_content(&note.id, "x").unwrap();
        h.clock.advance(Duration::from_millis(300));
        let first = take_persist(&mut h.coordinator);
        let first = h.coordinator.runner().run(first).await;

        h.clock.advance(Duration::from_millis(10));
        h.coordinator.update_content(&note.id, "y").unwrap();
        h.clock.advance(Duration::from_millis(300));
        let second = take_persist(&mut h.coordinator);

        // The echo of "x" lands after "y" was already sent.
        h.coordinator.apply(first);
        assert_eq!(h.coordinator.get(&note.id).unwrap().content, "y");

        let second = h.coordinator.runner().run(second).await;
        h.coordinator.apply(second);
        assert_eq!(h.coordinator.get(&note.id).unwrap().content, "y");
        assert_eq!(h.remote.inner.get(&note.id).await.unwrap().content, "y");
    }

    #[tokio::test]
    async fn test_persist_echo_after_second_edit_is_ignored() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("race", ""));
        h.coordinator.flush_due().await;

        h.coordinator.update_title(&note.id, "sent").unwrap();
        h.clock.advance(Duration::from_millis(300));
        let persist = h
            .coordinator
            .take_due()
            .into_iter()
            .find(|e| matches!(e, Effect::Persist(_)))
            .unwrap();
        let outcome = h.coordinator.runner().run(persist).await;

        h.coordinator.update_title(&note.id, "newer").unwrap();
        h.coordinator.apply(outcome);
        assert_eq!(h.coordinator.get(&note.id).unwrap().title, "newer");
        assert_eq!(h.coordinator.status().pending_changes, 1);

        h.coordinator.flush_all().await;
        assert_eq!(h.remote.inner.get(&note.id).await.unwrap().title, "newer");
    }

    #[tokio::test]
    async fn test_clearing_source_url_reaches_remote() {
        let mut h = harness();
        let note = h
            .coordinator
            .capture_selection("quoted text", Some("https://a.example/x"));
        h.coordinator.flush_due().await;
        assert_eq!(
            h.remote.inner.get(&note.id).await.unwrap().source_url.as_deref(),
            Some("https://a.example/x")
        );

        h.coordinator
            .edit_note(&note.id, NoteEdit::SourceUrl(None))
            .unwrap();
        h.clock.advance(Duration::from_millis(300));
        h.coordinator.flush_due().await;

        assert_eq!(h.coordinator.get(&note.id).unwrap().source_url, None);
        assert_eq!(h.remote.inner.get(&note.id).await.unwrap().source_url, None);
        assert_eq!(h.cache.read().await.get(&note.id).unwrap().source_url, None);
    }

    #[tokio::test]
    async fn test_invalid_imports_change_nothing() {
        let mut h = harness();
        h.coordinator.create_note(NoteFields::titled("keep", ""));
        let before = h.coordinator.export();

        for payload in [
            "not json",
            "[]",
            r#"{"nope": []}"#,
            r#"{"notes": {}}"#,
            r#"{"notes": [{"id": "ok"}, {"title": "no id"}]}"#,
            r#"{"notes": [{"id": "ok"}, 5]}"#,
            r#"{"notes": [{"id": "x", "pinned": "yes"}]}"#,
            r#"{"notes": [], "activeNoteId": 3}"#,
        ] {
            let err = h.coordinator.import_json(payload).unwrap_err();
            assert!(matches!(err, CoordinatorError::Validation(_)), "{}", payload);
            assert_eq!(h.coordinator.export(), before);
        }
    }

    #[tokio::test]
    async fn test_import_union_merges_and_syncs() {
        let mut h = harness();
        let existing = h.coordinator.create_note(NoteFields::titled("existing", ""));
        h.coordinator.flush_due().await;

        let payload = serde_json::json!({
            "notes": [
                { "id": existing.id.clone(), "title": "replaced", "createdAt": 1, "updatedAt": 2 },
                { "id": "imported", "content": "new" }
            ],
            "activeNoteId": "imported"
        });
        let summary = h.coordinator.import(&payload).unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, added: 1 });
        assert_eq!(h.coordinator.get(&existing.id).unwrap().title, "replaced");
        assert_eq!(h.coordinator.state().active_note_id.as_deref(), Some("imported"));

        h.coordinator.flush_due().await;
        assert_eq!(h.remote.sync_count(), 1);
        assert!(h.cache.read().await.contains("imported"));
    }

    #[tokio::test]
    async fn test_export_then_import_is_noop() {
        let mut h = harness();
        h.coordinator.create_note(NoteFields::titled("one", "1"));
        h.clock.advance(Duration::from_millis(10));
        let two = h.coordinator.create_note(NoteFields::titled("two", "2"));
        h.coordinator.toggle_pin(&two.id).unwrap();
        let before = h.coordinator.export();

        let exported = h.coordinator.export_json().unwrap();
        h.coordinator.import_json(&exported).unwrap();
        let after = h.coordinator.export();
        assert_eq!(after.notes, before.notes);
        assert_eq!(after.active_note_id, before.active_note_id);
    }

    #[tokio::test]
    async fn test_pin_and_active_reselection() {
        let mut h = harness();
        let a = h.coordinator.create_note(NoteFields::titled("a", ""));
        h.clock.advance(Duration::from_millis(5));
        let b = h.coordinator.create_note(NoteFields::titled("b", ""));
        h.clock.advance(Duration::from_millis(5));
        let c = h.coordinator.create_note(NoteFields::titled("c", ""));
        h.coordinator.toggle_pin(&a.id).unwrap();

        h.coordinator.set_active(&b.id).unwrap();
        h.coordinator.delete_note(&b.id).unwrap();
        assert_eq!(h.coordinator.state().active_note_id.as_deref(), Some(a.id.as_str()));
        let ids: Vec<_> = h.coordinator.notes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![a.id.clone(), c.id.clone()]);
        assert!(matches!(
            h.coordinator.set_active("missing"),
            Err(CoordinatorError::NoteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_and_text_export() {
        let mut h = harness();
        let note = h
            .coordinator
            .capture_selection("Rust ownership. Borrowing rules", Some("https://doc.rust-lang.org/book"));
        assert_eq!(note.title, "Rust ownership");
        assert_eq!(note.source_host().as_deref(), Some("doc.rust-lang.org"));

        let export = h.coordinator.export_note_text(&note.id).unwrap();
        assert_eq!(export.file_name, "Rust_ownership.txt");
        assert_eq!(export.content, "Rust ownership. Borrowing rules");
    }

    #[tokio::test]
    async fn test_persist_adopts_server_timestamps() {
        let mut h = harness();
        let note = h.coordinator.create_note(NoteFields::titled("stamp", ""));
        h.clock.advance(Duration::from_millis(20));
        h.coordinator.flush_due().await;
        assert_eq!(h.coordinator.get(&note.id).unwrap().updated_at, t(20));
        assert_eq!(h.coordinator.get(&note.id).unwrap().created_at, t(0));
    }
}
