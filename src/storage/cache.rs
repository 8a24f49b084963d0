use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use super::models::CollectionState;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Persistent key-value record holding the whole note collection.
///
/// `read` never fails: a missing or unreadable record is an empty collection.
/// `write` replaces the record atomically from the reader's point of view.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn read(&self) -> CollectionState;
    async fn write(&self, state: &CollectionState) -> Result<()>;
}

/// Cache stored as a single JSON file.
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the default cache file location
    pub fn default_path() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("notesync").join("notes-data.json"))
            .ok_or(CacheError::DataDirNotFound)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn read(&self) -> CollectionState {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CollectionState::default();
            }
            Err(e) => {
                log::warn!("Cache: failed to read {:?}: {}", self.path, e);
                return CollectionState::default();
            }
        };

        match serde_json::from_str(&data) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Cache: ignoring unparseable record {:?}: {}", self.path, e);
                CollectionState::default()
            }
        }
    }

    async fn write(&self, state: &CollectionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, data).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        log::debug!("Cache: wrote {} note(s) to {:?}", state.notes.len(), self.path);
        Ok(())
    }
}

/// Process-local cache, for tests and sessions that should leave nothing behind.
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<Option<CollectionState>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: CollectionState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of writes performed so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn read(&self) -> CollectionState {
        self.state.lock().unwrap().clone().unwrap_or_default()
    }

    async fn write(&self, state: &CollectionState) -> Result<()> {
        *self.state.lock().unwrap() = Some(state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Note, NoteFields};
    use chrono::Utc;

    fn sample_state() -> CollectionState {
        let note = Note::new(NoteFields::titled("Cached", "body"), Utc::now());
        CollectionState {
            active_note_id: Some(note.id.clone()),
            notes: vec![note],
            last_change_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_file_cache_missing_file_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("absent.json"));
        assert_eq!(cache.read().await, CollectionState::default());
    }

    #[tokio::test]
    async fn test_file_cache_unparseable_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cache = FileCache::new(path);
        assert_eq!(cache.read().await, CollectionState::default());
    }

    #[tokio::test]
    async fn test_file_cache_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("nested").join("notes.json"));
        let mut state = sample_state();
        // The wire format keeps millisecond precision only.
        state.last_change_at = chrono::DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        for note in &mut state.notes {
            note.created_at = state.last_change_at;
            note.updated_at = state.last_change_at;
        }

        cache.write(&state).await.unwrap();
        assert_eq!(cache.read().await, state);
        assert!(!cache.temp_path().exists());
    }

    #[tokio::test]
    async fn test_memory_cache_counts_writes() {
        let cache = MemoryCache::new();
        assert_eq!(cache.read().await, CollectionState::default());
        let state = sample_state();
        cache.write(&state).await.unwrap();
        assert_eq!(cache.write_count(), 1);
        assert_eq!(cache.read().await, state);
    }
}
