use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque note identifier. Generated ids are UUID v4 strings, imported ids may be anything non-empty.
pub type NoteId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(fields: NoteFields, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: fields.title.unwrap_or_default(),
            content: fields.content.unwrap_or_default(),
            pinned: fields.pinned.unwrap_or(false),
            source_url: fields.source_url,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh `updated_at` after a mutation, never moving it below `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    /// Note fields as sent in an upsert body.
    pub fn fields(&self) -> NoteFields {
        NoteFields {
            title: Some(self.title.clone()),
            content: Some(self.content.clone()),
            pinned: Some(self.pinned),
            source_url: self.source_url.clone(),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }

    /// Host name of the page this note was captured from.
    pub fn source_host(&self) -> Option<String> {
        let url = reqwest::Url::parse(self.source_url.as_deref()?).ok()?;
        url.host_str().map(str::to_string)
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

/// Mutable fields of a note. Absent fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NoteFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NoteFields {
    pub fn titled(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Fields for a note captured from selected page text.
    pub fn from_selection(selection: &str, page_url: Option<&str>) -> Self {
        let selection = selection.trim();
        let title = super::text::selection_title(selection);
        Self {
            title: Some(if title.is_empty() { "Captured".to_string() } else { title }),
            content: Some(selection.to_string()),
            source_url: page_url.map(str::to_string),
            ..Default::default()
        }
    }
}

/// A note as received from an untrusted source (sync batch, import file).
/// Timestamps and even the id may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingNote {
    #[serde(default)]
    pub id: Option<NoteId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl IncomingNote {
    /// Materialize into a note, stamping missing timestamps with `now`.
    /// Returns `None` when the id is missing or empty.
    pub fn into_note(self, now: DateTime<Utc>) -> Option<Note> {
        let id = self.id.filter(|id| !id.is_empty())?;
        let updated_at = self.updated_at.unwrap_or(now);
        let created_at = self.created_at.unwrap_or(updated_at);
        Some(Note {
            id,
            title: self.title.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            pinned: self.pinned.unwrap_or(false),
            source_url: self.source_url,
            created_at,
            updated_at: updated_at.max(created_at),
        })
    }
}

impl From<Note> for IncomingNote {
    fn from(note: Note) -> Self {
        Self {
            id: Some(note.id),
            title: Some(note.title),
            content: Some(note.content),
            pinned: Some(note.pinned),
            source_url: note.source_url,
            created_at: Some(note.created_at),
            updated_at: Some(note.updated_at),
        }
    }
}

/// The whole note collection. Same shape locally, in the cache and on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionState {
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_note_id: Option<NoteId>,
    #[serde(default = "unix_epoch", with = "ts_milliseconds")]
    pub last_change_at: DateTime<Utc>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            notes: Vec::new(),
            active_note_id: None,
            last_change_at: unix_epoch(),
        }
    }
}

impl CollectionState {
    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Note> {
        self.notes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<Note> {
        let idx = self.notes.iter().position(|n| n.id == id)?;
        Some(self.notes.remove(idx))
    }

    pub fn active_note(&self) -> Option<&Note> {
        self.active_note_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn sorted(&self) -> Vec<Note> {
        sort_notes(&self.notes)
    }

    /// Enforce the collection invariants: unique ids (last occurrence wins),
    /// `updated_at >= created_at`, and an active note that exists.
    pub fn normalize(&mut self) {
        let mut index: HashMap<NoteId, usize> = HashMap::new();
        let mut deduped: Vec<Note> = Vec::with_capacity(self.notes.len());
        for mut note in self.notes.drain(..) {
            if note.updated_at < note.created_at {
                note.updated_at = note.created_at;
            }
            match index.get(&note.id) {
                Some(&i) => deduped[i] = note,
                None => {
                    index.insert(note.id.clone(), deduped.len());
                    deduped.push(note);
                }
            }
        }
        self.notes = deduped;
        self.ensure_active();
    }

    /// Point `active_note_id` at the most relevant note if it is unset or dangling.
    pub fn ensure_active(&mut self) {
        let valid = self
            .active_note_id
            .as_deref()
            .is_some_and(|id| self.contains(id));
        if !valid {
            self.active_note_id = most_relevant(&self.notes).map(|n| n.id.clone());
        }
    }
}

fn compare_relevance(a: &Note, b: &Note) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
}

/// Pinned notes first, then most recently updated. Stable for ties.
pub fn sort_notes(notes: &[Note]) -> Vec<Note> {
    let mut sorted = notes.to_vec();
    sorted.sort_by(compare_relevance);
    sorted
}

/// First note under [`sort_notes`] order, without cloning the collection.
pub fn most_relevant(notes: &[Note]) -> Option<&Note> {
    notes.iter().reduce(|best, candidate| {
        if compare_relevance(candidate, best) == Ordering::Less {
            candidate
        } else {
            best
        }
    })
}

/// Notes whose title or content contains `query` (case-insensitive), in list order.
pub fn search(notes: &[Note], query: &str) -> Vec<Note> {
    sort_notes(notes)
        .into_iter()
        .filter(|n| n.matches_query(query))
        .collect()
}
