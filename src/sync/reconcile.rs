//! Merge policies for note collections.
//!
//! Two policies exist and are never interchangeable:
//! - [`authoritative_replace`]: the supplied set becomes the whole collection.
//! - [`union_merge`]: supplied notes overwrite matching ids, everything else is kept.
//!
//! Both operate on whole notes. There is no field-level merge: when two
//! versions of a note meet, the later one in argument order wins entirely.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::storage::{IncomingNote, Note, NoteId};

/// Result of an authoritative replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// The new collection, duplicates collapsed (last wins)
    pub notes: Vec<Note>,
    /// Ids that existed before and are gone now
    pub removed: Vec<NoteId>,
}

/// Replace `target` with `supplied`. Notes missing from `supplied` are deleted.
pub fn authoritative_replace(target: &[Note], supplied: Vec<Note>) -> Replacement {
    let notes = union_merge(Vec::new(), supplied);
    let kept: HashSet<&str> = notes.iter().map(|n| n.id.as_str()).collect();
    let removed = target
        .iter()
        .filter(|n| !kept.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    Replacement { notes, removed }
}

/// Merge `incoming` into `target`.
///
/// An incoming note whose id exists replaces the existing note in place; new
/// ids are appended in the order they are first seen. Notes only present in
/// `target` are kept. For duplicate incoming ids the last occurrence wins.
pub fn union_merge(target: Vec<Note>, incoming: Vec<Note>) -> Vec<Note> {
    let mut merged = target;
    let mut index: HashMap<NoteId, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();

    for note in incoming {
        match index.get(&note.id) {
            Some(&i) => merged[i] = note,
            None => {
                index.insert(note.id.clone(), merged.len());
                merged.push(note);
            }
        }
    }
    merged
}

/// Turn untrusted incoming notes into notes ready for [`union_merge`].
///
/// Entries without an id are dropped; a missing `updatedAt` becomes `now`.
pub fn stamp_incoming(incoming: Vec<IncomingNote>, now: DateTime<Utc>) -> Vec<Note> {
    let total = incoming.len();
    let notes: Vec<Note> = incoming
        .into_iter()
        .filter_map(|n| n.into_note(now))
        .collect();
    if notes.len() < total {
        log::debug!(
            "Reconcile: skipped {} incoming note(s) without an id",
            total - notes.len()
        );
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn note(id: &str, content: &str, updated_ms: i64) -> Note {
        Note {
            id: id.to_string(),
            title: String::new(),
            content: content.to_string(),
            pinned: false,
            source_url: None,
            created_at: Utc.timestamp_millis_opt(0).unwrap(),
            updated_at: Utc.timestamp_millis_opt(updated_ms).unwrap(),
        }
    }

    fn ids(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_union_merge_server_version_wins_and_keeps_local_only() {
        let local = vec![note("1", "local version", 10), note("2", "local only", 10)];
        let merged = union_merge(local, vec![note("1", "server version", 5)]);
        assert_eq!(ids(&merged), vec!["1", "2"]);
        assert_eq!(merged[0].content, "server version");
        assert_eq!(merged[1].content, "local only");
    }

    #[test]
    fn test_union_merge_contains_every_id_and_later_wins() {
        let cases: Vec<(Vec<Note>, Vec<Note>)> = vec![
            (vec![], vec![]),
            (vec![note("a", "A", 1)], vec![]),
            (vec![], vec![note("b", "B", 1)]),
            (
                vec![note("a", "A1", 1), note("b", "B1", 1), note("c", "C1", 1)],
                vec![note("c", "C2", 9), note("d", "D2", 9), note("a", "A2", 9)],
            ),
            (
                vec![note("x", "old", 100)],
                vec![note("x", "older timestamp still wins", 1)],
            ),
        ];

        for (a, b) in cases {
            let merged = union_merge(a.clone(), b.clone());
            for n in a.iter().chain(b.iter()) {
                assert!(merged.iter().any(|m| m.id == n.id), "missing {}", n.id);
            }
            for n in &b {
                let m = merged.iter().find(|m| m.id == n.id).unwrap();
                assert_eq!(m, n);
            }
            let unique: HashSet<_> = merged.iter().map(|n| &n.id).collect();
            assert_eq!(unique.len(), merged.len());
        }
    }

    #[test]
    fn test_union_merge_duplicate_incoming_last_wins() {
        let merged = union_merge(
            vec![],
            vec![note("1", "first", 1), note("2", "x", 1), note("1", "last", 1)],
        );
        assert_eq!(ids(&merged), vec!["1", "2"]);
        assert_eq!(merged[0].content, "last");
    }

    #[test]
    fn test_union_merge_with_itself_is_noop() {
        let notes = vec![note("1", "a", 3), note("2", "b", 2)];
        assert_eq!(union_merge(notes.clone(), notes.clone()), notes);
    }

    #[test]
    fn test_authoritative_replace_deletes_missing() {
        let target = vec![note("1", "a", 1), note("2", "b", 1)];
        let result = authoritative_replace(&target, vec![note("2", "b2", 2), note("3", "c", 2)]);
        assert_eq!(ids(&result.notes), vec!["2", "3"]);
        assert_eq!(result.removed, vec!["1".to_string()]);
    }

    #[test]
    fn test_stamp_incoming_skips_missing_ids() {
        let now = Utc.timestamp_millis_opt(42).unwrap();
        let incoming = vec![
            IncomingNote {
                id: Some("1".to_string()),
                content: Some("server version".to_string()),
                ..Default::default()
            },
            IncomingNote::default(),
        ];
        let notes = stamp_incoming(incoming, now);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].updated_at, now);
    }
}
