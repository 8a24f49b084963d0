//! Plain-text helpers for note listings, exports and captured selections.

use regex::Regex;

/// Default preview length used in note listings.
pub const PREVIEW_LEN: usize = 60;

/// Longest title derived from a captured selection.
const SELECTION_TITLE_LEN: usize = 50;

/// One-line preview of note content.
///
/// Collapses whitespace, trims, and truncates to `max` characters with a
/// trailing ellipsis when the text is longer.
pub fn preview(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max.saturating_sub(1)).collect();
    cut.push('\u{2026}');
    cut
}

/// File name for a plain-text export of a note.
pub fn export_file_name(title: &str) -> String {
    let base = if title.is_empty() { "note" } else { title };
    let unsafe_re = Regex::new(r"[^A-Za-z0-9_-]").unwrap();
    format!("{}.txt", unsafe_re.replace_all(base, "_"))
}

/// Title for a note captured from a selection: its first line or sentence.
pub fn selection_title(selection: &str) -> String {
    let boundary_re = Regex::new(r"\n|\.\s").unwrap();
    let first = boundary_re.split(selection).next().unwrap_or_default();
    first.trim().chars().take(SELECTION_TITLE_LEN).collect()
}
