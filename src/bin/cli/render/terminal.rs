use chrono::{DateTime, Local, Utc};

use notesync::storage::text::preview;
use notesync::storage::Note;
use notesync::sync::{Connectivity, SyncStatus};

use crate::app::display_title;

/// ANSI color codes
pub struct Color;

impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Wrap `text` in a color when colors are on
pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Local time, minute precision
pub fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Cut to `width` characters, ending in "..." when cut
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Table of notes: pin marker, title, preview, last update, short id
pub fn render_note_table(notes: &[Note], active_id: Option<&str>, use_color: bool) -> String {
    let title_w = notes
        .iter()
        .map(|n| display_title(n).chars().count())
        .max()
        .unwrap_or(5)
        .clamp(5, 30);
    let preview_w = 40;

    let mut lines = vec![
        format!(
            "   {:<title_w$} {:<preview_w$} {:<16} {}",
            "Title",
            "Preview",
            "Updated",
            "ID",
            title_w = title_w,
            preview_w = preview_w
        ),
        format!(
            "   {} {} {} {}",
            "\u{2500}".repeat(title_w),
            "\u{2500}".repeat(preview_w),
            "\u{2500}".repeat(16),
            "\u{2500}".repeat(8)
        ),
    ];

    for note in notes {
        let marker = match (active_id == Some(note.id.as_str()), note.pinned) {
            (true, true) => "*^",
            (true, false) => "* ",
            (false, true) => " ^",
            (false, false) => "  ",
        };
        let title = format!("{:<w$}", truncate(display_title(note), title_w), w = title_w);
        let title = if note.pinned {
            paint(&title, Color::BOLD, use_color)
        } else {
            title
        };
        let body = format!(
            "{:<w$}",
            truncate(&preview(&note.content, preview_w), preview_w),
            w = preview_w
        );
        let short_id: String = note.id.chars().take(8).collect();

        lines.push(format!(
            "{} {} {} {:<16} {}",
            marker,
            title,
            paint(&body, Color::DIM, use_color),
            format_time(note.updated_at),
            paint(&short_id, Color::CYAN, use_color)
        ));
    }

    lines.join("\n")
}

/// One-line connectivity summary
pub fn render_status(status: &SyncStatus, use_color: bool) -> String {
    let state = match status.connectivity {
        Connectivity::Online => paint("online", Color::GREEN, use_color),
        Connectivity::Offline => paint("offline", Color::RED, use_color),
    };
    let mut line = format!(
        "{}, {} pending change(s), {} pending delete(s)",
        state, status.pending_changes, status.pending_deletes
    );
    if let Some(at) = status.last_sync {
        line.push_str(&format!(", last sync {}", format_time(at)));
    }
    if let Some(error) = &status.error {
        line.push_str(&format!("\n{}", paint(error, Color::YELLOW, use_color)));
    }
    line
}
