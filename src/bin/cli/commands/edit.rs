use anyhow::{bail, Result};

use notesync::sync::NoteEdit;

use crate::app::{display_title, App};
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(
    app: &mut App,
    query: &str,
    title: Option<String>,
    content: Option<String>,
    url: Option<String>,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut edits = Vec::new();
    if let Some(title) = title {
        edits.push(NoteEdit::Title(title));
    }
    if let Some(content) = content {
        edits.push(NoteEdit::Content(content));
    }
    if let Some(url) = url {
        edits.push(NoteEdit::SourceUrl(Some(url).filter(|u| !u.is_empty())));
    }
    if edits.is_empty() {
        bail!("Nothing to change. Pass --title, --content or --url.");
    }

    let id = app.find_note(query)?.id;
    let mut note = None;
    for edit in edits {
        note = Some(app.coordinator.edit_note(&id, edit)?);
    }

    if let Some(note) = note {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&note)?),
            OutputFormat::Plain => println!(
                "Updated note \"{}\"",
                paint(display_title(&note), Color::BOLD, use_color)
            ),
        }
    }
    Ok(())
}

pub fn run_pin(app: &mut App, query: &str, use_color: bool) -> Result<()> {
    let id = app.find_note(query)?.id;
    let note = app.coordinator.toggle_pin(&id)?;
    let state = if note.pinned { "Pinned" } else { "Unpinned" };
    println!("{} \"{}\"", state, paint(display_title(&note), Color::BOLD, use_color));
    Ok(())
}

pub fn run_delete(app: &mut App, query: &str, use_color: bool) -> Result<()> {
    let id = app.find_note(query)?.id;
    let note = app.coordinator.delete_note(&id)?;
    println!(
        "Deleted \"{}\"",
        paint(display_title(&note), Color::BOLD, use_color)
    );
    Ok(())
}
