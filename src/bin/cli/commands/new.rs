use anyhow::Result;

use notesync::storage::{Note, NoteFields};

use crate::app::{display_title, App};
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(
    app: &mut App,
    title: Option<String>,
    content: Option<String>,
    pin: bool,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let fields = NoteFields {
        title,
        content,
        pinned: Some(pin),
        ..Default::default()
    };
    let note = app.coordinator.create_note(fields);
    print_created(&note, format, use_color)
}

pub fn run_capture(
    app: &mut App,
    selection: &str,
    url: Option<&str>,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let note = app.coordinator.capture_selection(selection, url);
    print_created(&note, format, use_color)
}

fn print_created(note: &Note, format: &OutputFormat, use_color: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(note)?),
        OutputFormat::Plain => {
            println!(
                "Created note \"{}\"",
                paint(display_title(note), Color::BOLD, use_color)
            );
            if let Some(host) = note.source_host() {
                println!("  Source: {}", host);
            }
            println!("  ID: {}", note.id);
        }
    }
    Ok(())
}
