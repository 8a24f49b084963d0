use anyhow::Result;

use crate::app::{display_title, App};
use crate::render::terminal::{self, Color};
use crate::OutputFormat;

pub fn run(app: &App, query: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let note = app.find_note(query)?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&note)?);
        return Ok(());
    }

    println!("{}", terminal::paint(display_title(&note), Color::BOLD, use_color));

    let mut meta = format!(
        "created {}, updated {}",
        terminal::format_time(note.created_at),
        terminal::format_time(note.updated_at)
    );
    if note.pinned {
        meta.push_str(", pinned");
    }
    if let Some(host) = note.source_host() {
        meta.push_str(&format!(", from {}", host));
    }
    println!("{}", terminal::paint(&meta, Color::DIM, use_color));

    if !note.content.is_empty() {
        println!("\n{}", note.content);
    }

    Ok(())
}
