use anyhow::Result;

use crate::app::App;
use crate::render::terminal;
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let notes = app.coordinator.notes();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&notes)?);
        }
        OutputFormat::Plain => {
            if notes.is_empty() {
                println!("No notes yet. Create one with `notesync-cli new <title>`.");
                return Ok(());
            }
            let active = app.coordinator.state().active_note_id.as_deref();
            println!("{}", terminal::render_note_table(&notes, active, use_color));
            println!("\n{} notes", notes.len());
        }
    }

    Ok(())
}
