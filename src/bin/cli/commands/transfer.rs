use std::path::Path;

use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub fn run_import(app: &mut App, file: &str, format: &OutputFormat) -> Result<()> {
    let payload = if file == "-" {
        crate::read_stdin()
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?
    };

    let summary = app
        .coordinator
        .import_json(&payload)
        .with_context(|| format!("Import of {} rejected", file))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Plain => println!(
            "Imported {} notes ({} new)",
            summary.imported, summary.added
        ),
    }
    Ok(())
}

pub fn run_export(app: &App, out: Option<&Path>) -> Result<()> {
    let json = app.coordinator.export_json()?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Exported {} notes to {}",
                app.coordinator.state().notes.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub fn run_export_text(app: &App, query: &str, dir: &Path) -> Result<()> {
    let note = app.find_note(query)?;
    let export = app.coordinator.export_note_text(&note.id)?;
    let path = dir.join(&export.file_name);
    std::fs::write(&path, export.content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
