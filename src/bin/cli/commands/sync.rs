use anyhow::Result;

use crate::app::App;
use crate::render::terminal;
use crate::OutputFormat;

pub async fn run_sync(app: &mut App, format: &OutputFormat, use_color: bool) -> Result<()> {
    app.coordinator.set_online(true);
    app.coordinator.request_sync();
    app.coordinator.flush_due().await;

    let status = app.coordinator.status();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Plain => {
            if status.error.is_none() {
                println!(
                    "Synced {} notes with {}",
                    app.coordinator.state().notes.len(),
                    app.config.server_url
                );
            }
            println!("{}", terminal::render_status(&status, use_color));
        }
    }
    Ok(())
}

pub fn run_status(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let status = app.coordinator.status();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Plain => println!("{}", terminal::render_status(&status, use_color)),
    }
    Ok(())
}
