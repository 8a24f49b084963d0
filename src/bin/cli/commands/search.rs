use anyhow::Result;

use crate::app::App;
use crate::render::terminal;
use crate::OutputFormat;

pub fn run(
    app: &App,
    query: &str,
    limit: usize,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut results = app.coordinator.search(query);
    let total = results.len();
    results.truncate(limit);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Plain => {
            if results.is_empty() {
                println!("No results found for '{}'.", query);
                return Ok(());
            }
            println!("{}", terminal::render_note_table(&results, None, use_color));
            if total > results.len() {
                println!("\n{} of {} results", results.len(), total);
            } else {
                println!("\n{} results", total);
            }
        }
    }

    Ok(())
}
