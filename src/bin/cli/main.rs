mod app;
mod commands;
mod render;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "notesync-cli", about = "Offline-tolerant note sync CLI", version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List notes, pinned first
    List,

    /// Show one note
    Show {
        /// Note id, id prefix or title prefix
        note: String,
    },

    /// Create a note
    New {
        /// Note title
        title: Option<String>,
        /// Note text (use "-" to read from stdin)
        #[arg(long)]
        content: Option<String>,
        /// Pin the new note
        #[arg(long)]
        pin: bool,
    },

    /// Create a note from selected text
    Capture {
        /// Selected text (use "-" to read from stdin)
        selection: String,
        /// Page the text was selected on
        #[arg(long)]
        url: Option<String>,
    },

    /// Change a note's title or content
    Edit {
        /// Note id, id prefix or title prefix
        note: String,
        #[arg(long)]
        title: Option<String>,
        /// New text (use "-" to read from stdin)
        #[arg(long)]
        content: Option<String>,
        /// Page the note refers to
        #[arg(long)]
        url: Option<String>,
    },

    /// Toggle a note's pin
    Pin {
        /// Note id, id prefix or title prefix
        note: String,
    },

    /// Delete a note
    Delete {
        /// Note id, id prefix or title prefix
        note: String,
    },

    /// Search titles and content
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Merge an exported JSON collection into the notes
    Import {
        /// Export file (use "-" to read from stdin)
        file: String,
    },

    /// Export all notes as JSON
    Export {
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Export one note as a text file
    ExportText {
        /// Note id, id prefix or title prefix
        note: String,
        /// Target directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Sync with the remote store now
    Sync,

    /// Show connectivity and pending work
    Status,

    /// Run a note API server
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
        /// Collection to start with (JSON export)
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

/// Read content from stdin if piped, or resolve "-" as stdin
fn resolve_content(content: Option<String>) -> Option<String> {
    match content.as_deref() {
        Some("-") => Some(read_stdin()),
        Some(_) => content,
        None => {
            if !stdin_is_tty() {
                let buf = read_stdin();
                if buf.is_empty() { None } else { Some(buf) }
            } else {
                None
            }
        }
    }
}

fn read_stdin() -> String {
    let mut buf = String::new();
    std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf).ok();
    buf
}

/// Check if stdin is a terminal (not piped)
fn stdin_is_tty() -> bool {
    unsafe { libc_isatty(0) != 0 }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();

    if let Command::Serve { addr, seed } = &cli.command {
        return commands::serve::run(*addr, seed.as_deref()).await;
    }

    let mut app = app::App::new(cli.config.as_deref()).await?;

    match cli.command {
        Command::List => commands::list::run(&app, &cli.format, use_color)?,
        Command::Show { note } => commands::show::run(&app, &note, &cli.format, use_color)?,
        Command::New { title, content, pin } => {
            let content = resolve_content(content);
            commands::new::run(&mut app, title, content, pin, &cli.format, use_color)?;
        }
        Command::Capture { selection, url } => {
            let selection = if selection == "-" { read_stdin() } else { selection };
            commands::new::run_capture(&mut app, &selection, url.as_deref(), &cli.format, use_color)?;
        }
        Command::Edit { note, title, content, url } => {
            let content = match content.as_deref() {
                Some("-") => Some(read_stdin()),
                _ => content,
            };
            commands::edit::run(&mut app, &note, title, content, url, &cli.format, use_color)?;
        }
        Command::Pin { note } => commands::edit::run_pin(&mut app, &note, use_color)?,
        Command::Delete { note } => commands::edit::run_delete(&mut app, &note, use_color)?,
        Command::Search { query, limit } => {
            commands::search::run(&app, &query, limit, &cli.format, use_color)?
        }
        Command::Import { file } => commands::transfer::run_import(&mut app, &file, &cli.format)?,
        Command::Export { out } => commands::transfer::run_export(&app, out.as_deref())?,
        Command::ExportText { note, dir } => commands::transfer::run_export_text(&app, &note, &dir)?,
        Command::Sync => commands::sync::run_sync(&mut app, &cli.format, use_color).await?,
        Command::Status => commands::sync::run_status(&app, &cli.format, use_color)?,
        Command::Serve { .. } => unreachable!("handled above"),
    }

    app.finish(use_color).await
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
