use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use notesync::storage::Note;
use notesync::sync::{
    Clock, InProcessRemote, RemoteBackend, RemoteStore, StateCoordinator, SyncConfig, SystemClock,
};

use crate::render::terminal::{paint, Color};

/// Shared application state for CLI commands
pub struct App {
    pub config: SyncConfig,
    pub coordinator: StateCoordinator,
}

impl App {
    /// Load the config, open the backends and load the collection
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path.to_path_buf(),
            None => SyncConfig::default_path().context("Failed to get config directory")?,
        };
        let config = SyncConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
            .with_env();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = config.build_cache().context("Failed to open local cache")?;

        let remote: Arc<dyn RemoteStore> = match config.remote {
            // Nothing outlives the process, so start from the cached collection.
            RemoteBackend::InProcess => {
                let remote = InProcessRemote::new(Arc::clone(&clock));
                remote
                    .replace_all(&cache.read().await)
                    .await
                    .context("Failed to seed local store")?;
                Arc::new(remote)
            }
            RemoteBackend::Http => config
                .build_remote(Arc::clone(&clock))
                .with_context(|| format!("Invalid server URL '{}'", config.server_url))?,
        };

        let mut coordinator = StateCoordinator::new(&config, remote, cache, clock);
        coordinator.load().await;

        Ok(Self { config, coordinator })
    }

    /// Push everything pending, then report if it only reached the cache
    pub async fn finish(mut self, use_color: bool) -> Result<()> {
        self.coordinator.flush_all().await;
        let status = self.coordinator.status();
        if let Some(error) = status.error {
            eprintln!(
                "{}",
                paint(
                    &format!("Offline: changes kept in local cache ({})", error),
                    Color::YELLOW,
                    use_color
                )
            );
        }
        Ok(())
    }

    /// Find a note by id, id prefix, or title (case-insensitive prefix match)
    pub fn find_note(&self, query: &str) -> Result<Note> {
        let notes = self.coordinator.notes();

        if let Some(note) = notes.iter().find(|n| n.id == query) {
            return Ok(note.clone());
        }

        let query_lower = query.to_lowercase();
        if let Some(note) = notes.iter().find(|n| n.title.to_lowercase() == query_lower) {
            return Ok(note.clone());
        }

        let matches: Vec<&Note> = notes
            .iter()
            .filter(|n| {
                n.id.starts_with(query) || n.title.to_lowercase().starts_with(&query_lower)
            })
            .collect();

        match matches.len() {
            0 => bail!("No note matching '{}'", query),
            1 => Ok(matches[0].clone()),
            _ => bail!(
                "Ambiguous note '{}'. Matches:\n{}",
                query,
                matches
                    .iter()
                    .map(|n| format!("  - {} ({})", display_title(n), n.id))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        }
    }
}

pub fn display_title(note: &Note) -> &str {
    if note.title.is_empty() {
        "Untitled"
    } else {
        &note.title
    }
}
