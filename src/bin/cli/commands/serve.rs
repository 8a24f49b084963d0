use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use notesync::server::{start_server, ServerState};
use notesync::sync::remote::ReplaceRequest;
use notesync::sync::{Clock, RemoteCollection, SystemClock};

pub async fn run(addr: SocketAddr, seed: Option<&Path>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut collection = RemoteCollection::new();

    if let Some(path) = seed {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let request: ReplaceRequest = serde_json::from_str(&data)
            .with_context(|| format!("Invalid note collection in {}", path.display()))?;
        let state = collection.replace_all(request, clock.now());
        log::info!("Seeded {} notes from {}", state.notes.len(), path.display());
    }

    let mut server = start_server(addr, ServerState::new(collection.shared(), clock))
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    println!("Serving notes at {} (Ctrl-C to stop)", server.api_url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    server.stop();
    Ok(())
}
