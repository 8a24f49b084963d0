//! HTTP note API over a [`RemoteCollection`](crate::sync::remote::RemoteCollection).
//!
//! Routes live under `/api`. Every error is a JSON body `{ "error": ... }`.

use std::net::SocketAddr;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;

use crate::storage::{CollectionState, IncomingNote, Note, NoteFields};
use crate::sync::client::SyncResponse;
use crate::sync::remote::{RemoteCollection, ReplaceRequest, SharedCollection};
use crate::sync::scheduler::Clock;

const SYNC_PATH_ID: &str = "sync";

/// State shared by all handlers
#[derive(Clone)]
pub struct ServerState {
    pub collection: SharedCollection,
    pub clock: Arc<dyn Clock>,
}

impl ServerState {
    pub fn new(collection: SharedCollection, clock: Arc<dyn Clock>) -> Self {
        Self { collection, clock }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RemoteCollection>, ApiError> {
        self.collection
            .read()
            .map_err(|_| ApiError::Internal("note store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RemoteCollection>, ApiError> {
        self.collection
            .write()
            .map_err(|_| ApiError::Internal("note store lock poisoned".to_string()))
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                log::error!("Note server: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

#[derive(Deserialize)]
struct SyncBody {
    notes: Vec<IncomingNote>,
}

/// Decode a body whose `notes` member must be a list
fn parse_notes_body<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    if !body.get("notes").is_some_and(Value::is_array) {
        return Err(ApiError::BadRequest("Invalid notes data".to_string()));
    }
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn hello() -> Json<Value> {
    Json(json!({ "ok": true, "msg": "notesync server is running" }))
}

async fn list_notes(State(state): State<ServerState>) -> Result<Json<CollectionState>, ApiError> {
    Ok(Json(state.read()?.snapshot()))
}

async fn replace_notes(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> Result<Json<CollectionState>, ApiError> {
    let request: ReplaceRequest = parse_notes_body(body)?;
    let now = state.clock.now();
    let stored = state.write()?.replace_all(request, now);
    log::info!("Note server: collection replaced, {} note(s)", stored.notes.len());
    Ok(Json(stored))
}

fn fetch_note(state: &ServerState, id: &str) -> Result<Json<Note>, ApiError> {
    state
        .read()?
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Note {} not found", id)))
}

fn store_note(state: &ServerState, id: &str, fields: NoteFields) -> Result<Json<Note>, ApiError> {
    if id.is_empty() {
        return Err(ApiError::BadRequest("Note id must not be empty".to_string()));
    }
    let now = state.clock.now();
    let note = state.write()?.upsert(id, fields, now);
    log::debug!("Note server: upserted {}", id);
    Ok(Json(note))
}

fn remove_note(state: &ServerState, id: &str) -> Result<Json<Value>, ApiError> {
    let now = state.clock.now();
    if state.write()?.delete(id, now) {
        log::debug!("Note server: deleted {}", id);
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::NotFound(format!("Note {} not found", id)))
    }
}

async fn get_note(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Note>, ApiError> {
    fetch_note(&state, &id)
}

async fn put_note(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(fields): Json<NoteFields>,
) -> Result<Json<Note>, ApiError> {
    store_note(&state, &id, fields)
}

async fn delete_note(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    remove_note(&state, &id)
}

// `/notes/sync` shadows the note with id "sync" for every method but POST.

async fn get_sync_note(State(state): State<ServerState>) -> Result<Json<Note>, ApiError> {
    fetch_note(&state, SYNC_PATH_ID)
}

async fn put_sync_note(
    State(state): State<ServerState>,
    Json(fields): Json<NoteFields>,
) -> Result<Json<Note>, ApiError> {
    store_note(&state, SYNC_PATH_ID, fields)
}

async fn delete_sync_note(State(state): State<ServerState>) -> Result<Json<Value>, ApiError> {
    remove_note(&state, SYNC_PATH_ID)
}

async fn sync_notes(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> Result<Json<SyncResponse>, ApiError> {
    let body: SyncBody = parse_notes_body(body)?;
    let now = state.clock.now();
    let response = state.write()?.sync_batch(body.notes, now);
    log::info!(
        "Note server: synced {} note(s), {} stored",
        response.synced,
        response.notes.len()
    );
    Ok(Json(response))
}

/// Router with the note API nested under `/api`
pub fn router(state: ServerState) -> Router {
    let api = Router::new()
        .route("/hello", get(hello))
        .route("/notes", get(list_notes).post(replace_notes))
        .route(
            "/notes/sync",
            post(sync_notes)
                .get(get_sync_note)
                .put(put_sync_note)
                .delete(delete_sync_note),
        )
        .route(
            "/notes/{id}",
            get(get_note).put(put_note).delete(delete_note),
        )
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
}

/// Handle to a running note server
pub struct NoteServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl NoteServer {
    /// Base URL of the note API, suitable for `HttpRemote`
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Stop the server gracefully
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for NoteServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind `addr` (port 0 picks a free port) and serve in the background
pub async fn start_server(addr: SocketAddr, state: ServerState) -> std::io::Result<NoteServer> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let app = router(state);

    log::info!("Note server started on http://{}/api", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                log::info!("Note server shutting down");
            })
            .await
            .ok();
    });

    Ok(NoteServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
    })
}
