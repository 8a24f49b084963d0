use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{CollectionState, Note, NoteFields};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Note not found: {0}")]
    NotFound(String),
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// Response of a batch sync: the full remote collection after the merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub notes: Vec<Note>,
    pub synced: usize,
}

/// The remote authoritative note store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read the whole remote collection
    async fn fetch_all(&self) -> Result<CollectionState, RemoteError>;
    /// Overwrite the remote collection; notes not in `state` are deleted
    async fn replace_all(&self, state: &CollectionState) -> Result<CollectionState, RemoteError>;
    async fn get(&self, id: &str) -> Result<Note, RemoteError>;
    /// Create or update one note. The server owns the timestamps it returns.
    async fn upsert(&self, id: &str, fields: &NoteFields) -> Result<Note, RemoteError>;
    async fn delete(&self, id: &str) -> Result<(), RemoteError>;
    /// Union-merge `notes` into the remote collection
    async fn sync_batch(&self, notes: &[Note]) -> Result<SyncResponse, RemoteError>;
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    notes: &'a [Note],
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the remote note store
pub struct HttpRemote {
    client: Client,
    base_url: Url,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the URL for `segments` below the base URL, percent-encoding each one
    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Map non-2xx statuses onto the error taxonomy
    async fn check(response: Response, what: &str) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);

        Err(match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound(what.to_string()),
            StatusCode::BAD_REQUEST => RemoteError::Validation(message),
            status => RemoteError::Server {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch_all(&self) -> Result<CollectionState, RemoteError> {
        let response = self.client.get(self.url(&["notes"])?).send().await?;
        let response = Self::check(response, "notes").await?;
        Ok(response.json().await?)
    }

    async fn replace_all(&self, state: &CollectionState) -> Result<CollectionState, RemoteError> {
        let response = self
            .client
            .post(self.url(&["notes"])?)
            .json(state)
            .send()
            .await?;
        let response = Self::check(response, "notes").await?;
        Ok(response.json().await?)
    }

    async fn get(&self, id: &str) -> Result<Note, RemoteError> {
        let response = self.client.get(self.url(&["notes", id])?).send().await?;
        let response = Self::check(response, id).await?;
        Ok(response.json().await?)
    }

    async fn upsert(&self, id: &str, fields: &NoteFields) -> Result<Note, RemoteError> {
        let response = self
            .client
            .put(self.url(&["notes", id])?)
            .json(fields)
            .send()
            .await?;
        let response = Self::check(response, id).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let response = self.client.delete(self.url(&["notes", id])?).send().await?;
        Self::check(response, id).await?;
        Ok(())
    }

    async fn sync_batch(&self, notes: &[Note]) -> Result<SyncResponse, RemoteError> {
        let response = self
            .client
            .post(self.url(&["notes", "sync"])?)
            .json(&SyncRequest { notes })
            .send()
            .await?;
        let response = Self::check(response, "notes/sync").await?;
        Ok(response.json().await?)
    }
}
