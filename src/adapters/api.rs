//! My Day HTTP API client.
//!
//! JSON over HTTP with an optional bearer token. The server upserts metadata
//! keyed by the client-assigned entry id, so resubmission is harmless.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RemoteError, RemoteSyncService};
use crate::domain::{Entry, EntryId, EntryStatus, Transcript, UploadDestination};

/// Settings for the API client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://api.example.com/v1`
    pub base_url: String,

    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Response of `POST /entries/{id}/upload-url`
#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    upload_url: String,
    #[serde(default)]
    object_key: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

/// Body of `PUT /entries/{id}`
#[derive(Debug, Serialize)]
struct EntryMetadata<'a> {
    created_at: DateTime<Utc>,
    duration_s: f64,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

/// Server representation of an entry
#[derive(Debug, Deserialize)]
struct RemoteEntry {
    id: EntryId,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_s: f64,
    status: EntryStatus,
    #[serde(default)]
    audio_url: Option<String>,
    #[serde(default)]
    size_bytes: u64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    transcript_raw: Option<String>,
    #[serde(default)]
    transcript_clean: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl From<RemoteEntry> for Entry {
    fn from(remote: RemoteEntry) -> Self {
        Entry {
            id: remote.id,
            created_at: remote.created_at,
            duration_secs: remote.duration_s,
            size_bytes: remote.size_bytes,
            local_file: None,
            remote_url: remote.audio_url,
            transcript: Transcript::from_parts(remote.transcript_raw, remote.transcript_clean),
            language: remote.language,
            status: remote.status,
            uploaded: remote.status.implies_uploaded(),
            failure_reason: remote.failure_reason,
            updated_at: remote.updated_at.unwrap_or(remote.created_at),
        }
    }
}

/// Client for the My Day API
pub struct MyDayApiClient {
    config: ApiConfig,
    client: reqwest::Client,
}

impl MyDayApiClient {
    /// Create a new API client
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build an endpoint URL under the base
    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn entries_url(&self, since: Option<DateTime<Utc>>) -> String {
        match since {
            Some(cursor) => format!(
                "{}?since={}",
                self.url("entries"),
                cursor.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            None => self.url("entries"),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RemoteSyncService for MyDayApiClient {
    async fn request_upload_destination(
        &self,
        entry_id: EntryId,
    ) -> Result<UploadDestination, RemoteError> {
        let url = self.url(&format!("entries/{}/upload-url", entry_id));
        let response = self.authorize(self.client.post(&url)).send().await?;
        let parsed: UploadUrlResponse = Self::check(response).await?.json().await?;

        if parsed.upload_url.is_empty() {
            return Err(RemoteError::InvalidResponse(
                "empty upload_url in destination response".to_string(),
            ));
        }

        let mut destination = UploadDestination::new(parsed.upload_url);
        destination.object_key = parsed.object_key;
        if let Some(content_type) = parsed.content_type {
            destination.content_type = content_type;
        }
        Ok(destination)
    }

    async fn submit_entry_metadata(&self, entry: &Entry) -> Result<(), RemoteError> {
        let url = self.url(&format!("entries/{}", entry.id));
        let body = EntryMetadata {
            created_at: entry.created_at,
            duration_s: entry.duration_secs,
            size_bytes: entry.size_bytes,
            language: entry.language.as_deref(),
        };

        let response = self.authorize(self.client.put(&url)).json(&body).send().await?;
        Self::check(response).await?;
        debug!(entry_id = %entry.id, "Submitted entry metadata");
        Ok(())
    }

    async fn fetch_changed_entries(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entry>, RemoteError> {
        let url = self.entries_url(since);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let remote: Vec<RemoteEntry> = Self::check(response).await?.json().await?;

        debug!(count = remote.len(), ?since, "Fetched changed entries");
        Ok(remote.into_iter().map(Entry::from).collect())
    }
}
