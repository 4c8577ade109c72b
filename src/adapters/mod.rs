//! Collaborator interfaces the engine consumes, plus concrete implementations.
//!
//! The engine only talks to the outside world through these traits:
//! - `EntryStore`: local record of truth for entries
//! - `RemoteSyncService`: the My Day API (destinations, metadata, change feed)
//! - `TransferSubsystem`: background-capable file uploads
//! - `KeyValueStore`: durable blobs (upload items, sync cursor)

pub mod api;
pub mod entry_store;
pub mod http_transfer;
pub mod kv;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    Entry, EntryId, EntryStatus, ItemId, TaskId, Transcript, TransferError, UploadDestination,
};

pub use api::{ApiConfig, MyDayApiClient};
pub use entry_store::LocalEntryStore;
pub use http_transfer::HttpTransfer;
pub use kv::{FileKeyValueStore, MemoryKeyValueStore};

/// Errors from durable key/value persistence
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Errors from the entry store
#[derive(Debug, Error)]
pub enum EntryStoreError {
    #[error("Entry not found: {0}")]
    NotFound(EntryId),

    #[error("Entry already exists: {0}")]
    AlreadyExists(EntryId),

    #[error("Invalid state transition: {from} → {to}")]
    InvalidTransition { from: EntryStatus, to: EntryStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the remote sync service
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Local record of truth for entries
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Entries awaiting upload, oldest first
    async fn pending_entries(&self) -> Result<Vec<Entry>, EntryStoreError>;

    /// Insert unknown entries, merge known ones
    async fn upsert(&self, entries: &[Entry]) -> Result<(), EntryStoreError>;

    /// Set the uploaded flag
    async fn mark_uploaded(&self, ids: &[EntryId]) -> Result<(), EntryStoreError>;

    /// Request a status transition; illegal transitions are rejected per entry
    async fn update_status(
        &self,
        status: EntryStatus,
        ids: &[EntryId],
    ) -> Result<(), EntryStoreError>;

    /// Persist a transcript for one entry
    async fn update_transcript(
        &self,
        transcript: &Transcript,
        id: EntryId,
    ) -> Result<(), EntryStoreError>;

    /// Store a human-readable failure reason
    async fn record_failure(&self, _id: EntryId, _reason: &str) -> Result<(), EntryStoreError> {
        Ok(())
    }
}

/// The remote My Day service, treated as opaque
#[async_trait]
pub trait RemoteSyncService: Send + Sync {
    async fn request_upload_destination(
        &self,
        entry_id: EntryId,
    ) -> Result<UploadDestination, RemoteError>;

    async fn submit_entry_metadata(&self, entry: &Entry) -> Result<(), RemoteError>;

    /// Entries changed since the cursor; `None` means a full fetch
    async fn fetch_changed_entries(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entry>, RemoteError>;
}

/// Request to upload one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub item_id: ItemId,
    pub source: PathBuf,
    pub destination: UploadDestination,
}

/// A task the transfer subsystem currently considers live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTask {
    pub task_id: TaskId,
    pub item_id: ItemId,
}

/// Background-capable file upload client.
///
/// Completions are delivered out of band (see `TransferCompletion`), from any
/// task and in any order across items.
#[async_trait]
pub trait TransferSubsystem: Send + Sync {
    /// Tasks still running (used for startup reconciliation)
    async fn live_tasks(&self) -> Vec<TransferTask>;

    /// Start uploading `request.source` to `request.destination`
    async fn start_upload(&self, request: TransferRequest) -> Result<TaskId, TransferError>;

    /// Best-effort cancellation; no completion is guaranteed afterwards
    async fn cancel(&self, task_id: TaskId);
}

/// Durable byte blobs under fixed keys
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
}
