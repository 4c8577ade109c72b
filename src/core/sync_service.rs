//! Serialized sync orchestration.
//!
//! One `perform_sync` pass uploads entries that still need their audio
//! delivered, then pulls entries changed since the last cursor and merges them
//! into the local store. Every public operation takes the same lock, so a
//! second caller waits for the first to finish instead of racing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{
    EntryStore, EntryStoreError, KeyValueStore, RemoteError, RemoteSyncService, StorageError,
};
use crate::domain::{Entry, EntryId, EntryStatus, Transcript, UploadNotification};

use super::coordinator::UploadCoordinator;
use super::queue::QueueError;

/// Key the sync cursor is persisted under
pub const SYNC_CURSOR_KEY: &str = "sync_cursor";

/// Errors that can occur during a sync pass
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Entry {0} needs upload but has no local file")]
    MissingLocalFile(EntryId),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Entry store error: {0}")]
    Store(#[from] EntryStoreError),

    #[error("Upload queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

struct SyncState {
    last_sync: Option<DateTime<Utc>>,
}

/// Sync service
pub struct SyncService {
    store: Arc<dyn EntryStore>,
    remote: Arc<dyn RemoteSyncService>,
    coordinator: Arc<UploadCoordinator>,
    kv: Arc<dyn KeyValueStore>,
    state: Mutex<SyncState>,
    handled: AtomicU64,
}

impl SyncService {
    /// Create the service, restoring the persisted cursor if there is one
    pub async fn open(
        store: Arc<dyn EntryStore>,
        remote: Arc<dyn RemoteSyncService>,
        coordinator: Arc<UploadCoordinator>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, SyncError> {
        let last_sync = match kv.get(SYNC_CURSOR_KEY).await? {
            Some(bytes) if !bytes.is_empty() => {
                Some(serde_json::from_slice(&bytes).map_err(StorageError::from)?)
            }
            _ => None,
        };
        debug!(?last_sync, "Sync service opened");

        Ok(Self {
            store,
            remote,
            coordinator,
            kv,
            state: Mutex::new(SyncState { last_sync }),
            handled: AtomicU64::new(0),
        })
    }

    pub fn coordinator(&self) -> &Arc<UploadCoordinator> {
        &self.coordinator
    }

    /// Cursor of the last successful fetch+merge
    pub async fn last_sync_date(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_sync
    }

    /// Run one full sync pass and return the fetched remote entries
    #[instrument(skip(self))]
    pub async fn perform_sync(&self) -> Result<Vec<Entry>, SyncError> {
        let mut state = self.state.lock().await;

        let resumed = self.coordinator.resume_pending_uploads().await?;
        let submitted = self.upload_pending_entries().await?;

        let started_at = Utc::now();
        let fetched = self.remote.fetch_changed_entries(state.last_sync).await?;
        self.merge_entries(&fetched).await?;

        state.last_sync = Some(started_at);
        if let Err(e) = self.persist_cursor(started_at).await {
            warn!(error = %e, "Failed to persist sync cursor");
        }

        info!(resumed, submitted, fetched = fetched.len(), "Sync complete");
        Ok(fetched)
    }

    /// Upsert remote entries and persist transcripts of transcribed ones
    pub async fn merge(&self, entries: &[Entry]) -> Result<(), SyncError> {
        let _state = self.state.lock().await;
        self.merge_entries(entries).await
    }

    /// Record a confirmed upload. Store errors are logged, not raised.
    pub async fn handle_upload_success(&self, entry_id: EntryId) {
        let _state = self.state.lock().await;

        if let Err(e) = self.store.mark_uploaded(&[entry_id]).await {
            warn!(%entry_id, error = %e, "Failed to mark entry uploaded");
        }
        if let Err(e) = self
            .store
            .update_status(EntryStatus::Uploaded, &[entry_id])
            .await
        {
            warn!(%entry_id, error = %e, "Failed to set entry status to uploaded");
        }
    }

    /// Record a terminal upload failure. Store errors are logged, not raised.
    pub async fn handle_upload_failure(&self, entry_id: EntryId, reason: &str) {
        let _state = self.state.lock().await;

        if let Err(e) = self
            .store
            .update_status(EntryStatus::Failed, &[entry_id])
            .await
        {
            warn!(%entry_id, error = %e, "Failed to set entry status to failed");
        }
        if let Err(e) = self.store.record_failure(entry_id, reason).await {
            warn!(%entry_id, error = %e, "Failed to record upload failure reason");
        }
    }

    /// Apply one coordinator notification
    pub async fn handle_notification(&self, notification: UploadNotification) {
        match notification {
            UploadNotification::Succeeded { entry_id } => {
                self.handle_upload_success(entry_id).await
            }
            UploadNotification::Failed { entry_id, reason } => {
                self.handle_upload_failure(entry_id, &reason).await
            }
        }
    }

    /// Notifications the `run` pump has finished applying
    pub fn handled_notification_count(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    /// Consume notifications until the coordinator side closes
    pub async fn run(self: Arc<Self>, mut notifications: mpsc::UnboundedReceiver<UploadNotification>) {
        while let Some(notification) = notifications.recv().await {
            self.handle_notification(notification).await;
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
        debug!("Upload notification channel closed");
    }

    async fn upload_pending_entries(&self) -> Result<usize, SyncError> {
        let pending = self.store.pending_entries().await?;
        let mut submitted = 0usize;

        for entry in pending {
            if self.coordinator.has_pending_upload(entry.id).await {
                debug!(entry_id = %entry.id, "Upload already in flight");
                continue;
            }
            if entry.local_file.is_none() {
                return Err(SyncError::MissingLocalFile(entry.id));
            }

            let destination = self.remote.request_upload_destination(entry.id).await?;
            self.remote.submit_entry_metadata(&entry).await?;

            // Status first so a fast completion cannot be overwritten
            self.store
                .update_status(EntryStatus::Uploading, &[entry.id])
                .await?;

            match self.coordinator.enqueue(&entry, destination).await? {
                Some(item_id) => {
                    debug!(entry_id = %entry.id, %item_id, "Entry submitted for upload");
                    submitted += 1;
                }
                None => warn!(entry_id = %entry.id, "Upload was not enqueued"),
            }
        }

        Ok(submitted)
    }

    async fn merge_entries(&self, entries: &[Entry]) -> Result<(), SyncError> {
        if entries.is_empty() {
            return Ok(());
        }

        self.store.upsert(entries).await?;

        for entry in entries {
            if entry.status != EntryStatus::Transcribed {
                continue;
            }
            let Some(clean) = entry.clean_transcript() else {
                continue;
            };

            let transcript = Transcript {
                raw: entry.transcript.as_ref().and_then(|t| t.raw.clone()),
                clean: Some(clean.to_string()),
            };
            self.store.update_transcript(&transcript, entry.id).await?;
        }

        Ok(())
    }

    async fn persist_cursor(&self, cursor: DateTime<Utc>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&cursor)?;
        self.kv.set(SYNC_CURSOR_KEY, bytes).await
    }
}
