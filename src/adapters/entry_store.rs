//! Local entry store.
//!
//! Entries live in one JSON document that is rewritten after every mutation.
//! Status changes go through `EntryStatus::can_transition_to`; an illegal
//! request leaves that entry untouched and is logged.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{EntryStore, EntryStoreError};
use crate::domain::{Entry, EntryId, EntryStatus, Transcript};

/// Failure reason recorded by `mark_cancelled`
pub const CANCELLED_REASON: &str = "cancelled";

/// Entries still on their way to the server can be cancelled
pub fn is_cancellable(status: EntryStatus) -> bool {
    status != EntryStatus::Failed && status.can_transition_to(EntryStatus::Failed)
}

/// On-disk document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryDocument {
    /// Document format version
    version: u32,

    /// Entries in creation order
    entries: Vec<Entry>,
}

impl Default for EntryDocument {
    fn default() -> Self {
        Self {
            version: 1,
            entries: Vec::new(),
        }
    }
}

impl EntryDocument {
    fn find_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

/// JSON-file (or purely in-memory) entry store
pub struct LocalEntryStore {
    path: Option<PathBuf>,
    doc: RwLock<EntryDocument>,
}

impl LocalEntryStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, EntryStoreError> {
        let path = path.into();

        let doc = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            EntryDocument::default()
        };

        debug!(path = %path.display(), entries = doc.entries.len(), "Entry store opened");
        Ok(Self {
            path: Some(path),
            doc: RwLock::new(doc),
        })
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RwLock::new(EntryDocument::default()),
        }
    }

    /// Add a freshly recorded entry
    pub async fn insert(&self, entry: Entry) -> Result<(), EntryStoreError> {
        let mut doc = self.doc.write().await;
        if doc.entries.iter().any(|e| e.id == entry.id) {
            return Err(EntryStoreError::AlreadyExists(entry.id));
        }
        doc.entries.push(entry);
        self.save(&doc).await
    }

    /// Move a failed entry back to `queued` so the next sync uploads it again
    pub async fn requeue(&self, id: EntryId) -> Result<Entry, EntryStoreError> {
        let mut doc = self.doc.write().await;
        let entry = doc.find_mut(id).ok_or(EntryStoreError::NotFound(id))?;

        if entry.status != EntryStatus::Failed {
            return Err(EntryStoreError::InvalidTransition {
                from: entry.status,
                to: EntryStatus::Queued,
            });
        }

        entry.status = EntryStatus::Queued;
        entry.failure_reason = None;
        entry.updated_at = Utc::now();
        let updated = entry.clone();

        self.save(&doc).await?;
        Ok(updated)
    }

    /// Mark an in-progress entry failed with reason `cancelled` so sync
    /// stops submitting it. Entries that cannot move to `failed` are rejected.
    pub async fn mark_cancelled(&self, id: EntryId) -> Result<Entry, EntryStoreError> {
        let mut doc = self.doc.write().await;
        let entry = doc.find_mut(id).ok_or(EntryStoreError::NotFound(id))?;

        if !is_cancellable(entry.status) {
            return Err(EntryStoreError::InvalidTransition {
                from: entry.status,
                to: EntryStatus::Failed,
            });
        }

        entry.status = EntryStatus::Failed;
        entry.failure_reason = Some(CANCELLED_REASON.to_string());
        entry.updated_at = Utc::now();
        let updated = entry.clone();

        self.save(&doc).await?;
        Ok(updated)
    }

    /// Look up one entry
    pub async fn get(&self, id: EntryId) -> Option<Entry> {
        self.doc.read().await.entries.iter().find(|e| e.id == id).cloned()
    }

    /// Snapshot of every entry
    pub async fn list(&self) -> Vec<Entry> {
        self.doc.read().await.entries.clone()
    }

    async fn save(&self, doc: &EntryDocument) -> Result<(), EntryStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        fs::write(path, content).await?;
        Ok(())
    }
}

/// Apply a status change through the transition table
fn apply_status(entry: &mut Entry, next: EntryStatus) -> bool {
    if entry.status == next {
        return false;
    }
    if !entry.status.can_transition_to(next) {
        warn!(
            entry_id = %entry.id,
            from = %entry.status,
            to = %next,
            "Rejected illegal status transition"
        );
        return false;
    }

    entry.status = next;
    if next.implies_uploaded() {
        entry.uploaded = true;
    }
    true
}

/// Fold a server-side view of an entry into the local one
fn merge_remote(local: &mut Entry, remote: &Entry) {
    apply_status(local, remote.status);

    if remote.remote_url.is_some() {
        local.remote_url = remote.remote_url.clone();
    }
    if remote.transcript.is_some() {
        local.transcript = remote.transcript.clone();
    }
    if remote.language.is_some() {
        local.language = remote.language.clone();
    }
    if remote.failure_reason.is_some() {
        local.failure_reason = remote.failure_reason.clone();
    }
    if remote.duration_secs > 0.0 {
        local.duration_secs = remote.duration_secs;
    }
    if remote.size_bytes > 0 {
        local.size_bytes = remote.size_bytes;
    }
    if remote.uploaded || local.status.implies_uploaded() {
        local.uploaded = true;
    }
    if remote.updated_at > local.updated_at {
        local.updated_at = remote.updated_at;
    }
}

#[async_trait]
impl EntryStore for LocalEntryStore {
    async fn pending_entries(&self) -> Result<Vec<Entry>, EntryStoreError> {
        let doc = self.doc.read().await;
        let mut pending: Vec<Entry> = doc
            .entries
            .iter()
            .filter(|e| e.awaits_upload())
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        Ok(pending)
    }

    async fn upsert(&self, entries: &[Entry]) -> Result<(), EntryStoreError> {
        let mut doc = self.doc.write().await;

        for remote in entries {
            match doc.find_mut(remote.id) {
                Some(local) => merge_remote(local, remote),
                None => {
                    let mut inserted = remote.clone();
                    if inserted.status.implies_uploaded() {
                        inserted.uploaded = true;
                    }
                    doc.entries.push(inserted);
                }
            }
        }

        self.save(&doc).await
    }

    async fn mark_uploaded(&self, ids: &[EntryId]) -> Result<(), EntryStoreError> {
        let mut doc = self.doc.write().await;
        let now = Utc::now();

        for id in ids {
            match doc.find_mut(*id) {
                Some(entry) if !entry.uploaded => {
                    entry.uploaded = true;
                    entry.updated_at = now;
                }
                Some(_) => {}
                None => return Err(EntryStoreError::NotFound(*id)),
            }
        }

        self.save(&doc).await
    }

    async fn update_status(
        &self,
        status: EntryStatus,
        ids: &[EntryId],
    ) -> Result<(), EntryStoreError> {
        let mut doc = self.doc.write().await;
        let now = Utc::now();

        for id in ids {
            let entry = doc.find_mut(*id).ok_or(EntryStoreError::NotFound(*id))?;
            if apply_status(entry, status) {
                entry.updated_at = now;
            }
        }

        self.save(&doc).await
    }

    async fn update_transcript(
        &self,
        transcript: &Transcript,
        id: EntryId,
    ) -> Result<(), EntryStoreError> {
        let mut doc = self.doc.write().await;
        let entry = doc.find_mut(id).ok_or(EntryStoreError::NotFound(id))?;

        if entry.transcript.as_ref() != Some(transcript) {
            entry.transcript = Some(transcript.clone());
        }

        self.save(&doc).await
    }

    async fn record_failure(&self, id: EntryId, reason: &str) -> Result<(), EntryStoreError> {
        let mut doc = self.doc.write().await;
        let entry = doc.find_mut(id).ok_or(EntryStoreError::NotFound(id))?;
        entry.failure_reason = Some(reason.to_string());

        self.save(&doc).await
    }
}
