//! Entry-centric view over the upload queue.
//!
//! Tracks which entries have uploads in flight and turns queue events into
//! `UploadNotification`s keyed by entry.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace};

use crate::domain::{Entry, EntryId, ItemId, QueueEvent, UploadDestination, UploadNotification};

use super::queue::{QueueError, UploadQueue};

/// Upload coordinator
pub struct UploadCoordinator {
    queue: Arc<UploadQueue>,
    pending: RwLock<HashSet<EntryId>>,
}

impl UploadCoordinator {
    /// Build a coordinator, seeding its pending set from the queue
    pub async fn new(queue: Arc<UploadQueue>) -> Self {
        let pending: HashSet<EntryId> = queue.pending_entry_ids().await.into_iter().collect();
        debug!(pending = pending.len(), "Upload coordinator ready");

        Self {
            queue,
            pending: RwLock::new(pending),
        }
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }

    /// Enqueue the entry's local audio. No-op if the entry has no local file.
    pub async fn enqueue(
        &self,
        entry: &Entry,
        destination: UploadDestination,
    ) -> Result<Option<ItemId>, QueueError> {
        let Some(source) = entry.local_file.clone() else {
            debug!(entry_id = %entry.id, "Entry has no local file, skipping enqueue");
            return Ok(None);
        };

        // Terminal events emitted during the queue call are processed only
        // after this guard drops, so the insert below can never land late.
        let mut pending = self.pending.write().await;
        let item_id = self.queue.enqueue(entry.id, source, destination).await?;
        if item_id.is_some() && self.queue.has_pending(entry.id).await {
            pending.insert(entry.id);
        }
        Ok(item_id)
    }

    /// True if the local pending set or the queue reports the entry in flight
    pub async fn has_pending_upload(&self, entry_id: EntryId) -> bool {
        if self.pending.read().await.contains(&entry_id) {
            return true;
        }
        self.queue.has_pending(entry_id).await
    }

    /// Redispatch due items
    pub async fn resume_pending_uploads(&self) -> Result<usize, QueueError> {
        self.queue.retry_due_items().await
    }

    /// Cancel the entry's upload; pendingness flips false immediately
    pub async fn cancel_upload(&self, entry_id: EntryId) -> Result<usize, QueueError> {
        self.pending.write().await.remove(&entry_id);
        self.queue.cancel(entry_id).await
    }

    /// Entries currently tracked as pending
    pub async fn pending_entry_ids(&self) -> Vec<EntryId> {
        self.pending.read().await.iter().copied().collect()
    }

    /// Translate one queue event. Only terminal events produce a notification.
    pub async fn process_queue_event(&self, event: QueueEvent) -> Option<UploadNotification> {
        match event {
            QueueEvent::Updated(item) => {
                trace!(entry_id = %item.entry_id, attempt = item.attempt, "Upload still pending");
                None
            }
            QueueEvent::Completed(item) => {
                self.pending.write().await.remove(&item.entry_id);
                info!(entry_id = %item.entry_id, "Upload succeeded");
                Some(UploadNotification::Succeeded {
                    entry_id: item.entry_id,
                })
            }
            QueueEvent::Failed { item, failure } => {
                self.pending.write().await.remove(&item.entry_id);
                info!(entry_id = %item.entry_id, error = %failure, "Upload failed");
                Some(UploadNotification::Failed {
                    entry_id: item.entry_id,
                    reason: failure.to_string(),
                })
            }
        }
    }

    /// Consume queue events and forward notifications until either side closes
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<QueueEvent>,
        notifications: mpsc::UnboundedSender<UploadNotification>,
    ) {
        while let Some(event) = events.recv().await {
            if let Some(notification) = self.process_queue_event(event).await {
                if notifications.send(notification).is_err() {
                    debug!("Upload notification receiver dropped");
                    break;
                }
            }
        }
    }
}
