//! Durable upload queue with bounded retries.
//!
//! Owns the resident item map and the task index (transfer task id → item id)
//! behind a single read/write lock. Every mutation happens under the write
//! lock and rewrites the persisted map. Outcomes are reported as `QueueEvent`s
//! on a channel; at most one terminal event (`Completed` or `Failed`) is ever
//! emitted per item.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{KeyValueStore, StorageError, TransferRequest, TransferSubsystem};
use crate::domain::{
    EntryId, ItemId, QueueEvent, TaskId, TransferCompletion, TransferError, TransferOutcome,
    UploadDestination, UploadFailure, UploadItem,
};

use super::backoff::BackoffPolicy;
use super::item_store::UploadItemStore;

/// Errors that can occur in the upload queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to persist upload items: {0}")]
    Storage(#[from] StorageError),
}

struct QueueState {
    items: UploadItemStore,
    tasks: HashMap<TaskId, ItemId>,
}

impl QueueState {
    fn in_flight(&self) -> HashSet<ItemId> {
        self.tasks.values().copied().collect()
    }
}

/// Upload queue
pub struct UploadQueue {
    policy: BackoffPolicy,
    transfer: Arc<dyn TransferSubsystem>,
    state: RwLock<QueueState>,
    events: mpsc::UnboundedSender<QueueEvent>,
    terminal_events: AtomicU64,
}

impl UploadQueue {
    /// Load persisted items and reconcile them against the transfer
    /// subsystem's live tasks.
    ///
    /// Items with a live task keep waiting for its completion. Items without
    /// one are orphaned and scheduled for a retry after `delay(max(attempt, 1))`
    /// instead of being dispatched immediately.
    pub async fn open(
        policy: BackoffPolicy,
        kv: Arc<dyn KeyValueStore>,
        transfer: Arc<dyn TransferSubsystem>,
        events: mpsc::UnboundedSender<QueueEvent>,
    ) -> Result<Self, QueueError> {
        let mut items = UploadItemStore::load(kv).await?;
        let mut tasks = HashMap::new();

        for task in transfer.live_tasks().await {
            if items.contains(&task.item_id) {
                tasks.insert(task.task_id, task.item_id);
            } else {
                debug!(task_id = task.task_id, item_id = %task.item_id, "Cancelling live task for unknown item");
                transfer.cancel(task.task_id).await;
            }
        }

        let live: HashSet<ItemId> = tasks.values().copied().collect();
        let now = Utc::now();
        let mut orphaned = 0usize;

        for id in items.item_ids() {
            if live.contains(&id) {
                continue;
            }
            if let Some(item) = items.get_mut(&id) {
                let delay = policy.delay(item.attempt.max(1));
                item.next_retry_at = Some(retry_at(now, delay));
                orphaned += 1;
            }
        }

        if orphaned > 0 {
            items.persist().await?;
        }

        info!(
            resident = items.len(),
            live = live.len(),
            orphaned,
            "Upload queue loaded"
        );

        Ok(Self {
            policy,
            transfer,
            state: RwLock::new(QueueState { items, tasks }),
            events,
            terminal_events: AtomicU64::new(0),
        })
    }

    /// Create an item for the entry and dispatch it.
    ///
    /// Returns `None` (and does nothing) if the source file does not exist.
    /// If the entry already has a resident item, that item's id is returned.
    pub async fn enqueue(
        &self,
        entry_id: EntryId,
        source: PathBuf,
        destination: UploadDestination,
    ) -> Result<Option<ItemId>, QueueError> {
        if !source_exists(&source).await {
            warn!(%entry_id, source = %source.display(), "Source file missing, not enqueueing");
            return Ok(None);
        }

        let mut state = self.state.write().await;

        if let Some(existing) = state.items.find_by_entry(entry_id) {
            debug!(%entry_id, item_id = %existing.id, "Entry already has a resident item");
            return Ok(Some(existing.id));
        }

        let item = UploadItem::new(entry_id, source, destination);
        let item_id = item.id;
        state.items.insert(item);
        info!(%entry_id, %item_id, "Enqueued upload");

        self.dispatch(&mut state, item_id).await?;
        Ok(Some(item_id))
    }

    /// Redispatch every resident item whose backoff window has elapsed.
    /// Items with a live transfer task are left alone.
    pub async fn retry_due_items(&self) -> Result<usize, QueueError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let in_flight = state.in_flight();

        let due: Vec<ItemId> = state
            .items
            .iter()
            .filter(|item| !in_flight.contains(&item.id) && item.is_due(now))
            .map(|item| item.id)
            .collect();

        let mut first_error = None;
        for item_id in &due {
            if let Err(e) = self.dispatch(&mut state, *item_id).await {
                warn!(%item_id, error = %e, "Failed to redispatch upload");
                first_error.get_or_insert(e);
            }
        }

        if !due.is_empty() {
            debug!(count = due.len(), "Redispatched due items");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(due.len()),
        }
    }

    /// Number of transfer tasks still awaiting a completion
    pub async fn in_flight_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    /// `Completed` and `Failed` events emitted since the queue was opened
    pub fn terminal_event_count(&self) -> u64 {
        self.terminal_events.load(Ordering::SeqCst)
    }

    /// Drop every resident item for the entry and best-effort cancel their
    /// transfers. No event is emitted.
    pub async fn cancel(&self, entry_id: EntryId) -> Result<usize, QueueError> {
        let (removed, task_ids, persisted) = {
            let mut state = self.state.write().await;
            let removed = state.items.remove_for_entry(entry_id);
            if removed.is_empty() {
                return Ok(0);
            }

            let removed_ids: HashSet<ItemId> = removed.iter().map(|item| item.id).collect();
            let task_ids: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|(_, item_id)| removed_ids.contains(item_id))
                .map(|(task_id, _)| *task_id)
                .collect();
            for task_id in &task_ids {
                state.tasks.remove(task_id);
            }

            let persisted = state.items.persist().await;
            (removed.len(), task_ids, persisted)
        };

        for task_id in task_ids {
            self.transfer.cancel(task_id).await;
        }

        info!(%entry_id, removed, "Cancelled uploads");
        persisted?;
        Ok(removed)
    }

    /// True if any item for the entry is resident
    pub async fn has_pending(&self, entry_id: EntryId) -> bool {
        self.state.read().await.items.find_by_entry(entry_id).is_some()
    }

    /// Entries that currently have resident items
    pub async fn pending_entry_ids(&self) -> Vec<EntryId> {
        let state = self.state.read().await;
        let ids: HashSet<EntryId> = state.items.iter().map(|item| item.entry_id).collect();
        ids.into_iter().collect()
    }

    /// Snapshot of resident items
    pub async fn items(&self) -> Vec<UploadItem> {
        self.state.read().await.items.iter().cloned().collect()
    }

    /// Resident item for an entry, if any
    pub async fn item_for_entry(&self, entry_id: EntryId) -> Option<UploadItem> {
        self.state.read().await.items.find_by_entry(entry_id).cloned()
    }

    /// Classify a transfer completion. Completions for tasks that are no longer
    /// indexed (cancelled, or already classified) are ignored.
    pub async fn handle_completion(&self, completion: TransferCompletion) -> Result<(), QueueError> {
        let mut state = self.state.write().await;

        let Some(item_id) = state.tasks.remove(&completion.task_id) else {
            debug!(
                task_id = completion.task_id,
                item_id = %completion.item_id,
                "Ignoring completion for unknown task"
            );
            return Ok(());
        };

        if item_id != completion.item_id {
            warn!(
                task_id = completion.task_id,
                indexed = %item_id,
                reported = %completion.item_id,
                "Completion item id does not match task index"
            );
        }

        self.classify(&mut state, item_id, completion.outcome).await
    }

    /// Consume completions until the sender side closes
    pub async fn run(self: Arc<Self>, mut completions: mpsc::UnboundedReceiver<TransferCompletion>) {
        while let Some(completion) = completions.recv().await {
            if let Err(e) = self.handle_completion(completion).await {
                warn!(error = %e, "Failed to record upload completion");
            }
        }
        debug!("Transfer completion channel closed");
    }

    #[instrument(skip(self, state))]
    async fn dispatch(&self, state: &mut QueueState, item_id: ItemId) -> Result<(), QueueError> {
        let Some(item) = state.items.get_mut(&item_id) else {
            return Ok(());
        };

        item.attempt += 1;
        item.last_attempt_at = Some(Utc::now());
        item.next_retry_at = None;
        let snapshot = item.clone();

        state.items.persist().await?;
        self.emit(QueueEvent::Updated(snapshot.clone()));

        if !source_exists(&snapshot.source).await {
            let err = TransferError::SourceMissing(snapshot.source.clone());
            return self.classify(state, item_id, TransferOutcome::Error(err)).await;
        }

        let request = TransferRequest {
            item_id,
            source: snapshot.source.clone(),
            destination: snapshot.destination.clone(),
        };

        match self.transfer.start_upload(request).await {
            Ok(task_id) => {
                debug!(task_id, attempt = snapshot.attempt, "Transfer started");
                state.tasks.insert(task_id, item_id);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Transfer could not be started");
                self.classify(state, item_id, TransferOutcome::Error(err)).await
            }
        }
    }

    async fn classify(
        &self,
        state: &mut QueueState,
        item_id: ItemId,
        outcome: TransferOutcome,
    ) -> Result<(), QueueError> {
        let Some(item) = state.items.get(&item_id).cloned() else {
            debug!(%item_id, "Outcome for item that is no longer resident");
            return Ok(());
        };

        let Some(failure) = UploadFailure::from_outcome(&outcome) else {
            state.items.remove(&item_id);
            let persisted = state.items.persist().await;
            info!(entry_id = %item.entry_id, %item_id, attempt = item.attempt, "Upload completed");
            self.terminal_events.fetch_add(1, Ordering::SeqCst);
            self.emit(QueueEvent::Completed(item));
            return persisted.map_err(Into::into);
        };

        if self.policy.is_exhausted(item.attempt) {
            state.items.remove(&item_id);
            let persisted = state.items.persist().await;
            error!(
                entry_id = %item.entry_id,
                %item_id,
                attempt = item.attempt,
                error = %failure,
                "Upload failed permanently"
            );
            self.terminal_events.fetch_add(1, Ordering::SeqCst);
            self.emit(QueueEvent::Failed { item, failure });
            return persisted.map_err(Into::into);
        }

        let delay = self.policy.delay(item.attempt);
        let snapshot = match state.items.get_mut(&item_id) {
            Some(resident) => {
                resident.next_retry_at = Some(retry_at(Utc::now(), delay));
                resident.clone()
            }
            None => return Ok(()),
        };
        let persisted = state.items.persist().await;

        warn!(
            entry_id = %snapshot.entry_id,
            %item_id,
            attempt = snapshot.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Upload failed, retry scheduled"
        );
        self.emit(QueueEvent::Updated(snapshot));
        persisted.map_err(Into::into)
    }

    fn emit(&self, event: QueueEvent) {
        if self.events.send(event).is_err() {
            debug!("Queue event receiver dropped");
        }
    }
}

async fn source_exists(path: &std::path::Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
    now.checked_add_signed(delay).unwrap_or(now)
}
