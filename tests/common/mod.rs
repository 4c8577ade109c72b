//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use myday::adapters::{
    EntryStore, EntryStoreError, KeyValueStore, LocalEntryStore, MemoryKeyValueStore,
    RemoteError, RemoteSyncService, StorageError, TransferRequest, TransferSubsystem, TransferTask,
};
use myday::core::{BackoffPolicy, UploadCoordinator, UploadQueue};
use myday::domain::{
    Entry, EntryId, EntryStatus, ItemId, QueueEvent, TaskId, Transcript, TransferCompletion,
    TransferError, TransferOutcome, UploadDestination,
};

/// Write a small audio file and return its path
pub fn audio_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"fake m4a payload").unwrap();
    path
}

pub fn destination(entry_id: EntryId) -> UploadDestination {
    UploadDestination::new(format!("https://uploads.example.com/{}", entry_id))
}

/// Backoff with a zero delay so retried items are immediately due
pub fn immediate_policy(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy::new(Duration::ZERO, 2.0, Duration::ZERO, max_attempts)
}

/// Drain every event currently buffered on the channel
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

pub fn is_terminal(event: &QueueEvent) -> bool {
    matches!(event, QueueEvent::Completed(_) | QueueEvent::Failed { .. })
}

/// Transfer subsystem that records requests and never completes on its own
#[derive(Default)]
pub struct ManualTransfer {
    next: AtomicU64,
    started: Mutex<Vec<(TaskId, TransferRequest)>>,
    cancelled: Mutex<Vec<TaskId>>,
    live: Mutex<Vec<TransferTask>>,
    refuse: AtomicBool,
}

impl ManualTransfer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tasks reported by `live_tasks` (as if they survived a restart)
    pub fn set_live(&self, tasks: Vec<TransferTask>) {
        *self.live.lock().unwrap() = tasks;
    }

    /// Make `start_upload` fail
    pub fn refuse_starts(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<(TaskId, TransferRequest)> {
        self.started.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Most recent task started for the item
    pub fn last_task(&self, item_id: ItemId) -> Option<TaskId> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, request)| request.item_id == item_id)
            .map(|(task_id, _)| *task_id)
    }

    /// Completion for the item's most recent task
    pub fn complete(&self, item_id: ItemId, outcome: TransferOutcome) -> TransferCompletion {
        TransferCompletion {
            task_id: self.last_task(item_id).unwrap(),
            item_id,
            outcome,
        }
    }
}

#[async_trait]
impl TransferSubsystem for ManualTransfer {
    async fn live_tasks(&self) -> Vec<TransferTask> {
        self.live.lock().unwrap().clone()
    }

    async fn start_upload(&self, request: TransferRequest) -> Result<TaskId, TransferError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransferError::Rejected("refused by test".to_string()));
        }
        let task_id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.lock().unwrap().push((task_id, request));
        Ok(task_id)
    }

    async fn cancel(&self, task_id: TaskId) {
        self.cancelled.lock().unwrap().push(task_id);
    }
}

pub fn transport_error() -> TransferOutcome {
    TransferOutcome::Error(TransferError::Transport("connection reset".to_string()))
}

pub fn ok_response() -> TransferOutcome {
    TransferOutcome::Response { status: 200 }
}

/// Queue over in-memory storage
pub async fn open_queue(
    policy: BackoffPolicy,
    kv: Arc<dyn KeyValueStore>,
    transfer: Arc<ManualTransfer>,
) -> (Arc<UploadQueue>, mpsc::UnboundedReceiver<QueueEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = UploadQueue::open(policy, kv, transfer, tx).await.unwrap();
    (Arc::new(queue), rx)
}

pub fn memory_kv() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryKeyValueStore::new())
}

/// In-memory key/value store whose next writes can be made to fail
#[derive(Default)]
pub struct FlakyKv {
    inner: MemoryKeyValueStore,
    failing_sets: AtomicUsize,
}

impl FlakyKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` calls to `set`
    pub fn fail_next_sets(&self, count: usize) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let failing = self
            .failing_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.set(key, value).await
    }
}

/// Coordinator plus the pieces tests need to drive it
pub struct Harness {
    pub queue: Arc<UploadQueue>,
    pub coordinator: Arc<UploadCoordinator>,
    pub transfer: Arc<ManualTransfer>,
    pub kv: Arc<dyn KeyValueStore>,
    pub events: mpsc::UnboundedReceiver<QueueEvent>,
}

pub async fn harness(policy: BackoffPolicy) -> Harness {
    let transfer = ManualTransfer::new();
    let kv = memory_kv();
    let (queue, events) = open_queue(policy, kv.clone(), transfer.clone()).await;
    let coordinator = Arc::new(UploadCoordinator::new(queue.clone()).await);
    Harness {
        queue,
        coordinator,
        transfer,
        kv,
        events,
    }
}

/// Remote service with canned responses
#[derive(Default)]
pub struct ScriptedRemote {
    responses: Mutex<VecDeque<Vec<Entry>>>,
    fetch_since: Mutex<Vec<Option<DateTime<Utc>>>>,
    destinations: Mutex<Vec<EntryId>>,
    submitted: Mutex<Vec<EntryId>>,
    fail_fetch: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the result of the next fetch (later fetches return empty)
    pub fn push_fetch(&self, entries: Vec<Entry>) {
        self.responses.lock().unwrap().push_back(entries);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.fetch_since.lock().unwrap().clone()
    }

    pub fn destination_requests(&self) -> Vec<EntryId> {
        self.destinations.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<EntryId> {
        self.submitted.lock().unwrap().clone()
    }

    /// Highest number of fetches observed running at once
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSyncService for ScriptedRemote {
    async fn request_upload_destination(
        &self,
        entry_id: EntryId,
    ) -> Result<UploadDestination, RemoteError> {
        self.destinations.lock().unwrap().push(entry_id);
        Ok(destination(entry_id))
    }

    async fn submit_entry_metadata(&self, entry: &Entry) -> Result<(), RemoteError> {
        self.submitted.lock().unwrap().push(entry.id);
        Ok(())
    }

    async fn fetch_changed_entries(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entry>, RemoteError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.fetch_since.lock().unwrap().push(since);

        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Entry store that records transcript writes and can be made to fail
pub struct RecordingEntryStore {
    pub inner: LocalEntryStore,
    transcripts: Mutex<Vec<(EntryId, Transcript)>>,
    upserts: AtomicUsize,
    fail_writes: AtomicBool,
}

impl RecordingEntryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalEntryStore::in_memory(),
            transcripts: Mutex::new(Vec::new()),
            upserts: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn transcript_writes(&self) -> Vec<(EntryId, Transcript)> {
        self.transcripts.lock().unwrap().clone()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), EntryStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EntryStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EntryStore for RecordingEntryStore {
    async fn pending_entries(&self) -> Result<Vec<Entry>, EntryStoreError> {
        self.inner.pending_entries().await
    }

    async fn upsert(&self, entries: &[Entry]) -> Result<(), EntryStoreError> {
        self.check_writable()?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(entries).await
    }

    async fn mark_uploaded(&self, ids: &[EntryId]) -> Result<(), EntryStoreError> {
        self.check_writable()?;
        self.inner.mark_uploaded(ids).await
    }

    async fn update_status(
        &self,
        status: EntryStatus,
        ids: &[EntryId],
    ) -> Result<(), EntryStoreError> {
        self.check_writable()?;
        self.inner.update_status(status, ids).await
    }

    async fn update_transcript(
        &self,
        transcript: &Transcript,
        id: EntryId,
    ) -> Result<(), EntryStoreError> {
        self.check_writable()?;
        self.transcripts.lock().unwrap().push((id, transcript.clone()));
        self.inner.update_transcript(transcript, id).await
    }

    async fn record_failure(&self, id: EntryId, reason: &str) -> Result<(), EntryStoreError> {
        self.check_writable()?;
        self.inner.record_failure(id, reason).await
    }
}
