//! Engine Integration Tests
//!
//! End-to-end flow through the spawned pumps: sync submits, the transfer
//! reports, and the entry store ends up with the outcome.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use common::*;
use myday::adapters::LocalEntryStore;
use myday::core::{EngineParts, SyncEngine};
use myday::domain::{Entry, EntryId, EntryStatus, TransferCompletion};

async fn wait_for(store: &LocalEntryStore, id: EntryId, done: impl Fn(&Entry) -> bool) -> Entry {
    for _ in 0..200 {
        if let Some(entry) = store.get(id).await {
            if done(&entry) {
                return entry;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("entry {} never reached the expected state", id);
}

struct Running {
    engine: SyncEngine,
    store: Arc<LocalEntryStore>,
    transfer: Arc<ManualTransfer>,
    completions_tx: mpsc::UnboundedSender<TransferCompletion>,
}

async fn start_engine(max_attempts: u32) -> Running {
    let store = Arc::new(LocalEntryStore::in_memory());
    let transfer = ManualTransfer::new();
    let (completions_tx, completions) = mpsc::unbounded_channel();

    let engine = SyncEngine::start(EngineParts {
        policy: immediate_policy(max_attempts),
        kv: memory_kv(),
        store: store.clone(),
        remote: ScriptedRemote::new(),
        transfer: transfer.clone(),
        completions,
    })
    .await
    .unwrap();

    Running {
        engine,
        store,
        transfer,
        completions_tx,
    }
}

#[tokio::test]
async fn test_upload_outcomes_flow_back_to_store() {
    let temp = TempDir::new().unwrap();
    let Running {
        engine,
        store,
        transfer,
        completions_tx,
    } = start_engine(1).await;

    let ok = Entry::new(audio_file(temp.path(), "ok.m4a"), 2.0, 16);
    let bad = Entry::new(audio_file(temp.path(), "bad.m4a"), 2.0, 16);
    store.insert(ok.clone()).await.unwrap();
    store.insert(bad.clone()).await.unwrap();

    engine.sync().perform_sync().await.unwrap();
    assert_eq!(transfer.start_count(), 2);

    let ok_item = engine.queue().item_for_entry(ok.id).await.unwrap().id;
    let bad_item = engine.queue().item_for_entry(bad.id).await.unwrap().id;
    completions_tx
        .send(transfer.complete(ok_item, ok_response()))
        .unwrap();
    completions_tx
        .send(transfer.complete(bad_item, transport_error()))
        .unwrap();

    let uploaded = wait_for(&store, ok.id, |e| e.status == EntryStatus::Uploaded).await;
    assert!(uploaded.uploaded);

    let failed = wait_for(&store, bad.id, |e| {
        e.status == EntryStatus::Failed && e.failure_reason.is_some()
    })
    .await;
    assert!(failed.failure_reason.unwrap().contains("connection reset"));

    assert!(!engine.coordinator().has_pending_upload(ok.id).await);
    assert!(!engine.coordinator().has_pending_upload(bad.id).await);

    engine.shutdown();
}

#[tokio::test]
async fn test_wait_until_idle_covers_late_completion() {
    let temp = TempDir::new().unwrap();
    let Running {
        engine,
        store,
        transfer,
        completions_tx,
    } = start_engine(3).await;

    let entry = Entry::new(audio_file(temp.path(), "a.m4a"), 2.0, 16);
    store.insert(entry.clone()).await.unwrap();
    engine.sync().perform_sync().await.unwrap();
    assert!(!engine.is_idle().await);

    let item_id = engine.queue().item_for_entry(entry.id).await.unwrap().id;
    let completion = transfer.complete(item_id, ok_response());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        completions_tx.send(completion).unwrap();
    });

    assert!(engine.wait_until_idle(Duration::from_secs(5)).await);

    // Idle means the outcome already reached the store
    let stored = store.get(entry.id).await.unwrap();
    assert_eq!(stored.status, EntryStatus::Uploaded);
    assert!(stored.uploaded);
    engine.shutdown();
}

#[tokio::test]
async fn test_wait_until_idle_times_out_with_running_transfer() {
    let temp = TempDir::new().unwrap();
    let running = start_engine(3).await;

    let entry = Entry::new(audio_file(temp.path(), "a.m4a"), 2.0, 16);
    running.store.insert(entry.clone()).await.unwrap();
    running.engine.sync().perform_sync().await.unwrap();

    assert!(!running.engine.wait_until_idle(Duration::from_millis(200)).await);
    assert_eq!(running.engine.queue().in_flight_count().await, 1);
    running.engine.shutdown();
}
