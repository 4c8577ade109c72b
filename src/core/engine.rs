//! Wires the upload queue, coordinator and sync service together.
//!
//! ```text
//! transfer ──TransferCompletion──▶ queue ──QueueEvent──▶ coordinator
//!                                                          │
//!                          sync service ◀──UploadNotification
//! ```
//!
//! Each arrow is an unbounded channel drained by a spawned pump task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{EntryStore, KeyValueStore, RemoteSyncService, TransferSubsystem};
use crate::domain::TransferCompletion;

use super::backoff::BackoffPolicy;
use super::coordinator::UploadCoordinator;
use super::queue::UploadQueue;
use super::sync_service::{SyncError, SyncService};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Collaborators the engine is built from
pub struct EngineParts {
    pub policy: BackoffPolicy,
    pub kv: Arc<dyn KeyValueStore>,
    pub store: Arc<dyn EntryStore>,
    pub remote: Arc<dyn RemoteSyncService>,
    pub transfer: Arc<dyn TransferSubsystem>,

    /// Receiving side of the channel handed to `transfer`
    pub completions: mpsc::UnboundedReceiver<TransferCompletion>,
}

/// Running sync engine
pub struct SyncEngine {
    queue: Arc<UploadQueue>,
    coordinator: Arc<UploadCoordinator>,
    sync: Arc<SyncService>,
    pumps: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Open every component and spawn the pumps
    pub async fn start(parts: EngineParts) -> Result<Self, SyncError> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let queue = Arc::new(
            UploadQueue::open(parts.policy, parts.kv.clone(), parts.transfer, queue_tx).await?,
        );
        let coordinator = Arc::new(UploadCoordinator::new(queue.clone()).await);
        let sync = Arc::new(
            SyncService::open(parts.store, parts.remote, coordinator.clone(), parts.kv).await?,
        );

        let pumps = vec![
            tokio::spawn(queue.clone().run(parts.completions)),
            tokio::spawn(coordinator.clone().run(queue_rx, notify_tx)),
            tokio::spawn(sync.clone().run(notify_rx)),
        ];

        info!("Sync engine started");
        Ok(Self {
            queue,
            coordinator,
            sync,
            pumps,
        })
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<UploadCoordinator> {
        &self.coordinator
    }

    pub fn sync(&self) -> &Arc<SyncService> {
        &self.sync
    }

    /// True once no transfer is in flight and every terminal upload outcome
    /// has been applied to the entry store
    pub async fn is_idle(&self) -> bool {
        self.queue.in_flight_count().await == 0
            && self.sync.handled_notification_count() >= self.queue.terminal_event_count()
    }

    /// Wait up to `timeout` for the engine to go idle. Returns false on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let settled = tokio::time::timeout(timeout, async {
            while !self.is_idle().await {
                tokio::time::sleep(IDLE_POLL).await;
            }
        })
        .await
        .is_ok();

        if settled {
            debug!("Sync engine idle");
        } else {
            warn!(
                in_flight = self.queue.in_flight_count().await,
                timeout_secs = timeout.as_secs(),
                "Transfers still running at deadline"
            );
        }
        settled
    }

    /// Stop the pumps. Resident items stay persisted for the next start.
    pub fn shutdown(mut self) {
        self.stop_pumps();
    }

    fn stop_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop_pumps();
    }
}
