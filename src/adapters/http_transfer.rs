//! HTTP PUT transfer subsystem.
//!
//! Each upload runs as its own tokio task and reports back through the
//! completion channel. Task ids come from a process-local counter, so after a
//! restart `live_tasks` is empty and every persisted item is orphaned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{TransferRequest, TransferSubsystem, TransferTask};
use crate::domain::{ItemId, TaskId, TransferCompletion, TransferError, TransferOutcome};

/// Default per-attempt request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

struct RunningTask {
    item_id: ItemId,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<TaskId, RunningTask>>>;

/// reqwest-backed transfer subsystem
pub struct HttpTransfer {
    client: reqwest::Client,
    next_task: AtomicU64,
    tasks: TaskMap,
    completions: mpsc::UnboundedSender<TransferCompletion>,
}

impl HttpTransfer {
    /// Create a transfer client whose completions go to `completions`
    pub fn new(
        timeout: Duration,
        completions: mpsc::UnboundedSender<TransferCompletion>,
    ) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::Rejected(e.to_string()))?;

        Ok(Self {
            client,
            next_task: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            completions,
        })
    }
}

async fn put_file(client: &reqwest::Client, request: &TransferRequest) -> TransferOutcome {
    let body = match tokio::fs::read(&request.source).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return TransferOutcome::Error(TransferError::SourceMissing(request.source.clone()));
        }
        Err(e) => return TransferOutcome::Error(TransferError::Transport(e.to_string())),
    };

    let result = client
        .put(&request.destination.url)
        .header(CONTENT_TYPE, request.destination.content_type.as_str())
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) => TransferOutcome::Response {
            status: response.status().as_u16(),
        },
        Err(e) if e.is_timeout() => TransferOutcome::Error(TransferError::Timeout),
        Err(e) => TransferOutcome::Error(TransferError::Transport(e.to_string())),
    }
}

#[async_trait]
impl TransferSubsystem for HttpTransfer {
    async fn live_tasks(&self) -> Vec<TransferTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .map(|(task_id, task)| TransferTask {
                task_id: *task_id,
                item_id: task.item_id,
            })
            .collect()
    }

    async fn start_upload(&self, request: TransferRequest) -> Result<TaskId, TransferError> {
        let task_id = self.next_task.fetch_add(1, Ordering::SeqCst);
        let item_id = request.item_id;

        // Held across spawn so the task cannot deregister before it is registered
        let mut tasks = self.tasks.lock().await;

        let client = self.client.clone();
        let registry = self.tasks.clone();
        let completions = self.completions.clone();
        let handle = tokio::spawn(async move {
            let outcome = put_file(&client, &request).await;
            trace!(task_id, outcome = ?outcome, "Transfer finished");

            registry.lock().await.remove(&task_id);
            let completion = TransferCompletion {
                task_id,
                item_id: request.item_id,
                outcome,
            };
            if completions.send(completion).is_err() {
                debug!(task_id, "Completion receiver dropped");
            }
        });

        tasks.insert(task_id, RunningTask { item_id, handle });
        Ok(task_id)
    }

    async fn cancel(&self, task_id: TaskId) {
        if let Some(task) = self.tasks.lock().await.remove(&task_id) {
            task.handle.abort();
            debug!(task_id, item_id = %task.item_id, "Transfer aborted");
        }
    }
}
