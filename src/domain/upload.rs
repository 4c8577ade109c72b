//! Upload work items and the events that flow between transfer, queue and
//! coordinator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::entry::EntryId;

/// Identity of one unit of upload work, independent of the entry
pub type ItemId = Uuid;

/// Identity the transfer subsystem assigns to a running task
pub type TaskId = u64;

/// Default content type for diary audio
pub const DEFAULT_AUDIO_CONTENT_TYPE: &str = "audio/m4a";

/// Where an entry's audio should be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDestination {
    /// Pre-authorized upload URL
    pub url: String,

    /// Storage key on the remote side (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,

    /// Content type to send with the body
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    DEFAULT_AUDIO_CONTENT_TYPE.to_string()
}

impl UploadDestination {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            object_key: None,
            content_type: default_content_type(),
        }
    }
}

/// A resident upload item (exists until its audio is confirmed uploaded or it
/// fails terminally)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadItem {
    pub id: ItemId,

    /// Owning entry
    pub entry_id: EntryId,

    /// Local audio file
    pub source: PathBuf,

    pub destination: UploadDestination,

    /// Number of dispatches so far
    pub attempt: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Earliest time the item may be redispatched (`None` = eligible now)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub fn new(entry_id: EntryId, source: PathBuf, destination: UploadDestination) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id,
            source,
            destination,
            attempt: 0,
            last_attempt_at: None,
            next_retry_at: None,
        }
    }

    /// True if the backoff window (if any) has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Transport-level failure of a single transfer attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("source file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("could not start transfer: {0}")]
    Rejected(String),
}

/// Final result of one transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The server answered with this HTTP status
    Response { status: u16 },

    /// No usable response
    Error(TransferError),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Response { status } if (200..=299).contains(status))
    }
}

/// Completion notice from the transfer subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCompletion {
    pub task_id: TaskId,
    pub item_id: ItemId,
    pub outcome: TransferOutcome,
}

/// Reason an item failed terminally
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadFailure {
    #[error("{0}")]
    Transport(#[from] TransferError),

    #[error("server responded with HTTP {0}")]
    HttpStatus(u16),
}

impl UploadFailure {
    /// Derive a failure from a non-success outcome; `None` for 2xx
    pub fn from_outcome(outcome: &TransferOutcome) -> Option<Self> {
        match outcome {
            _ if outcome.is_success() => None,
            TransferOutcome::Response { status } => Some(UploadFailure::HttpStatus(*status)),
            TransferOutcome::Error(err) => Some(UploadFailure::Transport(err.clone())),
        }
    }
}

/// Emitted by the upload queue to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Item was dispatched or scheduled for retry; still resident
    Updated(UploadItem),

    /// Upload confirmed; item removed
    Completed(UploadItem),

    /// Retries exhausted; item removed
    Failed {
        item: UploadItem,
        failure: UploadFailure,
    },
}

/// Entry-centric upload outcome emitted by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadNotification {
    Succeeded { entry_id: EntryId },
    Failed { entry_id: EntryId, reason: String },
}

impl UploadNotification {
    pub fn entry_id(&self) -> EntryId {
        match self {
            Self::Succeeded { entry_id } | Self::Failed { entry_id, .. } => *entry_id,
        }
    }
}
