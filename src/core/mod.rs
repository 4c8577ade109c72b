//! Core upload and sync logic.
//!
//! This module contains:
//! - Backoff: retry delay policy
//! - ItemStore: durable map of resident upload items
//! - Queue: dispatch, retry classification and startup reconciliation
//! - Coordinator: entry-centric view over the queue
//! - SyncService: serialized upload + reconcile passes
//! - Engine: channel wiring between the above

pub mod backoff;
pub mod coordinator;
pub mod engine;
pub mod item_store;
pub mod queue;
pub mod sync_service;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use coordinator::UploadCoordinator;
pub use engine::{EngineParts, SyncEngine};
pub use item_store::{UploadItemStore, UPLOAD_ITEMS_KEY};
pub use queue::{QueueError, UploadQueue};
pub use sync_service::{SyncError, SyncService, SYNC_CURSOR_KEY};
