//! myday - Durable background upload and sync for My Day audio entries
//!
//! Locally recorded entries are uploaded with bounded exponential-backoff
//! retries, and server-side changes (status, transcript) are merged back into
//! the local store.
//!
//! # Architecture
//!
//! Components communicate over channels:
//! - The transfer subsystem reports completions to the `UploadQueue`
//! - The queue reports item events to the `UploadCoordinator`
//! - The coordinator reports entry outcomes to the `SyncService`
//!
//! Resident upload items and the sync cursor are persisted, so a restart
//! resumes where the previous process stopped.
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits and their implementations (entry store, API, HTTP transfer, K/V)
//! - `core`: Backoff, queue, coordinator, sync service, engine wiring
//! - `domain`: Data structures (Entry, UploadItem, events)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register a recording
//! myday record ~/Recordings/today.m4a --duration 42
//!
//! # Upload and reconcile
//! myday sync --wait 60
//!
//! # Inspect state
//! myday status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{
    BackoffPolicy, EngineParts, SyncEngine, SyncError, SyncService, UploadCoordinator, UploadQueue,
};
pub use domain::{Entry, EntryId, EntryStatus, Transcript, UploadItem, UploadNotification};
