//! Domain types for the upload and sync engine.
//!
//! This module contains the core data structures:
//! - Entry: a diary recording and its status lifecycle
//! - UploadItem: one unit of in-flight upload work
//! - Events passed between transfer, queue, coordinator and sync service

pub mod entry;
pub mod upload;

// Re-export commonly used types
pub use entry::{Entry, EntryId, EntryStatus, Transcript};
pub use upload::{
    ItemId, QueueEvent, TaskId, TransferCompletion, TransferError, TransferOutcome,
    UploadDestination, UploadFailure, UploadItem, UploadNotification,
};
