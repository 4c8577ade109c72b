//! Diary entries and their status lifecycle.
//!
//! An entry is created locally when a recording finishes and is tracked until
//! the server reports a transcript (or a failure).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-assigned entry identity. Never reassigned.
pub type EntryId = Uuid;

/// A diary recording tracked end-to-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier assigned at creation
    pub id: EntryId,

    /// When the recording was made
    pub created_at: DateTime<Utc>,

    /// Recording length in seconds
    pub duration_secs: f64,

    /// Audio payload size in bytes
    pub size_bytes: u64,

    /// Local audio file (present only before/during upload)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_file: Option<PathBuf>,

    /// Remote audio reference (present once uploaded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Transcript produced by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Transcript>,

    /// Spoken language, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Current lifecycle status
    pub status: EntryStatus,

    /// Set once the audio is confirmed uploaded
    #[serde(default)]
    pub uploaded: bool,

    /// Human-readable reason for a `failed` status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// Create a new queued entry for a freshly captured recording
    pub fn new(local_file: PathBuf, duration_secs: f64, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            duration_secs,
            size_bytes,
            local_file: Some(local_file),
            remote_url: None,
            transcript: None,
            language: None,
            status: EntryStatus::Queued,
            uploaded: false,
            failure_reason: None,
            updated_at: now,
        }
    }

    /// Set the spoken language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// True if the entry still needs its audio delivered
    pub fn awaits_upload(&self) -> bool {
        !self.uploaded && matches!(self.status, EntryStatus::Queued | EntryStatus::Uploading)
    }

    /// Cleaned transcript text, if any
    pub fn clean_transcript(&self) -> Option<&str> {
        self.transcript
            .as_ref()
            .and_then(|t| t.clean.as_deref())
            .filter(|text| !text.trim().is_empty())
    }
}

/// Raw and cleaned transcript text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean: Option<String>,
}

impl Transcript {
    /// Build a transcript from optional raw/clean parts; `None` when both are absent
    pub fn from_parts(raw: Option<String>, clean: Option<String>) -> Option<Self> {
        if raw.is_none() && clean.is_none() {
            None
        } else {
            Some(Self { raw, clean })
        }
    }
}

/// Entry lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Created locally, not yet handed to the upload queue
    Queued,

    /// Audio is being delivered
    Uploading,

    /// Server has the audio
    Uploaded,

    /// Server is producing the transcript
    #[serde(alias = "processing")]
    Transcribing,

    /// Transcript available
    Transcribed,

    /// Upload or transcription failed
    Failed,
}

impl EntryStatus {
    /// All statuses in lifecycle order
    pub const ALL: [EntryStatus; 6] = [
        EntryStatus::Queued,
        EntryStatus::Uploading,
        EntryStatus::Uploaded,
        EntryStatus::Transcribing,
        EntryStatus::Transcribed,
        EntryStatus::Failed,
    ];

    /// The authoritative transition table. Identity is always allowed.
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        use EntryStatus::*;

        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Queued, Uploading)
                | (Uploading, Uploaded)
                | (Uploading, Failed)
                | (Uploading, Transcribing)
                | (Uploading, Transcribed)
                | (Uploaded, Transcribing)
                | (Uploaded, Transcribed)
                | (Uploaded, Failed)
                | (Transcribing, Transcribed)
                | (Transcribing, Failed)
                | (Failed, Queued)
        )
    }

    /// True once the server holds the audio
    pub fn implies_uploaded(self) -> bool {
        matches!(
            self,
            EntryStatus::Uploaded | EntryStatus::Transcribing | EntryStatus::Transcribed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Queued => "queued",
            EntryStatus::Uploading => "uploading",
            EntryStatus::Uploaded => "uploaded",
            EntryStatus::Transcribing => "transcribing",
            EntryStatus::Transcribed => "transcribed",
            EntryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
