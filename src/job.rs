//! Typed job records shared by the pipeline, the queue and external pollers.
//!
//! Job metadata is a fixed record ([`JobMeta`]) rather than a free-form
//! key/value bag: `progress` is always present, `result` only once the job
//! finished and `error` only once it failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier (UUID v4, rendered as simple hex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Started) | (Queued, Failed) | (Started, Finished) | (Started, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page progress of a running job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub note: String,
}

impl Progress {
    pub fn new(done: usize, total: usize, note: impl Into<String>) -> Self {
        Self {
            done,
            total,
            note: note.into(),
        }
    }
}

/// One accepted decode, scoped to its document and 1-based page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRow {
    pub file: String,
    pub page: usize,
    pub format: String,
    pub text: String,
}

/// The metadata a job publishes while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobMeta {
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<ExtractionRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Arguments of one extraction job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArgs {
    /// Staged document; owned (and deleted) by the job.
    pub document_path: PathBuf,
    /// Name reported in every result row.
    pub original_name: String,
    pub only_aztec: bool,
    pub max_pages: usize,
}

impl JobArgs {
    pub fn new(document_path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self {
            document_path: document_path.into(),
            original_name: original_name.into(),
            only_aztec: true,
            max_pages: 120,
        }
    }

    pub fn only_aztec(mut self, v: bool) -> Self {
        self.only_aztec = v;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.max_pages = n;
        self
    }
}

/// What an external poller sees for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<ExtractionRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Project a job's status and metadata into the polling view.
    pub fn from_meta(status: JobStatus, meta: &JobMeta) -> Self {
        let result = match status {
            JobStatus::Finished => Some(meta.result.clone().unwrap_or_default()),
            _ => None,
        };
        let error = match status {
            JobStatus::Failed => Some(
                meta.error
                    .clone()
                    .unwrap_or_else(|| "Job failed".to_string()),
            ),
            _ => None,
        };
        Self {
            status,
            progress: meta.progress.clone(),
            result,
            error,
        }
    }
}
