//! Error types for the aztec-reader library.
//!
//! Four error types reflect four distinct failure modes, plus
//! [`QueueError`] for lookups against the in-process job queue:
//!
//! * [`ExtractError`] — **Fatal**: the job cannot proceed at all (the
//!   document cannot be opened, it has too many pages, the rendering engine
//!   is missing). Its `Display` text becomes the failed job's error string.
//!
//! * [`DecodeError`] — **Recoverable**: one decoder attempt on one rendered
//!   image failed (library error, external process crashed or timed out).
//!   Decoders swallow it and report "no symbols" so a single bad page never
//!   aborts the rest of a multi-page document.
//!
//! * [`PageError`] — **Recoverable**: one page could not be rendered at one
//!   resolution.
//!
//! * [`UploadError`] — raised by the submission side before a job exists.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the extraction pipeline.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The input file is missing, unreadable or not a parseable PDF.
    #[error("Failed to open document")]
    DocumentOpen { path: PathBuf, detail: String },

    /// The document has more pages than the configured ceiling.
    #[error("Document exceeds max pages of {limit}")]
    PageLimitExceeded { pages: usize, limit: usize },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    EngineUnavailable(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker panic, runtime construction).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recoverable failure of a single decoder attempt.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The in-process decoder library reported an error other than "nothing found".
    #[error("decoder library error: {0}")]
    Library(String),

    /// The external decoder could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external decoder exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    /// The external decoder ran past its time budget and was killed.
    #[error("'{program}' timed out after {}s", .elapsed.as_secs())]
    Timeout { program: String, elapsed: Duration },

    /// Writing the temporary image or reading process output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the rendered page for the external decoder failed.
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// A non-fatal error for a single page.
///
/// The page loop logs it and treats the affected resolution as "no match".
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },
}

/// Rejection of an upload before a job is created.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Only `.pdf` files are accepted.
    #[error("Only PDF files are supported: '{name}'")]
    UnsupportedExtension { name: String },

    /// The upload is larger than the configured maximum.
    #[error("File exceeds max size of {limit_mb}MB")]
    TooLarge { limit_mb: u64 },

    /// Reading the source or writing the staged copy failed.
    #[error("Failed to stage upload '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Job queue lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// Only finished or failed jobs can be removed.
    #[error("Job not finished: {id}")]
    NotFinished { id: String },
}
