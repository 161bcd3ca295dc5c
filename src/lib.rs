//! # aztec-reader
//!
//! Extract Aztec barcodes (and, optionally, every other 2D/1D symbology) from
//! scanned PDF documents, one background job per document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Load     open via pdfium, reject documents over the page ceiling
//!  ├─ 2. Render   rasterise each page to grayscale (CPU-bound, spawn_blocking)
//!  ├─ 3. Decode   rxing in-process, external ZXing process as fallback
//!  │              300 DPI first, 400 DPI only when nothing was found
//!  ├─ 4. Filter   keep AZTEC only (case-insensitive) unless disabled
//!  └─ 5. Collect  {file, page, format, text} rows + progress per page
//! ```
//!
//! Jobs run on a [`JobQueue`] with a bounded worker pool and a wall-clock
//! timeout. Each job owns its staged input file and deletes it on every exit
//! path.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aztec_reader::{ExtractionConfig, Extractor, JobQueue, ServiceLimits};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let limits = ServiceLimits::default();
//!     let extractor = Arc::new(Extractor::new(ExtractionConfig::default()));
//!     let queue = JobQueue::new(extractor.clone(), 2, limits.job_timeout());
//!
//!     let staged = aztec_reader::upload::stage_upload(
//!         std::path::Path::new("ticket.pdf"),
//!         &std::env::temp_dir(),
//!         limits.max_file_size_bytes(),
//!     )?;
//!     let job = queue.enqueue(extractor.job_args(&staged.path, staged.original_name));
//!     let snapshot = job.wait().await;
//!     println!("{}", serde_json::to_string_pretty(&snapshot)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `aztec-reader` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! aztec-reader = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DecoderTool, ExtractionConfig, ExtractionConfigBuilder, PipelineConfig, ServiceLimits};
pub use error::{DecodeError, ExtractError, PageError, QueueError, UploadError};
pub use export::{ExportError, ExportFormat};
pub use extract::{extract, Extractor};
pub use job::{ExtractionRow, JobArgs, JobId, JobMeta, JobSnapshot, JobStatus, Progress};
pub use pipeline::decode::{BarcodeDecoder, DecodeResult, DecoderChain};
pub use progress::{NoopProgressSink, ProgressReporter, ProgressSink};
pub use queue::{JobHandle, JobQueue, JobRunner};
