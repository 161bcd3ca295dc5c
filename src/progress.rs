//! Progress publication for a running extraction job.
//!
//! The pipeline never talks to a queue or a database directly. It writes
//! its [`JobMeta`] through a [`ProgressSink`], which the host implements:
//! the in-process [`crate::queue::JobHandle`], a terminal progress bar, a
//! database row. Writes are fire-and-forget; no acknowledgement is awaited.
//!
//! [`ProgressReporter`] owns the job's metadata for the duration of one run
//! and is the only writer of `progress`, `result` and `error`.

use crate::job::{ExtractionRow, JobMeta, Progress};
use std::sync::Arc;
use tracing::debug;

/// Receives every metadata commit of a job.
///
/// Implementations must be `Send + Sync`: the pipeline runs on a blocking
/// worker thread while pollers read from other threads.
pub trait ProgressSink: Send + Sync {
    /// Persist the job's current metadata, replacing the previous commit.
    fn save_meta(&self, meta: &JobMeta);
}

/// A sink that drops every update.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn save_meta(&self, _meta: &JobMeta) {}
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn save_meta(&self, meta: &JobMeta) {
        (**self).save_meta(meta)
    }
}

/// Stateful writer of one job's metadata.
pub struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    meta: JobMeta,
}

impl<'a> ProgressReporter<'a> {
    /// Publish the initial `{0, 0, "Starting"}` record.
    pub fn start(sink: &'a dyn ProgressSink) -> Self {
        let reporter = Self {
            sink,
            meta: JobMeta {
                progress: Progress::new(0, 0, "Starting"),
                result: None,
                error: None,
            },
        };
        reporter.commit();
        reporter
    }

    /// The document loaded; `total` pages are about to be processed.
    pub fn rendering(&mut self, total: usize) {
        self.set_progress(Progress::new(0, total, "Rendering"));
    }

    /// Page `index` (0-based) is next; `index` pages are complete.
    pub fn page(&mut self, index: usize, total: usize) {
        self.set_progress(Progress::new(
            index,
            total,
            format!("Page {}/{}", index + 1, total),
        ));
    }

    /// Record the final rows and mark every page complete.
    pub fn done(&mut self, total: usize, rows: Vec<ExtractionRow>) {
        self.meta.result = Some(rows);
        self.meta.error = None;
        self.set_progress(Progress::new(total, total, "Done"));
    }

    /// Record a fatal error. Progress is left where it stopped.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.meta.result = None;
        self.meta.error = Some(message.into());
        self.commit();
    }

    pub fn meta(&self) -> &JobMeta {
        &self.meta
    }

    fn set_progress(&mut self, progress: Progress) {
        debug_assert!(
            progress.done >= self.meta.progress.done,
            "progress must not move backwards"
        );
        debug!(
            "progress {}/{} {}",
            progress.done, progress.total, progress.note
        );
        self.meta.progress = progress;
        self.commit();
    }

    fn commit(&self) {
        self.sink.save_meta(&self.meta);
    }
}
