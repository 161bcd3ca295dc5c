//! In-process job queue.
//!
//! [`JobQueue`] is built once at start-up and handed to whoever submits
//! work. Each submitted job gets a [`JobHandle`]: the only writer of the
//! job's status and, through [`ProgressSink`], the target of the
//! pipeline's metadata commits.
//!
//! ## Lifecycle
//!
//! ```text
//! queued ──▶ started ──▶ finished
//!    │          │
//!    └──────────┴──────▶ failed
//! ```
//!
//! Transitions never move backwards. Once a job is terminal, further status
//! changes and metadata writes are dropped: a timed-out job's pipeline may
//! keep running on its blocking thread, and whatever it publishes later is
//! ignored.
//!
//! ## Workers
//!
//! A semaphore caps how many jobs run at once. Each running job occupies one
//! blocking thread for the whole document.
//!
//! ## Retention
//!
//! Terminal jobs stay fetchable for [`DEFAULT_RETENTION`] (see
//! [`JobQueue::with_retention`]) and are evicted on the next `enqueue` or
//! `fetch` after that. Handles already held keep working.

use crate::error::{ExtractError, QueueError};
use crate::extract::{remove_input, Extractor};
use crate::job::{ExtractionRow, JobArgs, JobId, JobMeta, JobSnapshot, JobStatus, Progress};
use crate::progress::ProgressSink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

/// How long a finished or failed job stays in the table.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(500);

/// Executes one job synchronously on a blocking thread.
pub trait JobRunner: Send + Sync + 'static {
    fn run(
        &self,
        args: &JobArgs,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ExtractionRow>, ExtractError>;
}

impl JobRunner for Extractor {
    fn run(
        &self,
        args: &JobArgs,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ExtractionRow>, ExtractError> {
        self.run_blocking(args, sink)
    }
}

/// State shared between a job's handles and its worker task.
struct JobSlot {
    args: JobArgs,
    status: watch::Sender<JobStatus>,
    meta: Mutex<JobMeta>,
    ended_at: OnceLock<Instant>,
}

impl JobSlot {
    fn expired(&self, retention: Duration) -> bool {
        self.ended_at
            .get()
            .is_some_and(|t| t.elapsed() >= retention)
    }
}

type JobTable = Arc<Mutex<HashMap<JobId, Arc<JobSlot>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded pool of extraction workers plus the table of known jobs.
#[derive(Clone)]
pub struct JobQueue {
    runner: Arc<dyn JobRunner>,
    jobs: JobTable,
    workers: Arc<Semaphore>,
    timeout: Duration,
    retention: Duration,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("jobs", &lock(&self.jobs).len())
            .field("idle_workers", &self.workers.available_permits())
            .field("timeout", &self.timeout)
            .field("retention", &self.retention)
            .finish()
    }
}

impl JobQueue {
    /// Create a queue running at most `workers` jobs at once, each bounded
    /// by `timeout` of wall-clock time.
    ///
    /// The external decoder's budget is configured separately on the
    /// runner; build its config with
    /// [`ExtractionConfigBuilder::limits`](crate::config::ExtractionConfigBuilder::limits)
    /// and pass the same limits' [`job_timeout`](crate::ServiceLimits::job_timeout)
    /// here to keep the two equal.
    pub fn new<R: JobRunner>(runner: Arc<R>, workers: usize, timeout: Duration) -> Self {
        let runner: Arc<dyn JobRunner> = runner;
        Self {
            runner,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep terminal jobs fetchable for `retention` instead of
    /// [`DEFAULT_RETENTION`].
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Register a job and schedule it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, args: JobArgs) -> JobHandle {
        self.evict_expired();
        let id = JobId::new();
        let (status, _) = watch::channel(JobStatus::Queued);
        let slot = Arc::new(JobSlot {
            args,
            status,
            meta: Mutex::new(JobMeta {
                progress: Progress::new(0, 0, "Queued"),
                result: None,
                error: None,
            }),
            ended_at: OnceLock::new(),
        });
        lock(&self.jobs).insert(id, Arc::clone(&slot));
        let handle = JobHandle { id, slot };
        info!("Job {} queued: {}", id, handle.args().original_name);

        tokio::spawn(execute(
            Arc::clone(&self.runner),
            handle.clone(),
            Arc::clone(&self.workers),
            self.timeout,
        ));
        handle
    }

    /// Look up a job by its textual id.
    pub fn fetch(&self, id: &str) -> Result<JobHandle, QueueError> {
        self.evict_expired();
        let not_found = || QueueError::NotFound { id: id.to_string() };
        let key: JobId = id.parse().map_err(|_| not_found())?;
        lock(&self.jobs)
            .get(&key)
            .map(|slot| JobHandle {
                id: key,
                slot: Arc::clone(slot),
            })
            .ok_or_else(not_found)
    }

    /// Drop a terminal job from the table. Running or queued jobs stay.
    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        let handle = self.fetch(id)?;
        if !handle.status().is_terminal() {
            return Err(QueueError::NotFinished { id: id.to_string() });
        }
        lock(&self.jobs).remove(&handle.id);
        debug!("Job {} removed", handle.id);
        Ok(())
    }

    fn evict_expired(&self) {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, slot| !slot.expired(self.retention));
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!("Evicted {} expired job(s)", evicted);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Worker body for one job.
async fn execute(
    runner: Arc<dyn JobRunner>,
    handle: JobHandle,
    workers: Arc<Semaphore>,
    timeout: Duration,
) {
    let _permit = match workers.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            handle.fail("Worker pool closed");
            return;
        }
    };
    if !handle.transition(JobStatus::Started) {
        return;
    }
    info!("Job {} started", handle.id());

    let args = handle.args().clone();
    let sink = handle.clone();
    let task = tokio::task::spawn_blocking(move || runner.run(&args, &sink));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(rows))) => {
            info!("Job {} finished: {} row(s)", handle.id(), rows.len());
            handle.finish(rows);
        }
        Ok(Ok(Err(e))) => {
            warn!("Job {} failed: {}", handle.id(), e);
            handle.fail(e.to_string());
        }
        Ok(Err(join)) => {
            warn!("Job {} panicked: {}", handle.id(), join);
            let e = ExtractError::Internal(format!("Extraction task panicked: {}", join));
            handle.fail(e.to_string());
        }
        Err(_) => {
            warn!("Job {} timed out after {:?}", handle.id(), timeout);
            handle.fail(format!("Job exceeded timeout of {}s", timeout.as_secs()));
            remove_input(&handle.args().document_path);
        }
    }
}

/// A reference to one job. Cheap to clone.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    slot: Arc<JobSlot>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn args(&self) -> &JobArgs {
        &self.slot.args
    }

    pub fn status(&self) -> JobStatus {
        *self.slot.status.borrow()
    }

    pub fn meta(&self) -> JobMeta {
        lock(&self.slot.meta).clone()
    }

    /// Status and metadata as one consistent view.
    pub fn snapshot(&self) -> JobSnapshot {
        let meta = lock(&self.slot.meta);
        JobSnapshot::from_meta(self.status(), &meta)
    }

    /// Wait until the job is finished or failed.
    pub async fn wait(&self) -> JobSnapshot {
        let mut rx = self.slot.status.subscribe();
        // The sender lives in `self.slot`, so the channel cannot close here.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.snapshot()
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    fn transition(&self, next: JobStatus) -> bool {
        let _meta = lock(&self.slot.meta);
        self.advance(next)
    }

    /// Caller must hold the metadata lock.
    fn advance(&self, next: JobStatus) -> bool {
        let moved = self.slot.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if !moved {
            debug!("Job {}: ignored transition to {}", self.id, next);
        }
        moved
    }

    fn finish(&self, rows: Vec<ExtractionRow>) {
        let mut meta = lock(&self.slot.meta);
        if self.status().is_terminal() {
            return;
        }
        if meta.result.is_none() {
            meta.result = Some(rows);
        }
        meta.error = None;
        if self.advance(JobStatus::Finished) {
            self.mark_ended();
        }
    }

    /// Fail the job, keeping an error the pipeline already recorded.
    fn fail(&self, message: impl Into<String>) {
        let mut meta = lock(&self.slot.meta);
        if self.status().is_terminal() {
            return;
        }
        if meta.error.is_none() {
            meta.error = Some(message.into());
        }
        meta.result = None;
        if self.advance(JobStatus::Failed) {
            self.mark_ended();
        }
    }

    fn mark_ended(&self) {
        let _ = self.slot.ended_at.set(Instant::now());
    }
}

impl ProgressSink for JobHandle {
    fn save_meta(&self, meta: &JobMeta) {
        let mut current = lock(&self.slot.meta);
        if self.status().is_terminal() {
            debug!("Job {}: dropped metadata write after completion", self.id);
            return;
        }
        *current = meta.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Publishes the usual progress and returns one row per call.
    struct Echo;

    impl JobRunner for Echo {
        fn run(
            &self,
            args: &JobArgs,
            sink: &dyn ProgressSink,
        ) -> Result<Vec<ExtractionRow>, ExtractError> {
            let rows = vec![ExtractionRow {
                file: args.original_name.clone(),
                page: 1,
                format: "AZTEC".into(),
                text: "HELLO".into(),
            }];
            sink.save_meta(&JobMeta {
                progress: Progress::new(1, 1, "Done"),
                result: Some(rows.clone()),
                error: None,
            });
            Ok(rows)
        }
    }

    struct Fails;

    impl JobRunner for Fails {
        fn run(&self, _: &JobArgs, sink: &dyn ProgressSink) -> Result<Vec<ExtractionRow>, ExtractError> {
            let e = ExtractError::PageLimitExceeded {
                pages: 150,
                limit: 120,
            };
            sink.save_meta(&JobMeta {
                progress: Progress::new(0, 0, "Starting"),
                result: None,
                error: Some(e.to_string()),
            });
            Err(e)
        }
    }

    struct Panics;

    impl JobRunner for Panics {
        fn run(&self, _: &JobArgs, _: &dyn ProgressSink) -> Result<Vec<ExtractionRow>, ExtractError> {
            panic!("boom")
        }
    }

    /// Counts concurrently running jobs and remembers the peak.
    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl JobRunner for Gauge {
        fn run(&self, _: &JobArgs, _: &dyn ProgressSink) -> Result<Vec<ExtractionRow>, ExtractError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    struct Slow;

    impl JobRunner for Slow {
        fn run(&self, _: &JobArgs, sink: &dyn ProgressSink) -> Result<Vec<ExtractionRow>, ExtractError> {
            std::thread::sleep(Duration::from_millis(800));
            sink.save_meta(&JobMeta {
                progress: Progress::new(1, 1, "Done"),
                result: Some(vec![]),
                error: None,
            });
            Ok(vec![])
        }
    }

    fn args() -> JobArgs {
        JobArgs::new("/nonexistent/aztec-reader-test.pdf", "doc.pdf")
    }

    #[tokio::test]
    async fn finished_job_exposes_result() {
        let queue = JobQueue::new(Arc::new(Echo), 2, Duration::from_secs(10));
        let job = queue.enqueue(args());

        let snap = job.wait().await;
        assert_eq!(snap.status, JobStatus::Finished);
        assert_eq!(snap.progress, Progress::new(1, 1, "Done"));
        assert_eq!(snap.result.unwrap()[0].text, "HELLO");
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn failed_job_keeps_pipeline_error() {
        let queue = JobQueue::new(Arc::new(Fails), 1, Duration::from_secs(10));
        let snap = queue.enqueue(args()).wait().await;

        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error.unwrap().contains("120"));
        assert!(snap.result.is_none());
    }

    #[tokio::test]
    async fn panicking_job_fails() {
        let queue = JobQueue::new(Arc::new(Panics), 1, Duration::from_secs(10));
        let snap = queue.enqueue(args()).wait().await;

        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn timed_out_job_fails_and_removes_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let queue = JobQueue::new(Arc::new(Slow), 1, Duration::from_millis(100));
        let job = queue.enqueue(JobArgs::new(&path, "slow.pdf"));
        let snap = job.wait().await;

        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error.unwrap().starts_with("Job exceeded timeout of"));
        assert!(!path.exists());

        // The abandoned run completes later; its writes are dropped.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let late = job.snapshot();
        assert_eq!(late.status, JobStatus::Failed);
        assert_ne!(late.progress.note, "Done");
    }

    #[tokio::test]
    async fn fetch_by_id() {
        let queue = JobQueue::new(Arc::new(Echo), 1, Duration::from_secs(10));
        let job = queue.enqueue(args());

        let found = queue.fetch(&job.id().to_string()).unwrap();
        assert_eq!(found.id(), job.id());
        assert_eq!(queue.len(), 1);

        assert!(matches!(
            queue.fetch("not-a-uuid"),
            Err(QueueError::NotFound { .. })
        ));
        assert!(matches!(
            queue.fetch(&JobId::new().to_string()),
            Err(QueueError::NotFound { .. })
        ));
        job.wait().await;
    }

    #[tokio::test]
    async fn expired_jobs_are_evicted() {
        let queue =
            JobQueue::new(Arc::new(Echo), 2, Duration::from_secs(10)).with_retention(Duration::ZERO);
        let jobs: Vec<JobHandle> = (0..5).map(|_| queue.enqueue(args())).collect();
        for job in &jobs {
            job.wait().await;
        }
        assert_eq!(queue.len(), 5);

        let id = jobs[0].id().to_string();
        assert!(matches!(queue.fetch(&id), Err(QueueError::NotFound { .. })));
        assert!(queue.is_empty());
        // Held handles still read their final state.
        assert_eq!(jobs[0].snapshot().status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn unexpired_jobs_stay_fetchable() {
        let queue = JobQueue::new(Arc::new(Echo), 1, Duration::from_secs(10));
        let job = queue.enqueue(args());
        job.wait().await;
        assert!(queue.fetch(&job.id().to_string()).is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn remove_drops_terminal_jobs_only() {
        let queue = JobQueue::new(Arc::new(Slow), 1, Duration::from_secs(10));
        let running = queue.enqueue(args());
        let id = running.id().to_string();
        assert!(matches!(queue.remove(&id), Err(QueueError::NotFinished { .. })));

        running.wait().await;
        queue.remove(&id).unwrap();
        assert!(matches!(queue.fetch(&id), Err(QueueError::NotFound { .. })));
        assert!(matches!(queue.remove(&id), Err(QueueError::NotFound { .. })));
    }

    #[tokio::test]
    async fn worker_count_bounds_concurrency() {
        let gauge = Arc::new(Gauge::default());
        let queue = JobQueue::new(Arc::clone(&gauge), 2, Duration::from_secs(10));
        let jobs: Vec<JobHandle> = (0..6).map(|_| queue.enqueue(args())).collect();
        for job in &jobs {
            assert_eq!(job.wait().await.status, JobStatus::Finished);
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn terminal_state_is_sticky() {
        let queue = JobQueue::new(Arc::new(Echo), 1, Duration::from_secs(10));
        let job = queue.enqueue(args());
        job.wait().await;

        assert!(!job.transition(JobStatus::Started));
        job.fail("late failure");
        job.save_meta(&JobMeta::default());

        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Finished);
        assert_eq!(snap.progress.note, "Done");
    }
}
