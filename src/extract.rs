//! Per-document extraction: the pipeline orchestrator.
//!
//! [`Extractor`] sequences the stages for one job:
//!
//! ```text
//! load ─▶ for each page: progress ─▶ scan (render ─▶ decode, escalating) ─▶ filter
//!      ─▶ aggregate ─▶ progress "Done"
//! ```
//!
//! It owns the job's input document for the duration of the run. The
//! [`InputFile`] guard deletes it on every exit path, including early
//! returns and panics, and deletion is idempotent so a supervisor that
//! gave up on a timed-out job can run the same cleanup safely.
//!
//! Only a document that cannot be opened, exceeds the page ceiling, or a
//! missing pdfium library fail the job. Everything inside the page loop
//! degrades to "no symbols on this page".

use crate::config::{ExtractionConfig, PipelineConfig};
use crate::error::ExtractError;
use crate::job::{ExtractionRow, JobArgs};
use crate::pipeline::collect::{scan_page, FormatFilter, ResultAggregator};
use crate::pipeline::decode::{BarcodeDecoder, DecoderChain, RxingDecoder};
use crate::pipeline::external::ExternalDecoder;
use crate::pipeline::load::{DocumentLoader, PageSource, PdfiumLoader};
use crate::progress::{ProgressReporter, ProgressSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs extraction jobs with one service configuration and decoder chain.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractionConfig,
    chain: DecoderChain,
}

impl Extractor {
    /// Build an extractor with the default decoder chain for `config`:
    /// the in-process `rxing` decoder, then the external tool if configured.
    pub fn new(config: ExtractionConfig) -> Self {
        let chain = default_chain(&config);
        Self { config, chain }
    }

    /// Build an extractor with a caller-supplied decoder chain.
    pub fn with_chain(config: ExtractionConfig, chain: DecoderChain) -> Self {
        Self { config, chain }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn chain(&self) -> &DecoderChain {
        &self.chain
    }

    /// Job arguments for `document_path` using the service defaults.
    pub fn job_args(
        &self,
        document_path: impl Into<PathBuf>,
        original_name: impl Into<String>,
    ) -> JobArgs {
        JobArgs::new(document_path, original_name)
            .only_aztec(self.config.only_aztec)
            .max_pages(self.config.max_pages)
    }

    /// Run one job on the current thread using pdfium.
    ///
    /// Blocks for the whole document; call it from a blocking context
    /// (see [`extract`] for the async wrapper).
    pub fn run_blocking(
        &self,
        args: &JobArgs,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ExtractionRow>, ExtractError> {
        let lib_path = self.config.pdfium_lib_path.clone();
        self.run_with(|| PdfiumLoader::bind(lib_path.as_deref()), args, sink)
    }

    /// Run one job with a loader produced by `bind`.
    ///
    /// `bind` runs after the initial progress record is published and inside
    /// the cleanup scope, so a binding failure still fails the job and still
    /// removes the input document.
    pub fn run_with<L, F>(
        &self,
        bind: F,
        args: &JobArgs,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ExtractionRow>, ExtractError>
    where
        L: DocumentLoader,
        F: FnOnce() -> Result<L, ExtractError>,
    {
        let _input = InputFile::adopt(&args.document_path);
        let start = Instant::now();
        info!(
            "Starting extraction: {} ({})",
            args.original_name,
            args.document_path.display()
        );

        let mut reporter = ProgressReporter::start(sink);
        let outcome = bind().and_then(|loader| self.extract_pages(&loader, args, &mut reporter));

        match outcome {
            Ok(ref rows) => info!(
                "Extraction complete: {}, {} row(s) in {}ms",
                args.original_name,
                rows.len(),
                start.elapsed().as_millis()
            ),
            Err(ref e) => {
                warn!("Extraction failed: {}: {:?}", args.original_name, e);
                reporter.fail(e.to_string());
            }
        }
        outcome
    }

    fn extract_pages<L: DocumentLoader>(
        &self,
        loader: &L,
        args: &JobArgs,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<Vec<ExtractionRow>, ExtractError> {
        let pipeline = PipelineConfig::for_job(&self.config, args);
        let document = loader.load(&args.document_path, pipeline.max_pages)?;
        let total = document.page_count();
        reporter.rendering(total);

        let mut rows = ResultAggregator::new(
            args.original_name.as_str(),
            FormatFilter::new(pipeline.only_aztec),
        );
        for index in 0..total {
            reporter.page(index, total);
            let found = scan_page(&document, index, &pipeline.scales, &self.chain);
            rows.push_page(index + 1, found);
        }
        document.close();

        let rows = rows.into_rows();
        reporter.done(total, rows.clone());
        Ok(rows)
    }
}

/// The in-process decoder, followed by the external tool when configured.
pub fn default_chain(config: &ExtractionConfig) -> DecoderChain {
    let mut chain = DecoderChain::default().push(Arc::new(RxingDecoder));
    if let Some(ref tool) = config.external_decoder {
        let mut external = ExternalDecoder::new(tool.clone(), config.decoder_timeout());
        if let Some(ref dir) = config.temp_dir {
            external = external.with_temp_dir(dir);
        }
        chain = chain.push(Arc::new(external) as Arc<dyn BarcodeDecoder>);
    }
    chain
}

/// Run one job on tokio's blocking pool.
///
/// pdfium and the decoders are CPU-bound and not async-aware, so the whole
/// document is processed inside `spawn_blocking`; pages are handled strictly
/// in order on that one thread.
pub async fn extract(
    extractor: &Arc<Extractor>,
    args: JobArgs,
    sink: Arc<dyn ProgressSink>,
) -> Result<Vec<ExtractionRow>, ExtractError> {
    let extractor = Arc::clone(extractor);
    tokio::task::spawn_blocking(move || extractor.run_blocking(&args, &sink))
        .await
        .map_err(|e| ExtractError::Internal(format!("Extraction task panicked: {}", e)))?
}

// ── Input ownership ──────────────────────────────────────────────────────

/// Scoped ownership of a job's input document: deleted when dropped.
#[derive(Debug)]
pub struct InputFile {
    path: PathBuf,
}

impl InputFile {
    /// Take ownership of the file at `path`.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InputFile {
    fn drop(&mut self) {
        remove_input(&self.path);
    }
}

/// Delete `path` if it exists. Safe to call any number of times.
///
/// Returns `true` when this call removed the file.
pub fn remove_input(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed input {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove input {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, PageError};
    use crate::job::{JobMeta, Progress};
    use crate::pipeline::decode::DecodeResult;
    use image::GrayImage;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // ── Doubles ──────────────────────────────────────────────────────────

    /// Page `i` renders as a 1×1 image whose pixel is `i`.
    struct FakeDoc {
        pages: usize,
        renders: Arc<Mutex<usize>>,
    }

    impl PageSource for FakeDoc {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn render_page(&self, index: usize, _scale: f32) -> Result<GrayImage, PageError> {
            *self.renders.lock().unwrap() += 1;
            Ok(GrayImage::from_pixel(1, 1, image::Luma([index as u8])))
        }
    }

    struct FakeLoader {
        pages: Option<usize>,
        renders: Arc<Mutex<usize>>,
    }

    impl FakeLoader {
        fn with_pages(pages: usize) -> Self {
            Self {
                pages: Some(pages),
                renders: Arc::new(Mutex::new(0)),
            }
        }

        fn corrupt() -> Self {
            Self {
                pages: None,
                renders: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl DocumentLoader for FakeLoader {
        type Document<'a> = FakeDoc;

        fn open<'a>(&'a self, path: &Path) -> Result<FakeDoc, ExtractError> {
            match self.pages {
                Some(pages) => Ok(FakeDoc {
                    pages,
                    renders: Arc::clone(&self.renders),
                }),
                None => Err(ExtractError::DocumentOpen {
                    path: path.to_path_buf(),
                    detail: "FormatError".into(),
                }),
            }
        }
    }

    /// Returns canned results keyed by page index (the pixel value).
    struct PageTable(HashMap<u8, Vec<DecodeResult>>);

    impl BarcodeDecoder for PageTable {
        fn name(&self) -> &str {
            "page-table"
        }

        fn try_decode(&self, image: &GrayImage) -> Result<Vec<DecodeResult>, DecodeError> {
            Ok(self
                .0
                .get(&image.get_pixel(0, 0).0[0])
                .cloned()
                .unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<JobMeta>>);

    impl ProgressSink for RecordingSink {
        fn save_meta(&self, meta: &JobMeta) {
            self.0.lock().unwrap().push(meta.clone());
        }
    }

    impl RecordingSink {
        fn last(&self) -> JobMeta {
            self.0.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn staged_input() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        (dir, path)
    }

    fn extractor_with(table: Vec<(u8, Vec<DecodeResult>)>) -> Extractor {
        let chain = DecoderChain::new(vec![Arc::new(PageTable(table.into_iter().collect()))]);
        Extractor::with_chain(ExtractionConfig::default(), chain)
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[test]
    fn only_page_two_has_aztec() {
        let (_dir, path) = staged_input();
        let extractor = extractor_with(vec![(1, vec![DecodeResult::new("AZTEC", "HELLO")])]);
        let args = JobArgs::new(&path, "doc.pdf");
        let sink = RecordingSink::default();

        let rows = extractor
            .run_with(|| Ok(FakeLoader::with_pages(3)), &args, &sink)
            .unwrap();

        assert_eq!(
            rows,
            vec![ExtractionRow {
                file: "doc.pdf".into(),
                page: 2,
                format: "AZTEC".into(),
                text: "HELLO".into(),
            }]
        );
        let last = sink.last();
        assert_eq!(last.progress, Progress::new(3, 3, "Done"));
        assert_eq!(last.result, Some(rows));
        assert!(!path.exists());
    }

    #[test]
    fn page_limit_fails_before_rendering() {
        let (_dir, path) = staged_input();
        let extractor = extractor_with(vec![]);
        let args = JobArgs::new(&path, "big.pdf").max_pages(120);
        let sink = RecordingSink::default();
        let loader = FakeLoader::with_pages(150);
        let renders = Arc::clone(&loader.renders);

        let err = extractor
            .run_with(move || Ok(loader), &args, &sink)
            .unwrap_err();

        assert!(err.to_string().contains("120"));
        assert_eq!(*renders.lock().unwrap(), 0);
        let last = sink.last();
        assert_eq!(last.progress, Progress::new(0, 0, "Starting"));
        assert!(last.result.is_none());
        assert!(last.error.unwrap().contains("120"));
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_document_fails_and_cleans_up() {
        let (_dir, path) = staged_input();
        let extractor = extractor_with(vec![]);
        let args = JobArgs::new(&path, "bad.pdf");
        let sink = RecordingSink::default();

        let err = extractor
            .run_with(|| Ok(FakeLoader::corrupt()), &args, &sink)
            .unwrap_err();

        assert_eq!(err.to_string(), "Failed to open document");
        assert_eq!(sink.last().error.as_deref(), Some("Failed to open document"));
        assert!(!path.exists());
    }

    #[test]
    fn engine_binding_failure_still_cleans_up() {
        let (_dir, path) = staged_input();
        let extractor = extractor_with(vec![]);
        let args = JobArgs::new(&path, "doc.pdf");

        let err = extractor
            .run_with(
                || -> Result<FakeLoader, ExtractError> {
                    Err(ExtractError::EngineUnavailable("no libpdfium".into()))
                },
                &args,
                &NoopSink,
            )
            .unwrap_err();

        assert!(matches!(err, ExtractError::EngineUnavailable(_)));
        assert!(!path.exists());
    }

    #[test]
    fn pages_without_symbols_still_finish() {
        let (_dir, path) = staged_input();
        let extractor = extractor_with(vec![]);
        let args = JobArgs::new(&path, "empty.pdf");
        let sink = RecordingSink::default();
        let loader = FakeLoader::with_pages(4);
        let renders = Arc::clone(&loader.renders);

        let rows = extractor.run_with(move || Ok(loader), &args, &sink).unwrap();

        assert!(rows.is_empty());
        // Every page escalates through both ladder resolutions.
        assert_eq!(*renders.lock().unwrap(), 8);
        assert_eq!(sink.last().progress, Progress::new(4, 4, "Done"));
    }

    #[test]
    fn unfiltered_job_keeps_every_format() {
        let (_dir, path) = staged_input();
        let extractor = extractor_with(vec![(
            0,
            vec![
                DecodeResult::new("QR_CODE", "q"),
                DecodeResult::new("AZTEC", "a"),
            ],
        )]);
        let args = JobArgs::new(&path, "mixed.pdf").only_aztec(false);

        let rows = extractor
            .run_with(|| Ok(FakeLoader::with_pages(1)), &args, &NoopSink)
            .unwrap();

        let formats: Vec<&str> = rows.iter().map(|r| r.format.as_str()).collect();
        assert_eq!(formats, vec!["QR_CODE", "AZTEC"]);
    }

    #[test]
    fn progress_done_is_monotonic() {
        let (_dir, path) = staged_input();
        let extractor = extractor_with(vec![]);
        let args = JobArgs::new(&path, "doc.pdf");
        let sink = RecordingSink::default();

        extractor
            .run_with(|| Ok(FakeLoader::with_pages(5)), &args, &sink)
            .unwrap();

        let commits = sink.0.lock().unwrap();
        let dones: Vec<usize> = commits.iter().map(|m| m.progress.done).collect();
        assert!(dones.windows(2).all(|w| w[0] <= w[1]), "{dones:?}");
        assert_eq!(commits[2].progress.note, "Page 1/5");
    }

    #[test]
    fn remove_input_is_idempotent() {
        let (_dir, path) = staged_input();
        assert!(remove_input(&path));
        assert!(!remove_input(&path));
        let guard = InputFile::adopt(&path);
        assert_eq!(guard.path(), path.as_path());
        drop(guard);
    }

    #[test]
    fn default_chain_adds_external_decoder_when_configured() {
        let plain = default_chain(&ExtractionConfig::default());
        assert_eq!(plain.len(), 1);

        let config = ExtractionConfig::builder()
            .external_decoder(crate::config::DecoderTool::zxing_jar("/opt/zxing.jar"))
            .build()
            .unwrap();
        assert_eq!(default_chain(&config).len(), 2);
    }

    #[test]
    fn job_args_use_service_defaults() {
        let config = ExtractionConfig::builder()
            .max_pages(10)
            .only_aztec(false)
            .build()
            .unwrap();
        let args = Extractor::new(config).job_args("/tmp/x.pdf", "x.pdf");
        assert_eq!(args.max_pages, 10);
        assert!(!args.only_aztec);
    }

    #[test]
    fn async_entry_point_cleans_up_on_failure() {
        let (_dir, path) = staged_input();
        let extractor = Arc::new(Extractor::new(ExtractionConfig::default()));
        let sink: Arc<dyn ProgressSink> = Arc::new(RecordingSink::default());

        // Without pdfium the bind fails; with it, the stub file fails to open.
        let outcome = tokio_test::block_on(extract(
            &extractor,
            JobArgs::new(&path, "stub.pdf"),
            Arc::clone(&sink),
        ));

        assert!(matches!(
            outcome,
            Err(ExtractError::EngineUnavailable(_)) | Err(ExtractError::DocumentOpen { .. })
        ));
        assert!(!path.exists());
    }

    struct NoopSink;

    impl ProgressSink for NoopSink {
        fn save_meta(&self, _meta: &JobMeta) {}
    }
}
