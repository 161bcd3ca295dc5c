//! CLI binary for aztec-reader.
//!
//! A thin shell over the library crate: stages each input file, submits one
//! job per file to an in-process [`JobQueue`], follows the jobs with
//! progress bars and writes the collected rows as JSON or CSV.

use anyhow::{bail, Context, Result};
use aztec_reader::export::{self, ExportFormat};
use aztec_reader::upload::stage_upload;
use aztec_reader::{
    DecoderTool, ExtractionConfig, ExtractionRow, Extractor, JobHandle, JobQueue, JobSnapshot,
    JobStatus, ServiceLimits,
};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Per-job progress bar ─────────────────────────────────────────────────────

/// Follows one job's published progress on an indicatif bar.
struct JobBar {
    bar: ProgressBar,
}

impl JobBar {
    fn new(multi: &MultiProgress, name: &str) -> Self {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>3}/{len:<3} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bar.set_prefix(name.to_string());
        bar.set_message("Queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn update(&self, snapshot: &JobSnapshot) {
        let p = &snapshot.progress;
        if self.bar.length() != Some(p.total as u64) {
            self.bar.set_length(p.total as u64);
        }
        self.bar.set_position(p.done as u64);
        self.bar.set_message(p.note.clone());
    }

    /// Poll `job` until it is terminal, then clear the bar.
    async fn follow(self, job: JobHandle) -> JobSnapshot {
        loop {
            let snapshot = job.snapshot();
            self.update(&snapshot);
            if snapshot.status.is_terminal() {
                self.bar.finish_and_clear();
                return snapshot;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract Aztec codes, JSON on stdout
  aztec-reader tickets.pdf

  # Several files, every symbology, CSV to a file
  aztec-reader --all-formats --format csv -o codes.csv a.pdf b.pdf

  # Use the ZXing command-line reader as a fallback decoder
  aztec-reader --zxing-jar /opt/zxing/javase.jar scan.pdf

  # Show the service limits
  aztec-reader --limits

ENVIRONMENT VARIABLES:
  MAX_FILE_SIZE_MB        Largest accepted input file (default 30)
  MAX_PAGES               Page ceiling per document (default 120)
  JOB_TIMEOUT_SECONDS     Wall-clock budget per job (default 300)
  ZXING_JAR_PATH          ZXing CLI jar used as the fallback decoder
  TMP_DIR                 Scratch directory for staged uploads
  AZTEC_READER_WORKERS    Jobs processed in parallel (default 2)
  PDFIUM_LIB_PATH         Path to an existing libpdfium
"#;

/// Extract Aztec barcodes from PDF documents.
#[derive(Parser, Debug)]
#[command(
    name = "aztec-reader",
    version,
    about = "Extract Aztec barcodes from PDF documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to scan.
    #[arg(required_unless_present = "limits")]
    files: Vec<PathBuf>,

    /// Write results to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Result format.
    #[arg(long, value_enum, default_value = "json")]
    format: FormatArg,

    /// Keep every symbology instead of Aztec codes only.
    #[arg(long)]
    all_formats: bool,

    /// Render resolutions tried per page, lowest first.
    #[arg(long, value_delimiter = ',', default_values_t = [300u32, 400])]
    dpi: Vec<u32>,

    /// Maximum pages per document.
    #[arg(long, env = "MAX_PAGES", default_value_t = 120)]
    max_pages: usize,

    /// Maximum input file size in MB.
    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 30)]
    max_file_size_mb: u64,

    /// Wall-clock timeout per job, in seconds.
    #[arg(long, env = "JOB_TIMEOUT_SECONDS", default_value_t = 300)]
    job_timeout: u64,

    /// ZXing command-line reader jar, run when the built-in decoder finds nothing.
    #[arg(long, env = "ZXING_JAR_PATH")]
    zxing_jar: Option<PathBuf>,

    /// Scratch directory for staged copies and temporary page images.
    #[arg(long, env = "TMP_DIR")]
    tmp_dir: Option<PathBuf>,

    /// Number of documents processed in parallel.
    #[arg(short, long, env = "AZTEC_READER_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print the service limits as JSON and exit.
    #[arg(long)]
    limits: bool,

    /// Disable progress bars.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars replace INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let limits = ServiceLimits {
        max_file_size_mb: cli.max_file_size_mb,
        max_pages: cli.max_pages,
        job_timeout_seconds: cli.job_timeout,
    };

    if cli.limits {
        println!(
            "{}",
            serde_json::to_string_pretty(&limits).context("Failed to serialise limits")?
        );
        return Ok(());
    }

    // ── Build extractor and queue ────────────────────────────────────────
    let config = build_config(&cli, &limits)?;
    let tmp_dir = cli.tmp_dir.clone().unwrap_or_else(std::env::temp_dir);
    let extractor = Arc::new(Extractor::new(config));
    let queue = JobQueue::new(Arc::clone(&extractor), cli.workers, limits.job_timeout());

    // ── Stage and submit ─────────────────────────────────────────────────
    let multi = MultiProgress::new();
    let mut pending = Vec::with_capacity(cli.files.len());
    let mut failures: Vec<(String, String)> = Vec::new();

    for file in &cli.files {
        let staged = match stage_upload(file, &tmp_dir, limits.max_file_size_bytes()) {
            Ok(s) => s,
            Err(e) => {
                failures.push((file.display().to_string(), e.to_string()));
                continue;
            }
        };
        let name = staged.original_name.clone();
        let job = queue.enqueue(extractor.job_args(staged.path, staged.original_name));
        let follower = if show_progress {
            let bar = JobBar::new(&multi, &name);
            tokio::spawn(bar.follow(job))
        } else {
            tokio::spawn(async move { job.wait().await })
        };
        pending.push((name, follower));
    }

    // ── Collect in submission order ──────────────────────────────────────
    let submitted = cli.files.len();
    let (names, followers): (Vec<String>, Vec<_>) = pending.into_iter().unzip();
    let snapshots = futures::future::join_all(followers).await;

    let mut rows: Vec<ExtractionRow> = Vec::new();
    for (name, snapshot) in names.into_iter().zip(snapshots) {
        let snapshot = snapshot.with_context(|| format!("Progress task for {name} panicked"))?;
        match snapshot.status {
            JobStatus::Finished => {
                let found = snapshot.result.unwrap_or_default();
                if !cli.quiet {
                    multi
                        .println(format!(
                            "  {} {}  {}",
                            green("✓"),
                            bold(&name),
                            dim(&format!("{} code(s)", found.len()))
                        ))
                        .ok();
                }
                rows.extend(found);
            }
            _ => failures.push((
                name,
                snapshot.error.unwrap_or_else(|| "Job failed".to_string()),
            )),
        }
    }

    for (name, error) in &failures {
        eprintln!("  {} {}  {}", red("✗"), bold(name), red(error));
    }

    // ── Write results ────────────────────────────────────────────────────
    let format = ExportFormat::from(cli.format);
    let body = export::render(&rows, format).context("Failed to export results")?;
    match cli.output {
        Some(ref path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} row(s)  →  {}",
                    green("✔"),
                    rows.len(),
                    bold(&path.display().to_string())
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(body.as_bytes())
                .context("Failed to write to stdout")?;
            if !body.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if submitted > 0 && failures.len() == submitted {
        bail!("All {} document(s) failed", submitted);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, limits: &ServiceLimits) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .limits(limits)
        .only_aztec(!cli.all_formats)
        .dpi_ladder(cli.dpi.clone());

    if let Some(ref jar) = cli.zxing_jar {
        builder = builder.external_decoder(DecoderTool::zxing_jar(jar));
    }
    if let Some(ref dir) = cli.tmp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }
    builder.build().context("Invalid configuration")
}
