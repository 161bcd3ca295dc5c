//! Fallback decoder that shells out to an external barcode reader.
//!
//! The rendered page is written to a temporary PNG, the configured tool is
//! run against it with a hard time budget, and its stdout is parsed as one
//! `FORMAT<TAB>TEXT` line per symbol. The temporary file is a
//! [`tempfile::TempPath`], removed when it goes out of scope on every path
//! out of [`ExternalDecoder::try_decode`]: success, non-zero exit, timeout.
//!
//! The child is spawned with `kill_on_drop`, so when the time budget runs
//! out the pending wait is dropped and the process is killed rather than
//! left running in the background.
//!
//! Decoding is called from blocking threads. Under a tokio runtime (the
//! queue's `spawn_blocking` workers) the wait runs on that runtime's handle;
//! otherwise on one process-wide runtime built on first use.

use crate::config::DecoderTool;
use crate::error::DecodeError;
use crate::pipeline::decode::{BarcodeDecoder, DecodeResult};
use image::{GrayImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::debug;

/// Longest stderr excerpt kept in a [`DecodeError::NonZeroExit`].
const STDERR_EXCERPT: usize = 500;

/// Runtime for callers outside any tokio runtime. Never dropped.
static FALLBACK_RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn fallback_runtime() -> Result<&'static Runtime, DecodeError> {
    if let Some(rt) = FALLBACK_RUNTIME.get() {
        return Ok(rt);
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("aztec-reader-external")
        .enable_all()
        .build()?;
    Ok(FALLBACK_RUNTIME.get_or_init(|| rt))
}

/// Decoder variant backed by an external process.
#[derive(Debug, Clone)]
pub struct ExternalDecoder {
    tool: DecoderTool,
    timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl ExternalDecoder {
    pub fn new(tool: DecoderTool, timeout: Duration) -> Self {
        Self {
            tool,
            timeout,
            temp_dir: None,
        }
    }

    /// Write temporary page images under `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn program(&self) -> String {
        self.tool.program.display().to_string()
    }

    /// Run the tool on `input`, waiting at most `self.timeout`.
    fn run(&self, input: &Path) -> Result<Output, DecodeError> {
        let program = self.program();
        let mut cmd = tokio::process::Command::new(&self.tool.program);
        cmd.args(self.tool.args_for(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let wait = wait_with_timeout(cmd, program, self.timeout);
        match Handle::try_current() {
            Ok(handle) => handle.block_on(wait),
            Err(_) => fallback_runtime()?.block_on(wait),
        }
    }
}

async fn wait_with_timeout(
    mut cmd: tokio::process::Command,
    program: String,
    timeout: Duration,
) -> Result<Output, DecodeError> {
    let child = cmd.spawn().map_err(|source| DecodeError::Spawn {
        program: program.clone(),
        source,
    })?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(DecodeError::Timeout {
            program,
            elapsed: timeout,
        }),
    }
}

impl BarcodeDecoder for ExternalDecoder {
    fn name(&self) -> &str {
        "external"
    }

    fn try_decode(&self, image: &GrayImage) -> Result<Vec<DecodeResult>, DecodeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("aztec-page-").suffix(".png");
        let file = match self.temp_dir {
            Some(ref dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let image_path = file.into_temp_path();

        image.save_with_format(&image_path, ImageFormat::Png)?;
        debug!("Running {} on {}", self.program(), image_path.display());

        let output = self.run(&image_path)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecodeError::NonZeroExit {
                program: self.program(),
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(STDERR_EXCERPT).collect(),
            });
        }

        Ok(parse_decoder_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `FORMAT<TAB>TEXT` lines.
///
/// Blank lines and lines without a tab are skipped. Tabs inside the text
/// are preserved; surrounding whitespace is trimmed from both fields.
pub fn parse_decoder_output(stdout: &str) -> Vec<DecodeResult> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (format, text) = line.split_once('\t')?;
            Some(DecodeResult::new(format.trim(), text.trim()))
        })
        .collect()
}
