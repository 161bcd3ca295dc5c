//! Configuration types for barcode extraction.
//!
//! Service-wide behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Each job then derives an immutable
//! [`PipelineConfig`] from the service config plus its own arguments.
//! [`ServiceLimits`] carries the read-only limits surfaced to clients.

use crate::error::ExtractError;
use crate::job::JobArgs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// PDF points per inch; a scale factor of 1.0 renders at 72 DPI.
pub const POINTS_PER_INCH: f32 = 72.0;

/// Placeholder replaced by the temporary image path in [`DecoderTool::args`].
pub const INPUT_PLACEHOLDER: &str = "{input}";

const MIN_DPI: u32 = 72;
const MAX_DPI: u32 = 1200;

/// Configuration for the extraction service.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use aztec_reader::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_pages(50)
///     .dpi_ladder(vec![200, 300, 400])
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 50);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Default page ceiling for jobs that do not set their own. Default: 120.
    pub max_pages: usize,

    /// Default for the Aztec-only filter. Default: true.
    pub only_aztec: bool,

    /// Render resolutions tried per page, cheapest first. Default: `[300, 400]`.
    ///
    /// Most legible codes resolve at 300 DPI; 400 DPI only runs for pages
    /// where nothing was found at the lower setting.
    pub dpi_ladder: Vec<u32>,

    /// Fallback decoder run as an external process when the in-process
    /// decoder finds nothing. Default: none.
    pub external_decoder: Option<DecoderTool>,

    /// Time budget for one external decoder invocation. Default: 300.
    pub decoder_timeout_secs: u64,

    /// Explicit path to the pdfium shared library. Default: discover.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Directory for temporary page images. Default: the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_pages: 120,
            only_aztec: true,
            dpi_ladder: vec![300, 400],
            external_decoder: None,
            decoder_timeout_secs: 300,
            pdfium_lib_path: None,
            temp_dir: None,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Scale factors matching [`Self::dpi_ladder`].
    pub fn scale_ladder(&self) -> Vec<f32> {
        self.dpi_ladder.iter().map(|&dpi| dpi_to_scale(dpi)).collect()
    }

    pub fn decoder_timeout(&self) -> Duration {
        Duration::from_secs(self.decoder_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn only_aztec(mut self, v: bool) -> Self {
        self.config.only_aztec = v;
        self
    }

    pub fn dpi_ladder(mut self, ladder: Vec<u32>) -> Self {
        self.config.dpi_ladder = ladder;
        self
    }

    pub fn external_decoder(mut self, tool: DecoderTool) -> Self {
        self.config.external_decoder = Some(tool);
        self
    }

    pub fn decoder_timeout_secs(mut self, secs: u64) -> Self {
        self.config.decoder_timeout_secs = secs.max(1);
        self
    }

    /// Take the page ceiling and the external decoder's time budget from
    /// `limits`. The decoder budget equals the job timeout.
    pub fn limits(self, limits: &ServiceLimits) -> Self {
        self.max_pages(limits.max_pages)
            .decoder_timeout_secs(limits.job_timeout_seconds)
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.max_pages == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_pages must be ≥ 1".into(),
            ));
        }
        validate_ladder(&c.dpi_ladder)?;
        if let Some(ref tool) = c.external_decoder {
            if tool.program.as_os_str().is_empty() {
                return Err(ExtractError::InvalidConfig(
                    "external decoder program is empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

fn validate_ladder(ladder: &[u32]) -> Result<(), ExtractError> {
    if ladder.is_empty() {
        return Err(ExtractError::InvalidConfig(
            "DPI ladder must contain at least one resolution".into(),
        ));
    }
    if let Some(&dpi) = ladder.iter().find(|&&d| !(MIN_DPI..=MAX_DPI).contains(&d)) {
        return Err(ExtractError::InvalidConfig(format!(
            "DPI must be {MIN_DPI}–{MAX_DPI}, got {dpi}"
        )));
    }
    if ladder.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ExtractError::InvalidConfig(format!(
            "DPI ladder must be strictly increasing, got {ladder:?}"
        )));
    }
    Ok(())
}

/// Convert a render resolution in DPI to a pdfium page scale factor.
pub fn dpi_to_scale(dpi: u32) -> f32 {
    dpi as f32 / POINTS_PER_INCH
}

/// An external barcode decoder invoked as a child process.
///
/// The process must print one symbol per line as `FORMAT<TAB>TEXT` on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderTool {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments; every [`INPUT_PLACEHOLDER`] token is replaced with the image path.
    pub args: Vec<String>,
}

impl DecoderTool {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The ZXing command-line reader packaged as a runnable jar.
    pub fn zxing_jar(jar: impl AsRef<Path>) -> Self {
        Self::new(
            "java",
            vec![
                "-jar".into(),
                jar.as_ref().to_string_lossy().into_owned(),
                "--try_harder".into(),
                "--input".into(),
                INPUT_PLACEHOLDER.into(),
                "--output".into(),
                "stdout".into(),
            ],
        )
    }

    /// Arguments with the input placeholder substituted.
    pub fn args_for(&self, input: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, &input))
            .collect()
    }
}

/// Immutable per-job pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_pages: usize,
    pub only_aztec: bool,
    /// Page scale factors, ascending.
    pub scales: Vec<f32>,
}

impl PipelineConfig {
    /// Combine service-wide settings with one job's arguments.
    pub fn for_job(config: &ExtractionConfig, args: &JobArgs) -> Self {
        Self {
            max_pages: args.max_pages,
            only_aztec: args.only_aztec,
            scales: config.scale_ladder(),
        }
    }
}

/// Read-only limits surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLimits {
    pub max_file_size_mb: u64,
    pub max_pages: usize,
    pub job_timeout_seconds: u64,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_file_size_mb: 30,
            max_pages: 120,
            job_timeout_seconds: 300,
        }
    }
}

impl ServiceLimits {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }
}
