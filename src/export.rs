//! JSON and CSV renditions of extraction results.
//!
//! JSON is the row array serialised as-is. CSV has a `file,page,format,text`
//! header and is written with the `csv` crate's non-numeric quoting: string
//! fields are double-quoted with embedded quotes doubled, and `page` is
//! written bare. A text value that parses as a number is also written bare.

use crate::job::{ExtractionRow, JobSnapshot, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const CSV_HEADER: &str = "file,page,format,text";

/// Export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unknown format: '{0}'")]
    UnknownFormat(String),

    /// Only finished jobs have a result to export.
    #[error("Job not finished")]
    NotFinished { status: JobStatus },

    #[error("JSON serialisation failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialisation failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Output format for [`render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Pretty-printed JSON array of rows.
pub fn to_json(rows: &[ExtractionRow]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(rows)?)
}

/// CSV with a header line and `\n` line endings.
pub fn to_csv(rows: &[ExtractionRow]) -> Result<String, ExportError> {
    let mut out = Vec::with_capacity(CSV_HEADER.len() + 1 + rows.len() * 48);
    out.extend_from_slice(CSV_HEADER.as_bytes());
    out.push(b'\n');

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::NonNumeric)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Render `rows` in `format`.
pub fn render(rows: &[ExtractionRow], format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => to_json(rows),
        ExportFormat::Csv => to_csv(rows),
    }
}

/// Render a polled job's result; fails unless the job finished.
pub fn render_snapshot(snapshot: &JobSnapshot, format: ExportFormat) -> Result<String, ExportError> {
    match (snapshot.status, snapshot.result.as_deref()) {
        (JobStatus::Finished, Some(rows)) => render(rows, format),
        (JobStatus::Finished, None) => render(&[], format),
        (status, _) => Err(ExportError::NotFinished { status }),
    }
}
