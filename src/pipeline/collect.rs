//! Per-page resolution escalation, format filtering and row aggregation.
//!
//! ## Escalation
//!
//! Each page is rendered at the cheapest resolution first. The ladder stops
//! at the first resolution whose decoder output is non-empty, before any
//! format filtering: a page that only holds a QR code is "done" at 300 DPI
//! even when the job keeps Aztec symbols only. Rendering and decoding cost
//! grow with pixel count, and most legible codes resolve at the low setting.

use crate::job::ExtractionRow;
use crate::pipeline::decode::{DecodeResult, DecoderChain};
use crate::pipeline::load::PageSource;
use tracing::{debug, warn};

/// Symbology kept when the Aztec-only filter is on.
pub const AZTEC: &str = "AZTEC";

/// Render page `index` at increasing scales until the chain finds a symbol.
///
/// A render failure at one scale is logged and treated like "nothing found"
/// at that scale. Returns an empty vector when no scale produced a symbol.
pub fn scan_page<D: PageSource + ?Sized>(
    document: &D,
    index: usize,
    scales: &[f32],
    chain: &DecoderChain,
) -> Vec<DecodeResult> {
    for &scale in scales {
        let image = match document.render_page(index, scale) {
            Ok(image) => image,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        let found = chain.decode(&image);
        if !found.is_empty() {
            debug!(
                "Page {}: {} symbol(s) at scale {:.2}",
                index + 1,
                found.len(),
                scale
            );
            return found;
        }
    }
    debug!("Page {}: no symbols at any resolution", index + 1);
    Vec::new()
}

/// Keeps or drops decode results by symbology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatFilter {
    only_aztec: bool,
}

impl FormatFilter {
    pub fn new(only_aztec: bool) -> Self {
        Self { only_aztec }
    }

    pub fn accepts(&self, result: &DecodeResult) -> bool {
        !self.only_aztec || result.format.eq_ignore_ascii_case(AZTEC)
    }
}

/// Accumulates accepted results of one document in page order.
#[derive(Debug)]
pub struct ResultAggregator {
    file: String,
    filter: FormatFilter,
    rows: Vec<ExtractionRow>,
}

impl ResultAggregator {
    pub fn new(file: impl Into<String>, filter: FormatFilter) -> Self {
        Self {
            file: file.into(),
            filter,
            rows: Vec::new(),
        }
    }

    /// Append the accepted results of 1-based page `page`, in decoder order.
    pub fn push_page(&mut self, page: usize, results: Vec<DecodeResult>) {
        let file = &self.file;
        let filter = self.filter;
        self.rows.extend(
            results
                .into_iter()
                .filter(|r| filter.accepts(r))
                .map(|r| ExtractionRow {
                    file: file.clone(),
                    page,
                    format: r.format,
                    text: r.text,
                }),
        );
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<ExtractionRow> {
        self.rows
    }
}
