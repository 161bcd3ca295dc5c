//! Barcode decoding: a fixed-priority chain of independent decoders.
//!
//! Every decoder implements [`BarcodeDecoder`]. A decoder attempt that fails
//! (library error, crashed helper process, timeout) is not an error for the
//! job: [`BarcodeDecoder::decode`] logs it and reports "no symbols", so the
//! chain simply moves on to the next strategy.
//!
//! ## Chain semantics
//!
//! [`DecoderChain::decode`] returns the output of the **first** decoder that
//! finds anything. Later decoders never run once a symbol is found, and
//! results are not merged across decoders: the in-process decoder is fast,
//! the external one is slow but more tolerant, so it only runs as a fallback.

use crate::error::DecodeError;
use image::GrayImage;
use rxing::{BarcodeFormat, Exceptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// One symbol found on one rendered image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeResult {
    pub format: String,
    pub text: String,
}

impl DecodeResult {
    pub fn new(format: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            text: text.into(),
        }
    }
}

/// A barcode decoding strategy.
pub trait BarcodeDecoder: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Decode every symbol in `image`, reporting failures.
    fn try_decode(&self, image: &GrayImage) -> Result<Vec<DecodeResult>, DecodeError>;

    /// Decode every symbol in `image`; failures yield an empty set.
    fn decode(&self, image: &GrayImage) -> Vec<DecodeResult> {
        match self.try_decode(image) {
            Ok(found) => found,
            Err(e) => {
                warn!("{} decoder failed: {}", self.name(), e);
                Vec::new()
            }
        }
    }
}

/// Ordered fallback sequence of decoders.
#[derive(Clone, Default)]
pub struct DecoderChain {
    decoders: Vec<Arc<dyn BarcodeDecoder>>,
}

impl DecoderChain {
    pub fn new(decoders: Vec<Arc<dyn BarcodeDecoder>>) -> Self {
        Self { decoders }
    }

    /// Append a lower-priority decoder.
    pub fn push(mut self, decoder: Arc<dyn BarcodeDecoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Run decoders in priority order; the first non-empty result wins.
    pub fn decode(&self, image: &GrayImage) -> Vec<DecodeResult> {
        for decoder in &self.decoders {
            let found = decoder.decode(image);
            if !found.is_empty() {
                debug!("{} decoder found {} symbol(s)", decoder.name(), found.len());
                return found;
            }
        }
        Vec::new()
    }
}

impl std::fmt::Debug for DecoderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.decoders.iter().map(|d| d.name().to_string()))
            .finish()
    }
}

/// In-process decoder backed by `rxing` (a Rust port of ZXing).
#[derive(Debug, Clone, Copy, Default)]
pub struct RxingDecoder;

impl BarcodeDecoder for RxingDecoder {
    fn name(&self) -> &str {
        "rxing"
    }

    fn try_decode(&self, image: &GrayImage) -> Result<Vec<DecodeResult>, DecodeError> {
        let (width, height) = image.dimensions();
        match rxing::helpers::detect_multiple_in_luma(image.as_raw().clone(), width, height) {
            Ok(found) => Ok(found
                .iter()
                .map(|r| DecodeResult::new(format_name(r.getBarcodeFormat()), r.getText()))
                .collect()),
            Err(Exceptions::NotFoundException(_)) => Ok(Vec::new()),
            Err(e) => Err(DecodeError::Library(e.to_string())),
        }
    }
}

/// ZXing-style symbology name, e.g. `AZTEC`, `QR_CODE`.
fn format_name(format: &BarcodeFormat) -> String {
    format!("{:?}", format)
}
