//! Pipeline stages for barcode extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the rendering backend or a decoder can be swapped without
//! touching the other stages.
//!
//! ## Data Flow
//!
//! ```text
//! load ──▶ (per page: render ──▶ decode ──▶ collect) ──▶ rows
//! (pdfium)   (grayscale)  (chain)   (filter + aggregate)
//! ```
//!
//! 1. [`load`]     — open the document and enforce the page ceiling
//! 2. [`render`]   — rasterise one page at one scale to 8-bit grayscale
//! 3. [`decode`]   — run the decoder chain; first non-empty decoder wins
//! 4. [`external`] — the external-process fallback decoder
//! 5. [`collect`]  — resolution escalation, Aztec filter, row assembly

pub mod collect;
pub mod decode;
pub mod external;
pub mod load;
pub mod render;
