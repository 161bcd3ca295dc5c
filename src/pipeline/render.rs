//! Page rasterisation: render one pdfium page to a grayscale image.
//!
//! ## Why grayscale?
//!
//! Barcode decoders binarise their input anyway; colour carries no signal.
//! Converting once here shrinks every buffer the decoders touch to a third
//! of its RGB size (a quarter of RGBA).
//!
//! Rendering is deterministic: the same document, page and scale always
//! produce the same pixels for a given pdfium build.

use crate::error::PageError;
use image::GrayImage;
use pdfium_render::prelude::*;
use tracing::debug;

/// Render page `index` (0-based) of `document` at `scale` × 72 DPI.
pub fn render_page(
    document: &PdfDocument<'_>,
    index: usize,
    scale: f32,
) -> Result<GrayImage, PageError> {
    let page_num = index + 1;
    let page_index = u16::try_from(index).map_err(|_| PageError::RenderFailed {
        page: page_num,
        detail: format!("page index {index} exceeds pdfium's range"),
    })?;

    let page = document
        .pages()
        .get(page_index)
        .map_err(|e| PageError::RenderFailed {
            page: page_num,
            detail: format!("{:?}", e),
        })?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| PageError::RenderFailed {
            page: page_num,
            detail: format!("{:?}", e),
        })?;

    let gray = bitmap.as_image().into_luma8();
    debug!(
        "Rendered page {} at scale {:.2} → {}x{} px",
        page_num,
        scale,
        gray.width(),
        gray.height()
    );

    Ok(gray)
}
