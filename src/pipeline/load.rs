//! Document loading: open a PDF and enforce the page ceiling.
//!
//! The orchestrator only sees the [`DocumentLoader`] and [`PageSource`]
//! traits. [`PdfiumLoader`] is the production implementation; tests plug in
//! in-memory documents so the page loop runs without a pdfium binary.
//!
//! ## Why check the page count here?
//!
//! Rendering is the most expensive stage. Rejecting an oversized document
//! right after opening it means no page is ever rasterised for a job that
//! is going to fail anyway.

use crate::error::{ExtractError, PageError};
use crate::pipeline::render;
use image::GrayImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An opened document with indexed page access.
pub trait PageSource {
    /// Total number of pages in the document.
    fn page_count(&self) -> usize;

    /// Render page `index` (0-based) at `scale` × 72 DPI as 8-bit grayscale.
    fn render_page(&self, index: usize, scale: f32) -> Result<GrayImage, PageError>;

    /// Release the document. Dropping has the same effect.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Opens documents from the file system.
pub trait DocumentLoader {
    type Document<'a>: PageSource
    where
        Self: 'a;

    /// Open the document at `path`.
    ///
    /// # Errors
    /// [`ExtractError::DocumentOpen`] when the file is unreadable or malformed.
    fn open<'a>(&'a self, path: &Path) -> Result<Self::Document<'a>, ExtractError>;

    /// Open the document and reject it if it has more than `max_pages` pages.
    ///
    /// # Errors
    /// Everything [`DocumentLoader::open`] returns, plus
    /// [`ExtractError::PageLimitExceeded`]. The document is closed before
    /// the limit error is returned.
    fn load<'a>(
        &'a self,
        path: &Path,
        max_pages: usize,
    ) -> Result<Self::Document<'a>, ExtractError> {
        let document = self.open(path)?;
        let pages = document.page_count();
        if let Err(e) = check_page_limit(pages, max_pages) {
            document.close();
            return Err(e);
        }
        info!("Document loaded: {} pages", pages);
        Ok(document)
    }
}

/// Fail when `pages` exceeds `limit`.
pub fn check_page_limit(pages: usize, limit: usize) -> Result<(), ExtractError> {
    if pages > limit {
        return Err(ExtractError::PageLimitExceeded { pages, limit });
    }
    Ok(())
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Loads PDFs through a bound pdfium library.
///
/// `Pdfium` is not `Send`, so a loader is bound on the worker thread that
/// runs the job and dropped with it. The OS caches the `dlopen`, making
/// repeat binds cheap.
pub struct PdfiumLoader {
    pdfium: Pdfium,
}

impl PdfiumLoader {
    /// Bind to the pdfium shared library.
    ///
    /// Discovery order:
    /// 1. `lib_path` (explicit configuration)
    /// 2. `PDFIUM_LIB_PATH` env var
    /// 3. Alongside the running executable
    /// 4. System library search paths
    pub fn bind(lib_path: Option<&Path>) -> Result<Self, ExtractError> {
        let explicit = lib_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        if let Some(path) = explicit {
            debug!(path = %path.display(), "Loading pdfium from configured path");
            let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
                ExtractError::EngineUnavailable(format!("{}: {:?}", path.display(), e))
            })?;
            return Ok(Self {
                pdfium: Pdfium::new(bindings),
            });
        }

        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let lib = Pdfium::pdfium_platform_library_name_at_path(
                exe_dir.to_string_lossy().as_ref(),
            );
            if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
                debug!(dir = %exe_dir.display(), "Loaded pdfium next to executable");
                return Ok(Self {
                    pdfium: Pdfium::new(bindings),
                });
            }
        }

        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| ExtractError::EngineUnavailable(format!("{:?}", e)))?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }
}

impl DocumentLoader for PdfiumLoader {
    type Document<'a> = PdfiumDocument<'a>;

    fn open<'a>(&'a self, path: &Path) -> Result<PdfiumDocument<'a>, ExtractError> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| ExtractError::DocumentOpen {
                path: path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;
        Ok(PdfiumDocument {
            document,
            path: path.to_path_buf(),
        })
    }
}

/// A PDF opened through pdfium.
pub struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
    path: PathBuf,
}

impl PageSource for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<GrayImage, PageError> {
        render::render_page(&self.document, index, scale)
    }

    fn close(self) {
        debug!("Closing {}", self.path.display());
        drop(self.document);
    }
}
