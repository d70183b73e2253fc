//! PDF rasterisation: render every page of a PDF to a `DynamicImage`.
//!
//! ── Why spawn_blocking? ──
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! The orchestrator calls [`Rasterizer::rasterize`] from
//! `tokio::task::spawn_blocking` so Tokio worker threads never stall.
//!
//! ── Why cap pixels, not DPI? ──
//!
//! Page sizes vary wildly. Capping the longest edge at `max_pixels` keeps
//! memory bounded and lands in the size range vision models handle well.
//!
//! The splitter sits behind the [`Rasterizer`] trait so the orchestrator can
//! be driven without a pdfium library present.

use crate::error::LayoutError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit pdfium library file or directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Splits a PDF file into page images, in page order.
pub trait Rasterizer: Send + Sync {
    fn rasterize(
        &self,
        pdf_path: &Path,
        password: Option<&str>,
        max_pixels: u32,
    ) -> Result<Vec<DynamicImage>, LayoutError>;
}

/// [`Rasterizer`] backed by a dynamically loaded pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the library at `path` (a file or its directory) before the
    /// usual search locations.
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn candidate_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from));
        if let Some(p) = explicit {
            if p.is_dir() {
                out.push(Pdfium::pdfium_platform_library_name_at_path(&p));
            } else {
                out.push(p);
            }
        }
        for dir in ["./", "/usr/lib", "/usr/local/lib", "/opt/homebrew/lib"] {
            out.push(Pdfium::pdfium_platform_library_name_at_path(dir));
        }
        out
    }

    fn bind(&self) -> Result<Pdfium, LayoutError> {
        let mut last_error = String::from("no candidate locations");
        for path in self.candidate_paths() {
            match Pdfium::bind_to_library(&path) {
                Ok(bindings) => {
                    debug!("Bound pdfium at {}", path.display());
                    return Ok(Pdfium::new(bindings));
                }
                Err(e) => last_error = format!("{}: {:?}", path.display(), e),
            }
        }
        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| LayoutError::PdfiumBindingFailed(format!("{last_error}; system library: {e:?}")))
    }
}

/// Map a pdfium load error onto the fatal error taxonomy.
fn classify_load_error(detail: String, password: Option<&str>) -> LayoutError {
    if detail.to_ascii_lowercase().contains("password") {
        if password.is_some() {
            LayoutError::WrongPassword
        } else {
            LayoutError::PasswordRequired
        }
    } else {
        LayoutError::CorruptPdf { detail }
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf_path: &Path,
        password: Option<&str>,
        max_pixels: u32,
    ) -> Result<Vec<DynamicImage>, LayoutError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, password)
            .map_err(|e| classify_load_error(format!("{:?}", e), password))?;

        let pages = document.pages();
        let total = pages.len() as usize;
        info!("PDF loaded: {} pages", total);

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut images = Vec::with_capacity(total);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| LayoutError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;
            let image = bitmap.as_image();
            debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
            images.push(image);
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_errors_are_classified() {
        assert!(matches!(
            classify_load_error("PdfiumLibraryInternalError(PasswordError)".into(), None),
            LayoutError::PasswordRequired
        ));
        assert!(matches!(
            classify_load_error("PdfiumLibraryInternalError(PasswordError)".into(), Some("x")),
            LayoutError::WrongPassword
        ));
        assert!(matches!(
            classify_load_error("PdfiumLibraryInternalError(FormatError)".into(), None),
            LayoutError::CorruptPdf { .. }
        ));
    }

    #[test]
    fn explicit_library_path_is_tried_first() {
        let r = PdfiumRasterizer::with_library_path("/nonexistent/libpdfium.so");
        let paths = r.candidate_paths();
        assert_eq!(paths[0], PathBuf::from("/nonexistent/libpdfium.so"));
        assert!(paths.len() > 1);
    }

    #[test]
    fn rasterizer_is_object_safe() {
        let _boxed: Box<dyn Rasterizer> = Box::new(PdfiumRasterizer::new());
    }
}
