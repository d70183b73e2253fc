//! Image encoding: `DynamicImage` → base64 PNG.
//!
//! The same encoding serves two consumers: the vision request body (as
//! `ImageData` with `detail: "high"` so fine print survives tiling) and the
//! page's embedded `data:image/png;base64,...` rendering in the result.
//! PNG is lossless, which keeps text edges crisp for OCR.

use crate::error::PageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type of every encoded page.
pub const PAGE_MIME: &str = "image/png";

/// A normalised page ready to send for analysis.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// 1-based.
    pub page_number: usize,
    pub png_base64: String,
    /// Pixel width of the encoded image; the scale regions are mapped back to.
    pub width: u32,
    pub height: u32,
}

impl EncodedPage {
    /// `data:image/png;base64,...`
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", PAGE_MIME, self.png_base64)
    }

    /// Attachment for a multimodal chat message.
    pub fn image_data(&self) -> ImageData {
        ImageData::new(self.png_base64.clone(), PAGE_MIME).with_detail("high")
    }
}

/// Encode page `page_number` as a base64 PNG.
pub fn encode_page(page_number: usize, img: &DynamicImage) -> Result<EncodedPage, PageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PageError::EncodeFailed {
            page: page_number,
            detail: e.to_string(),
        })?;

    let png_base64 = STANDARD.encode(&buf);
    debug!("Page {}: encoded image → {} bytes base64", page_number, png_base64.len());

    Ok(EncodedPage {
        page_number,
        png_base64,
        width: img.width(),
        height: img.height(),
    })
}
