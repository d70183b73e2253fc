//! Pipeline stages for document layout analysis.
//!
//! Each submodule implements one step. The orchestrator in
//! [`crate::analyze`] wires them together per page.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rasterize ──▶ normalize ──▶ encode ──▶ regions ──▶ reading_order
//! (bytes)    (pdfium)     (denoise,     (base64)   (vision +    (row-bucketed
//!                          deskew)                  parsing)      sort)
//! ```
//!
//! 1. [`input`]    : resolve a path, URL or byte buffer; job workspace
//! 2. [`rasterize`]: split a PDF into page images; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`normalize`]: best-effort denoise and deskew; never fails a page
//! 4. [`encode`]   : PNG-encode and base64-wrap each page
//! 5. [`vision`]   : the remote capability behind a trait; the only stage
//!    with network I/O
//! 6. [`regions`]  : recover the JSON region list and descale boxes
//! 7. [`reading_order`]: deterministic top-to-bottom, left-to-right order

pub mod encode;
pub mod input;
pub mod normalize;
pub mod rasterize;
pub mod reading_order;
pub mod regions;
pub mod vision;
