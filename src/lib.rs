//! # edgequake-doclayout
//!
//! Layout analysis of scanned documents with Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Scans arrive noisy and slightly rotated, and a vision model returns its
//! regions in whatever order it noticed them. This crate cleans each page up
//! first, asks the model for labelled regions, and puts them back into the
//! order a person would read them, tolerating pages the model fails on.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image / PDF
//!  │
//!  ├─ 1. Input      local file, URL or bytes; job-scoped temp workspace
//!  ├─ 2. Split      one image, or every PDF page via pdfium (spawn_blocking)
//!  ├─ 3. Normalise  non-local-means denoise + minimum-area-rect deskew
//!  ├─ 4. Analyse    concurrent VLM calls, JSON region recovery, box descaling
//!  ├─ 5. Order      row-bucketed top-to-bottom, left-to-right sort
//!  └─ 6. Aggregate  pages by number, text, visual elements, tables, stats
//! ```
//!
//! A page whose analysis fails is dropped; the job still completes. Only a
//! document that cannot be split at all is an error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doclayout::{analyze, AnalysisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let result = analyze("scan.pdf", &config).await?;
//!     for page in &result.document.pages {
//!         println!("page {}: {} blocks", page.page_number, page.blocks.len());
//!     }
//!     eprintln!("{}/{} pages analysed", result.stats.analyzed_pages, result.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Bring your own client
//!
//! The remote capability is the [`VisionClient`] trait. Anything that can
//! answer a page image with a JSON region list plugs into
//! [`DocumentAnalyzer::new`]; tests use canned fakes.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doclayout` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doclayout = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{
    aggregate, analyze, analyze_bytes, analyze_file, analyze_sync, write_result, DocumentAnalyzer,
    JobState,
};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, DEFAULT_PAGE_BREAK};
pub use error::{LayoutError, PageError};
pub use model::{
    AnalysisResult, AnalysisStats, Block, BlockKind, BoundingBox, Dimension, Document, JobStatus,
    Page, Table, TableCell, TableRow, VisualElement,
};
pub use pipeline::encode::EncodedPage;
pub use pipeline::input::{ContentKind, DocumentInput};
pub use pipeline::normalize::{normalize, normalize_with_report, NormalizeOutcome, SkipReason};
pub use pipeline::rasterize::{PdfiumRasterizer, Rasterizer};
pub use pipeline::reading_order::{sort_blocks, DEFAULT_TOLERANCE, PIPELINE_TOLERANCE};
pub use pipeline::vision::{LlmVisionClient, VisionClient};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
