//! Progress-callback trait for per-page analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the orchestrator dispatches and completes pages.
//!
//! Pages are analysed concurrently, so `on_page_*` methods may be called from
//! several tasks at once and in any page order. Implementations must guard
//! shared state (`Mutex`, atomics).
//!
//! ```rust
//! use edgequake_doclayout::{AnalysisConfig, AnalysisProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl AnalysisProgressCallback for Counter {
//!     fn on_page_complete(&self, _page: usize, _total: usize, _blocks: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes a job.
///
/// All methods default to no-ops.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once after the document has been split into pages.
    fn on_job_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page's unit of work begins.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page was analysed and will appear in the document.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, block_count: usize) {
        let _ = (page_num, total_pages, block_count);
    }

    /// Called when a page was dropped.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every dispatched page has finished.
    fn on_job_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// No-op implementation.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
