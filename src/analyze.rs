//! Job orchestration: split a document into pages, analyse them concurrently,
//! and assemble one ordered [`Document`].
//!
//! ## Job lifecycle
//!
//! ```text
//! Received ──▶ Split ──▶ PagesDispatched ──▶ Aggregated ──▶ Completed
//!     │          │
//!     └──────────┴──▶ Failed
//! ```
//!
//! Only the split can fail a job. Once pages are dispatched, a failing page
//! is dropped from the aggregate and the job still completes, even when every
//! page fails. [`AnalysisStats`] tells the two empty-document cases apart.
//!
//! ## Per-page unit of work
//!
//! Each page runs as its own Tokio task: normalise and encode on the blocking
//! pool, analyse through the [`VisionClient`] under the per-page timeout, then
//! sort into reading order. At most `min(concurrency, pages)` units run at
//! once and they may finish in any order; pages are re-sorted by number
//! before aggregation.

use crate::config::AnalysisConfig;
use crate::error::{LayoutError, PageError};
use crate::model::{
    AnalysisResult, AnalysisStats, Dimension, Document, JobStatus, Page, Table, VisualElement,
};
use crate::pipeline::encode::encode_page;
use crate::pipeline::input::{resolve_input, ContentKind, DocumentInput, JobWorkspace};
use crate::pipeline::normalize::normalize_with_report;
use crate::pipeline::rasterize::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::reading_order::sort_blocks;
use crate::pipeline::regions::PageAnalyzer;
use crate::pipeline::vision::{LlmVisionClient, VisionClient};
use crate::progress::ProgressCallback;
use chrono::Utc;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

// ── Job state ────────────────────────────────────────────────────────────

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Split,
    PagesDispatched,
    Aggregated,
    Completed,
    Failed,
}

impl JobState {
    /// Whether `self → next` is a permitted transition.
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Received, Split)
                | (Received, Failed)
                | (Split, PagesDispatched)
                | (Split, Failed)
                | (PagesDispatched, Aggregated)
                | (Aggregated, Completed)
        )
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), LayoutError> {
        if !self.can_advance_to(next) {
            return Err(LayoutError::Internal(format!(
                "illegal job transition {self} → {next}"
            )));
        }
        debug!("Job state {} → {}", self, next);
        *self = next;
        Ok(())
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Received => "received",
            JobState::Split => "split",
            JobState::PagesDispatched => "pages_dispatched",
            JobState::Aggregated => "aggregated",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Move to `Failed`, log, and hand the error back for `?`.
fn fail(state: &mut JobState, err: LayoutError) -> LayoutError {
    if let Err(e) = state.advance(JobState::Failed) {
        warn!("{}", e);
    }
    error!("Job failed: {}", err);
    err
}

// ── Analyzer ─────────────────────────────────────────────────────────────

/// Runs analysis jobs against one vision client and rasterizer.
///
/// Cheap to share: clone the `Arc`s, not the analyzer.
pub struct DocumentAnalyzer {
    page_analyzer: Arc<PageAnalyzer>,
    rasterizer: Arc<dyn Rasterizer>,
    config: AnalysisConfig,
}

impl DocumentAnalyzer {
    /// Analyzer using `client` for page analysis and pdfium for PDFs.
    pub fn new(client: Arc<dyn VisionClient>, config: AnalysisConfig) -> Self {
        let timeout = Duration::from_secs(config.api_timeout_secs);
        Self {
            page_analyzer: Arc::new(PageAnalyzer::new(client, timeout)),
            rasterizer: Arc::new(PdfiumRasterizer::new()),
            config,
        }
    }

    /// Replace the PDF splitter.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Analyzer backed by the LLM provider the config resolves to.
    pub async fn from_config(config: AnalysisConfig) -> Result<Self, LayoutError> {
        let provider = resolve_provider(&config).await?;
        let client = Arc::new(LlmVisionClient::new(provider, &config));
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Resolve a path or URL, then analyse it.
    pub async fn analyze_source(
        &self,
        source: &str,
        content_type: Option<&str>,
    ) -> Result<AnalysisResult, LayoutError> {
        let input = resolve_input(source, content_type, self.config.download_timeout_secs).await?;
        self.analyze(input).await
    }

    /// Run one job.
    ///
    /// Returns `Err` only when the document cannot be split into pages.
    pub async fn analyze(&self, input: DocumentInput) -> Result<AnalysisResult, LayoutError> {
        let job_id = Uuid::new_v4();
        let span = info_span!("job", job_id = %job_id);
        self.run_job(job_id, input).instrument(span).await
    }

    async fn run_job(&self, job_id: Uuid, input: DocumentInput) -> Result<AnalysisResult, LayoutError> {
        let start = Instant::now();
        let mut state = JobState::Received;
        info!(
            "Job received: {} bytes, content type '{}'",
            input.bytes.len(),
            input.content_type
        );

        // ── Split ────────────────────────────────────────────────────────
        let kind = input.kind().map_err(|e| fail(&mut state, e))?;
        let workspace = JobWorkspace::new().map_err(|e| fail(&mut state, e))?;
        let images = self
            .split(kind, input, &workspace)
            .await
            .map_err(|e| fail(&mut state, e))?;
        state.advance(JobState::Split)?;

        let total = images.len();
        info!("Split into {} page(s)", total);
        let callback = self.config.progress_callback.clone();
        if let Some(ref cb) = callback {
            cb.on_job_start(total);
        }

        // ── Dispatch ─────────────────────────────────────────────────────
        let normalize = match kind {
            ContentKind::Pdf => self.config.normalize_pdf_pages,
            ContentKind::Image => self.config.normalize_images,
        };
        state.advance(JobState::PagesDispatched)?;
        let outcomes = self.dispatch(images, normalize, callback.clone()).await;

        // ── Aggregate ────────────────────────────────────────────────────
        let mut pages = Vec::with_capacity(total);
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(page) => pages.push(page),
                Err(e) => {
                    failed += 1;
                    warn!("Page {} dropped: {}", e.page(), e);
                }
            }
        }
        let document = aggregate(pages, &self.config.page_break);
        state.advance(JobState::Aggregated)?;

        let stats = AnalysisStats {
            total_pages: total,
            analyzed_pages: document.pages.len(),
            failed_pages: failed,
            total_blocks: document.pages.iter().map(|p| p.blocks.len()).sum(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        if let Some(ref cb) = callback {
            cb.on_job_complete(total, stats.analyzed_pages);
        }
        state.advance(JobState::Completed)?;
        info!(
            "Job completed: {}/{} pages, {} blocks, {}ms",
            stats.analyzed_pages, stats.total_pages, stats.total_blocks, stats.duration_ms
        );

        // The workspace lives until here so the upload outlasts every page task.
        drop(workspace);

        Ok(AnalysisResult {
            job_id,
            status: JobStatus::Completed,
            timestamp: Utc::now(),
            document,
            stats,
        })
    }

    /// Write the upload into the workspace and turn it into page images.
    async fn split(
        &self,
        kind: ContentKind,
        input: DocumentInput,
        workspace: &JobWorkspace,
    ) -> Result<Vec<DynamicImage>, LayoutError> {
        let path = workspace.write_document(&input).await?;
        let images = match kind {
            ContentKind::Pdf => {
                let rasterizer = Arc::clone(&self.rasterizer);
                let password = self.config.password.clone();
                let max_pixels = self.config.max_rendered_pixels;
                let span = Span::current();
                tokio::task::spawn_blocking(move || {
                    let _entered = span.enter();
                    rasterizer.rasterize(&path, password.as_deref(), max_pixels)
                })
                .await
                .map_err(|e| LayoutError::Internal(format!("Rasterise task panicked: {}", e)))??
            }
            ContentKind::Image => {
                let bytes = input.bytes;
                let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
                    .await
                    .map_err(|e| LayoutError::Internal(format!("Decode task panicked: {}", e)))?
                    .map_err(|e| LayoutError::CorruptImage {
                        detail: e.to_string(),
                    })?;
                vec![image]
            }
        };
        if images.is_empty() {
            return Err(LayoutError::NoPages);
        }
        Ok(images)
    }

    /// Run every page's unit of work, at most `effective_concurrency` at once.
    async fn dispatch(
        &self,
        images: Vec<DynamicImage>,
        normalize: bool,
        callback: Option<ProgressCallback>,
    ) -> Vec<Result<Page, PageError>> {
        let total = images.len();
        let width = self.config.effective_concurrency(total);
        debug!("Dispatching {} page(s), {} at a time", total, width);

        let units = images.into_iter().enumerate().map(|(idx, image)| {
            let page_number = idx + 1;
            let unit = PageUnit {
                page_number,
                analyzer: Arc::clone(&self.page_analyzer),
                normalize,
                tolerance: self.config.reading_order_tolerance,
                embed_image: self.config.embed_page_images,
            };
            let callback = callback.clone();
            async move {
                if let Some(ref cb) = callback {
                    cb.on_page_start(page_number, total);
                }
                let task = unit.run(image).instrument(info_span!("page", page = page_number));
                let result = match tokio::spawn(task).await {
                    Ok(result) => result,
                    Err(e) => Err(PageError::TaskAborted {
                        page: page_number,
                        detail: e.to_string(),
                    }),
                };
                if let Some(ref cb) = callback {
                    match &result {
                        Ok(page) => cb.on_page_complete(page_number, total, page.blocks.len()),
                        Err(e) => cb.on_page_error(page_number, total, &e.to_string()),
                    }
                }
                result
            }
        });

        stream::iter(units).buffer_unordered(width).collect().await
    }
}

/// Everything one page task needs, owned so the task is `'static`.
struct PageUnit {
    page_number: usize,
    analyzer: Arc<PageAnalyzer>,
    normalize: bool,
    tolerance: f64,
    embed_image: bool,
}

impl PageUnit {
    async fn run(self, image: DynamicImage) -> Result<Page, PageError> {
        let page_number = self.page_number;
        let normalize = self.normalize;
        let span = Span::current();
        let (encoded, orientation) = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let (image, angle) = if normalize {
                let (image, report) = normalize_with_report(image);
                (image, report.skew_angle.unwrap_or(0.0))
            } else {
                (image, 0.0)
            };
            encode_page(page_number, &image).map(|encoded| (encoded, angle))
        })
        .await
        .map_err(|e| PageError::TaskAborted {
            page: page_number,
            detail: e.to_string(),
        })??;

        let blocks = self.analyzer.analyze(&encoded).await?;
        let blocks = sort_blocks(blocks, self.tolerance);
        debug!("Page {}: {} block(s)", page_number, blocks.len());

        Ok(Page {
            page_number,
            dimension: Dimension::pixels(encoded.width, encoded.height),
            orientation,
            blocks,
            image: self.embed_image.then(|| encoded.data_uri()),
        })
    }
}

// ── Aggregation ──────────────────────────────────────────────────────────

/// Assemble surviving pages into a document.
///
/// Pages are re-sorted by number whatever order they arrive in. Every block
/// becomes a visual element and every table block also becomes a table, in
/// page order and, within a page, in reading order.
pub fn aggregate(mut pages: Vec<Page>, page_break: &str) -> Document {
    pages.sort_by_key(|p| p.page_number);

    let text = pages
        .iter()
        .map(Page::text)
        .collect::<Vec<_>>()
        .join(page_break);

    let mut visual_elements = Vec::new();
    let mut tables = Vec::new();
    for page in &pages {
        for block in &page.blocks {
            let mut attributes: BTreeMap<String, Value> = block
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            attributes.insert("text".to_string(), Value::String(block.text.clone()));
            attributes.insert("page_number".to_string(), Value::from(page.page_number));

            visual_elements.push(VisualElement {
                kind: block.kind.clone(),
                confidence: block.confidence,
                bounding_box: block.bounding_box,
                page_number: page.page_number,
                attributes,
            });

            if block.is_table() {
                tables.push(Table {
                    confidence: block.confidence,
                    bounding_box: block.bounding_box,
                    page_number: page.page_number,
                    header_rows: Vec::new(),
                    body_rows: Vec::new(),
                });
            }
        }
    }

    Document {
        text,
        pages,
        visual_elements,
        tables,
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Analyse a local file or HTTP(S) URL with a provider resolved from `config`.
///
/// # Errors
/// Only fatal errors: unreadable input, unsupported or corrupt document,
/// no pages, or no provider configured. Page failures shrink the document.
pub async fn analyze(source: impl AsRef<str>, config: &AnalysisConfig) -> Result<AnalysisResult, LayoutError> {
    let analyzer = DocumentAnalyzer::from_config(config.clone()).await?;
    analyzer.analyze_source(source.as_ref(), None).await
}

/// Analyse a local file.
pub async fn analyze_file(
    path: impl AsRef<Path>,
    content_type: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, LayoutError> {
    let input = crate::pipeline::input::read_local(path.as_ref(), content_type).await?;
    let analyzer = DocumentAnalyzer::from_config(config.clone()).await?;
    analyzer.analyze(input).await
}

/// Analyse an in-memory document. The content type is sniffed when `None`.
pub async fn analyze_bytes(
    bytes: impl Into<Vec<u8>>,
    content_type: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, LayoutError> {
    let input = DocumentInput::with_declared(bytes.into(), content_type)?;
    let analyzer = DocumentAnalyzer::from_config(config.clone()).await?;
    analyzer.analyze(input).await
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(source: impl AsRef<str>, config: &AnalysisConfig) -> Result<AnalysisResult, LayoutError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| LayoutError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(source, config))
}

/// Write `result` as pretty JSON to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_result(result: &AnalysisResult, path: impl AsRef<Path>) -> Result<(), LayoutError> {
    let path = path.as_ref();
    let write_err = |source| LayoutError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(result)
        .map_err(|e| LayoutError::Internal(format!("Failed to serialise result: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, LayoutError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LayoutError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub async fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, LayoutError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LayoutError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
