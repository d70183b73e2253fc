//! Configuration types for document analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. Only the normalisation toggles change what
//! the pipeline computes; everything else bounds how it talks to the remote
//! vision capability or shapes the output.

use crate::error::LayoutError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Page-break delimiter placed between page texts in [`crate::model::Document::text`].
pub const DEFAULT_PAGE_BREAK: &str = "\n\n--- PAGE BREAK ---\n\n";

/// Configuration for one or more analysis jobs.
///
/// # Example
/// ```rust
/// use edgequake_doclayout::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .concurrency(4)
///     .api_timeout_secs(90)
///     .normalize_images(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Maximum pages analysed at once. Default: 8.
    ///
    /// The effective width for a job is `min(concurrency, page_count)`.
    pub concurrency: usize,

    /// Upper bound on one page's remote analysis, retries included. Default: 120.
    pub api_timeout_secs: u64,

    /// Transport retries inside the vision client. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Vision model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// Denoise and deskew single-image inputs. Default: true.
    pub normalize_images: bool,

    /// Denoise and deskew rasterised PDF pages. Default: true.
    pub normalize_pdf_pages: bool,

    /// Row-bucket height in pixels for reading order. Default: 20.
    pub reading_order_tolerance: f64,

    /// Delimiter between page texts. Default: [`DEFAULT_PAGE_BREAK`].
    pub page_break: String,

    /// Attach a PNG data URI of the analysed image to every page. Default: true.
    pub embed_page_images: bool,

    /// Longest rendered page edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            api_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            normalize_images: true,
            normalize_pdf_pages: true,
            reading_order_tolerance: crate::pipeline::reading_order::PIPELINE_TOLERANCE,
            page_break: DEFAULT_PAGE_BREAK.to_string(),
            embed_page_images: true,
            max_rendered_pixels: 2000,
            password: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("concurrency", &self.concurrency)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("normalize_images", &self.normalize_images)
            .field("normalize_pdf_pages", &self.normalize_pdf_pages)
            .field("reading_order_tolerance", &self.reading_order_tolerance)
            .field("embed_page_images", &self.embed_page_images)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of pages to analyse at once for a document of `page_count` pages.
    pub fn effective_concurrency(&self, page_count: usize) -> usize {
        self.concurrency.min(page_count).max(1)
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn normalize_images(mut self, v: bool) -> Self {
        self.config.normalize_images = v;
        self
    }

    pub fn normalize_pdf_pages(mut self, v: bool) -> Self {
        self.config.normalize_pdf_pages = v;
        self
    }

    pub fn reading_order_tolerance(mut self, px: f64) -> Self {
        self.config.reading_order_tolerance = px;
        self
    }

    pub fn page_break(mut self, sep: impl Into<String>) -> Self {
        self.config.page_break = sep.into();
        self
    }

    pub fn embed_page_images(mut self, v: bool) -> Self {
        self.config.embed_page_images = v;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, LayoutError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(LayoutError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(LayoutError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if !c.reading_order_tolerance.is_finite() || c.reading_order_tolerance <= 0.0 {
            return Err(LayoutError::InvalidConfig(format!(
                "Reading-order tolerance must be a positive number of pixels, got {}",
                c.reading_order_tolerance
            )));
        }
        if c.page_break.is_empty() {
            return Err(LayoutError::InvalidConfig(
                "Page break delimiter must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
