//! Remote vision capability: send one page image, get the raw region list back.
//!
//! [`VisionClient`] is the seam between the pipeline and the network. The
//! orchestrator only ever sees `Arc<dyn VisionClient>`; production code uses
//! [`LlmVisionClient`] on top of an `edgequake_llm` provider, tests plug in
//! fakes. Parsing the reply is the page analyser's job, not the client's.
//!
//! ── Retry Strategy ──
//!
//! HTTP 429 / 503 errors are transient and frequent under concurrent load.
//! Exponential backoff (`retry_backoff_ms * 2^attempt`) spreads the retries:
//! with 500 ms base and 2 retries the waits are 500 ms then 1 s. All of it
//! happens inside the per-page timeout the analyser enforces.

use crate::config::AnalysisConfig;
use crate::error::PageError;
use crate::pipeline::encode::EncodedPage;
use crate::prompts::REGION_EXTRACTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Anything that can turn a page image into a region-list reply.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Return the model's raw text answer for `page`.
    async fn extract_regions(&self, page: &EncodedPage) -> Result<String, PageError>;
}

/// [`VisionClient`] backed by an `edgequake_llm` provider.
pub struct LlmVisionClient {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_backoff_ms: u64,
    options: CompletionOptions,
}

impl LlmVisionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            options: build_options(config),
        }
    }
}

/// Build `CompletionOptions` from the analysis config.
fn build_options(config: &AnalysisConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Delay before retry number `attempt` (1-based).
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
}

#[async_trait]
impl VisionClient for LlmVisionClient {
    async fn extract_regions(&self, page: &EncodedPage) -> Result<String, PageError> {
        let start = Instant::now();
        let page_num = page.page_number;
        let messages = vec![ChatMessage::user_with_images(
            REGION_EXTRACTION_PROMPT,
            vec![page.image_data()],
        )];
        let options = &self.options;

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: retry {}/{} after {:?}",
                    page_num, attempt, self.max_retries, backoff
                );
                sleep(backoff).await;
            }

            match self.provider.chat(&messages, Some(options)).await {
                Ok(response) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page_num,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(PageError::RemoteFailed {
            page: page_num,
            attempts: self.max_retries + 1,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}
