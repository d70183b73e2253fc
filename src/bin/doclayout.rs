//! CLI binary for edgequake-doclayout.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AnalysisConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doclayout::{
    write_result, AnalysisConfig, AnalysisProgressCallback, AnalysisResult, DocumentAnalyzer,
    ProgressCallback, PIPELINE_TOLERANCE,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages finish out
/// of order, so start times are keyed by page number.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_job_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Splitting document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, block_count: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{block_count:>4} blocks")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} page(s) analysed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} page(s) analysed  ({} dropped)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a scan, JSON result on stdout
  doclayout scan.png

  # Analyse a PDF and write the result to a file
  doclayout report.pdf -o report.json

  # Plain text in reading order, pages separated by page breaks
  doclayout report.pdf --format text

  # Skip denoise/deskew for clean digital PDFs
  doclayout --no-normalize-pdf slides.pdf

  # Use a specific provider and model
  doclayout --provider openai --model gpt-4.1 scan.jpg

  # Production logging (JSON lines on stderr)
  doclayout --env prod --no-progress scan.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  DOCLAYOUT_PROVIDER      Same as --provider (openai, anthropic, gemini, ollama)
  DOCLAYOUT_MODEL         Same as --model
  DOCLAYOUT_*             Every other flag, e.g. DOCLAYOUT_CONCURRENCY=4
  EDGEQUAKE_LLM_PROVIDER  Provider used when --provider is not given,
  EDGEQUAKE_MODEL         together with this model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter; overrides --log-level
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// The full analysis result as pretty JSON.
    Json,
    /// Document text only.
    Text,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Environment {
    /// Human-readable logs.
    Dev,
    /// JSON logs.
    Prod,
}

/// Analyse the layout of scanned documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doclayout",
    version,
    about = "Analyse the layout of scanned documents (images and PDFs) using Vision LLMs",
    long_about = "Denoise and deskew every page of a scanned image or PDF, send each page to a \
Vision Language Model for labelled regions, and assemble the results into one document in \
reading order. Pages the model fails on are dropped; the rest are still delivered.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image/PDF path or HTTP/HTTPS URL.
    input: String,

    /// Declared content type (application/pdf, image/png, …). Sniffed when omitted.
    #[arg(long, env = "DOCLAYOUT_CONTENT_TYPE")]
    content_type: Option<String>,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "DOCLAYOUT_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format.
    #[arg(long, env = "DOCLAYOUT_FORMAT", value_enum, default_value = "json")]
    format: OutputFormat,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "DOCLAYOUT_PROVIDER")]
    provider: Option<String>,

    /// Vision model ID (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, env = "DOCLAYOUT_MODEL")]
    model: Option<String>,

    /// Pages analysed at once.
    #[arg(short, long, env = "DOCLAYOUT_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Per-page analysis timeout in seconds, retries included.
    #[arg(long, env = "DOCLAYOUT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Retries per page on transport failure.
    #[arg(long, env = "DOCLAYOUT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Do not denoise/deskew single-image inputs.
    #[arg(long, env = "DOCLAYOUT_NO_NORMALIZE")]
    no_normalize: bool,

    /// Do not denoise/deskew rasterised PDF pages.
    #[arg(long, env = "DOCLAYOUT_NO_NORMALIZE_PDF")]
    no_normalize_pdf: bool,

    /// Reading-order row height in pixels.
    #[arg(long, env = "DOCLAYOUT_TOLERANCE", default_value_t = PIPELINE_TOLERANCE)]
    tolerance: f64,

    /// Omit the base64 page renderings from the result.
    #[arg(long, env = "DOCLAYOUT_NO_PAGE_IMAGES")]
    no_page_images: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOCLAYOUT_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCLAYOUT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "DOCLAYOUT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log formatting: dev (human-readable) or prod (JSON).
    #[arg(long, env = "DOCLAYOUT_ENV", value_enum, default_value = "dev")]
    env: Environment,

    /// Disable progress bar.
    #[arg(long, env = "DOCLAYOUT_NO_PROGRESS")]
    no_progress: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCLAYOUT_QUIET")]
    quiet: bool,
}

fn init_logging(cli: &Cli, show_progress: bool) {
    // With the bar active only errors are logged unless a level was asked for.
    let default_level = if cli.quiet || show_progress { "error" } else { "info" };
    let level = cli.log_level.as_deref().unwrap_or(default_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match cli.env {
        Environment::Dev => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
        Environment::Prod => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
    }
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .concurrency(cli.concurrency)
        .api_timeout_secs(cli.api_timeout)
        .max_retries(cli.max_retries)
        .normalize_images(!cli.no_normalize)
        .normalize_pdf_pages(!cli.no_normalize_pdf)
        .reading_order_tolerance(cli.tolerance)
        .embed_page_images(!cli.no_page_images)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p);
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn render(result: &AnalysisResult, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(result).context("Failed to serialise result")?,
        OutputFormat::Text => result.document.text.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = !cli.quiet && !cli.no_progress;
    init_logging(&cli, show_progress);

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let analyzer = DocumentAnalyzer::from_config(config)
        .await
        .context("Failed to set up the vision provider")?;
    let result = analyzer
        .analyze_source(&cli.input, cli.content_type.as_deref())
        .await
        .context("Analysis failed")?;

    match (&cli.output, cli.format) {
        (Some(path), OutputFormat::Json) => {
            write_result(&result, path).await.context("Failed to write result")?;
        }
        (Some(path), OutputFormat::Text) => {
            tokio::fs::write(path, &result.document.text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        (None, format) => {
            let body = render(&result, format)?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(body.as_bytes()).context("Failed to write to stdout")?;
            if !body.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if !cli.quiet && !show_progress {
        let s = &result.stats;
        eprintln!(
            "Analysed {}/{} pages, {} blocks in {}ms",
            s.analyzed_pages, s.total_pages, s.total_blocks, s.duration_ms
        );
        if s.failed_pages > 0 {
            eprintln!("  {} page(s) dropped", s.failed_pages);
        }
    }
    if !cli.quiet {
        if let Some(ref path) = cli.output {
            eprintln!("{}  {}", green("→"), bold(&path.display().to_string()));
        }
    }

    Ok(())
}
