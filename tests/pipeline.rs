//! Orchestrator tests against a scripted vision client and a stub rasterizer.
//!
//! No network and no pdfium library are needed.

use async_trait::async_trait;
use edgequake_doclayout::{
    AnalysisConfig, AnalysisProgressCallback, BlockKind, DocumentAnalyzer, DocumentInput,
    EncodedPage, JobStatus, LayoutError, PageError, Rasterizer, VisionClient,
};
use image::{DynamicImage, ImageFormat, Luma, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Fakes ────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Regions(&'static str),
    Delayed(u64, &'static str),
    Fail,
    Stall,
}

const ONE_TEXT: &str = r#"[{"type":"text","bbox":[0,0,1000,1000],"text":"body"}]"#;

struct ScriptedClient {
    replies: HashMap<usize, Reply>,
    fallback: Reply,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    finished: Mutex<Vec<usize>>,
}

impl ScriptedClient {
    fn new(fallback: Reply) -> Self {
        Self {
            replies: HashMap::new(),
            fallback,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
        }
    }

    fn on(mut self, page: usize, reply: Reply) -> Self {
        self.replies.insert(page, reply);
        self
    }
}

#[async_trait]
impl VisionClient for ScriptedClient {
    async fn extract_regions(&self, page: &EncodedPage) -> Result<String, PageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let reply = self.replies.get(&page.page_number).cloned().unwrap_or(self.fallback.clone());
        let out = match reply {
            Reply::Regions(body) => {
                // Yield so several pages are in flight together.
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(body.to_string())
            }
            Reply::Delayed(ms, body) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(body.to_string())
            }
            Reply::Fail => Err(PageError::RemoteFailed {
                page: page.page_number,
                attempts: 1,
                detail: "HTTP 503".to_string(),
            }),
            Reply::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("[]".to_string())
            }
        };

        self.finished.lock().unwrap().push(page.page_number);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

struct StubRasterizer {
    pages: Result<Vec<(u32, u32)>, &'static str>,
    seen_path: Mutex<Option<PathBuf>>,
}

impl StubRasterizer {
    fn pages(n: usize) -> Self {
        Self::sized(vec![(200, 100); n])
    }

    fn sized(sizes: Vec<(u32, u32)>) -> Self {
        Self {
            pages: Ok(sizes),
            seen_path: Mutex::new(None),
        }
    }

    fn broken(detail: &'static str) -> Self {
        Self {
            pages: Err(detail),
            seen_path: Mutex::new(None),
        }
    }

    fn workspace_dir(&self) -> PathBuf {
        self.seen_path
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .expect("rasterizer was called")
    }
}

impl Rasterizer for StubRasterizer {
    fn rasterize(
        &self,
        pdf_path: &Path,
        _password: Option<&str>,
        _max_pixels: u32,
    ) -> Result<Vec<DynamicImage>, LayoutError> {
        assert!(pdf_path.exists(), "document must be in the workspace while splitting");
        *self.seen_path.lock().unwrap() = Some(pdf_path.to_path_buf());
        match &self.pages {
            Ok(sizes) => Ok(sizes
                .iter()
                .map(|&(w, h)| DynamicImage::ImageLuma8(image::GrayImage::from_pixel(w, h, Luma([255]))))
                .collect()),
            Err(detail) => Err(LayoutError::CorruptPdf {
                detail: detail.to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct Events {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: Mutex<Vec<usize>>,
    job: Mutex<Option<(usize, usize)>>,
}

impl AnalysisProgressCallback for Events {
    fn on_page_start(&self, _page: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page: usize, _total: usize, _blocks: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, page: usize, _total: usize, _error: &str) {
        self.errors.lock().unwrap().push(page);
    }
    fn on_job_complete(&self, total: usize, success: usize) {
        *self.job.lock().unwrap() = Some((total, success));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn quiet_config() -> AnalysisConfig {
    init_tracing();
    AnalysisConfig::builder()
        .normalize_images(false)
        .normalize_pdf_pages(false)
        .embed_page_images(false)
        .build()
        .unwrap()
}

fn pdf_input() -> DocumentInput {
    DocumentInput::new(b"%PDF-1.4\n% stub\n".to_vec(), "application/pdf")
}

fn analyzer(client: ScriptedClient, rasterizer: Arc<StubRasterizer>, config: AnalysisConfig) -> DocumentAnalyzer {
    DocumentAnalyzer::new(Arc::new(client), config).with_rasterizer(rasterizer)
}

fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

fn page_numbers(result: &edgequake_doclayout::AnalysisResult) -> Vec<usize> {
    result.document.pages.iter().map(|p| p.page_number).collect()
}

// ── Partial failure ──────────────────────────────────────────────────────

#[tokio::test]
async fn failed_middle_page_is_dropped_and_job_succeeds() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT)).on(2, Reply::Fail);
    let raster = Arc::new(StubRasterizer::pages(3));
    let result = assert_ok!(analyzer(client, raster, quiet_config()).analyze(pdf_input()).await);

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(page_numbers(&result), vec![1, 3]);
    assert_eq!(result.stats.total_pages, 3);
    assert_eq!(result.stats.analyzed_pages, 2);
    assert_eq!(result.stats.failed_pages, 1);
    assert_eq!(result.document.text, "body\n\n--- PAGE BREAK ---\n\nbody");
    let tagged: Vec<_> = result.document.visual_elements.iter().map(|v| v.page_number).collect();
    assert_eq!(tagged, vec![1, 3]);
}

#[tokio::test]
async fn unparseable_and_empty_replies_are_page_failures() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT))
        .on(1, Reply::Regions("I could not find any regions, sorry."))
        .on(2, Reply::Regions("   "))
        .on(3, Reply::Regions("[]"));
    let raster = Arc::new(StubRasterizer::pages(3));
    let result = analyzer(client, raster, quiet_config()).analyze(pdf_input()).await.unwrap();

    // An empty array is a valid page with no blocks.
    assert_eq!(page_numbers(&result), vec![3]);
    assert!(result.document.pages[0].blocks.is_empty());
    assert_eq!(result.stats.failed_pages, 2);
}

#[tokio::test]
async fn every_page_failing_still_completes_with_an_empty_document() {
    let client = ScriptedClient::new(Reply::Fail);
    let raster = Arc::new(StubRasterizer::pages(3));
    let result = analyzer(client, raster, quiet_config()).analyze(pdf_input()).await.unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert!(result.document.pages.is_empty());
    assert!(result.document.text.is_empty());
    assert_eq!(result.stats.failed_pages, 3);
    assert_eq!(result.stats.analyzed_pages, 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_page_is_dropped() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT)).on(2, Reply::Stall);
    let raster = Arc::new(StubRasterizer::pages(2));
    let events = Arc::new(Events::default());
    let config = AnalysisConfig::builder()
        .api_timeout_secs(1)
        .normalize_pdf_pages(false)
        .embed_page_images(false)
        .progress_callback(events.clone())
        .build()
        .unwrap();
    let result = analyzer(client, raster, config).analyze(pdf_input()).await.unwrap();

    assert_eq!(page_numbers(&result), vec![1]);
    assert_eq!(*events.errors.lock().unwrap(), vec![2]);
}

// ── Ordering and concurrency ─────────────────────────────────────────────

#[tokio::test]
async fn pages_are_ordered_whatever_order_they_finish_in() {
    let client = Arc::new(
        ScriptedClient::new(Reply::Regions(ONE_TEXT))
            .on(1, Reply::Delayed(150, ONE_TEXT))
            .on(2, Reply::Delayed(75, ONE_TEXT))
            .on(3, Reply::Delayed(0, ONE_TEXT)),
    );
    let raster = Arc::new(StubRasterizer::pages(3));
    let result = DocumentAnalyzer::new(client.clone(), quiet_config())
        .with_rasterizer(raster)
        .analyze(pdf_input())
        .await
        .unwrap();

    assert_eq!(*client.finished.lock().unwrap(), vec![3, 2, 1]);
    assert_eq!(page_numbers(&result), vec![1, 2, 3]);
}

#[tokio::test]
async fn concurrency_is_capped() {
    let client = Arc::new(ScriptedClient::new(Reply::Delayed(20, ONE_TEXT)));
    let raster = Arc::new(StubRasterizer::pages(6));
    let config = AnalysisConfig::builder()
        .concurrency(2)
        .normalize_pdf_pages(false)
        .embed_page_images(false)
        .build()
        .unwrap();
    let result = DocumentAnalyzer::new(client.clone(), config)
        .with_rasterizer(raster)
        .analyze(pdf_input())
        .await
        .unwrap();

    assert_eq!(result.stats.analyzed_pages, 6);
    let max = client.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=2).contains(&max), "max in flight {max}");
}

#[tokio::test]
async fn blocks_come_back_in_reading_order_with_descaled_boxes() {
    const SCRAMBLED: &str = r#"[
        {"type":"text","bbox":[0,500,1000,600],"text":"second row"},
        {"type":"text","bbox":[500,10,1000,40],"text":"right"},
        {"type":"title","bbox":[0,0,400,40],"text":"left"},
        {"type":"table","bbox":[0,800,1000,1000],"text":"a | b","html":"<table></table>"}
    ]"#;
    let client = ScriptedClient::new(Reply::Regions(SCRAMBLED));
    let raster = Arc::new(StubRasterizer::sized(vec![(200, 100)]));
    let result = analyzer(client, raster, quiet_config()).analyze(pdf_input()).await.unwrap();

    let page = &result.document.pages[0];
    let texts: Vec<_> = page.blocks.iter().map(|b| b.text.as_str()).collect();
    assert_eq!(texts, vec!["left", "right", "second row", "a | b"]);
    assert_eq!((page.dimension.width, page.dimension.height), (200, 100));

    let table_box = page.blocks[3].bounding_box.unwrap();
    assert_eq!((table_box.x1(), table_box.y1(), table_box.x2(), table_box.y2()), (0.0, 80.0, 200.0, 100.0));

    assert_eq!(result.document.tables.len(), 1);
    assert_eq!(result.document.tables[0].bounding_box, Some(table_box));
    assert_eq!(result.document.visual_elements[0].kind, BlockKind::Title);
    assert_eq!(result.stats.total_blocks, 4);
}

// ── Fatal split ──────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_pdf_fails_the_job() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT));
    let raster = Arc::new(StubRasterizer::broken("bad xref"));
    let err = assert_err!(analyzer(client, raster, quiet_config()).analyze(pdf_input()).await);
    assert!(matches!(err, LayoutError::CorruptPdf { .. }));
}

#[tokio::test]
async fn zero_pages_fails_the_job() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT));
    let raster = Arc::new(StubRasterizer::pages(0));
    let err = assert_err!(analyzer(client, raster, quiet_config()).analyze(pdf_input()).await);
    assert!(matches!(err, LayoutError::NoPages));
}

#[tokio::test]
async fn undecodable_image_fails_the_job() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT));
    let raster = Arc::new(StubRasterizer::pages(1));
    let input = DocumentInput::new(b"\x89PNG\r\n\x1a\nnot really".to_vec(), "image/png");
    let err = assert_err!(analyzer(client, raster, quiet_config()).analyze(input).await);
    assert!(matches!(err, LayoutError::CorruptImage { .. }));
}

#[tokio::test]
async fn unsupported_content_type_fails_the_job() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT));
    let raster = Arc::new(StubRasterizer::pages(1));
    let input = DocumentInput::new(b"hello".to_vec(), "text/plain");
    let err = assert_err!(analyzer(client, raster, quiet_config()).analyze(input).await);
    assert!(matches!(err, LayoutError::UnsupportedContentType { .. }));
}

// ── Workspace ────────────────────────────────────────────────────────────

#[tokio::test]
async fn workspace_is_removed_after_success() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT));
    let raster = Arc::new(StubRasterizer::pages(2));
    analyzer(client, raster.clone(), quiet_config()).analyze(pdf_input()).await.unwrap();
    assert!(!raster.workspace_dir().exists());
}

#[tokio::test]
async fn workspace_is_removed_after_fatal_error() {
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT));
    let raster = Arc::new(StubRasterizer::broken("truncated"));
    let _ = analyzer(client, raster.clone(), quiet_config()).analyze(pdf_input()).await;
    assert!(!raster.workspace_dir().exists());
}

#[tokio::test]
async fn each_job_gets_its_own_workspace() {
    let raster = Arc::new(StubRasterizer::pages(1));
    let a = analyzer(ScriptedClient::new(Reply::Regions(ONE_TEXT)), raster.clone(), quiet_config());
    a.analyze(pdf_input()).await.unwrap();
    let first = raster.workspace_dir();
    a.analyze(pdf_input()).await.unwrap();
    assert_ne!(first, raster.workspace_dir());
}

// ── Single image ─────────────────────────────────────────────────────────

#[tokio::test]
async fn single_image_is_page_one() {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |x, y| {
        if (20..44).contains(&x) && (22..25).contains(&y) {
            Rgb([0, 0, 0])
        } else {
            Rgb([250, 250, 250])
        }
    }));
    let input = DocumentInput::sniffed(png_bytes(&img)).unwrap();
    assert_eq!(input.content_type, "image/png");

    let config = AnalysisConfig::builder().normalize_images(true).build().unwrap();
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT));
    let raster = Arc::new(StubRasterizer::pages(5));
    let result = analyzer(client, raster.clone(), config).analyze(input).await.unwrap();

    assert_eq!(page_numbers(&result), vec![1]);
    let page = &result.document.pages[0];
    assert_eq!((page.dimension.width, page.dimension.height), (64, 48));
    assert!(page.orientation.abs() <= 45.0);
    assert!(page.image.as_deref().is_some_and(|uri| uri.starts_with("data:image/png;base64,")));
    // The rasterizer is only for PDFs.
    assert!(raster.seen_path.lock().unwrap().is_none());
}

#[tokio::test]
async fn progress_events_cover_every_page() {
    let events = Arc::new(Events::default());
    let config = AnalysisConfig::builder()
        .normalize_pdf_pages(false)
        .embed_page_images(false)
        .progress_callback(events.clone())
        .build()
        .unwrap();
    let client = ScriptedClient::new(Reply::Regions(ONE_TEXT)).on(4, Reply::Fail);
    let raster = Arc::new(StubRasterizer::pages(4));
    analyzer(client, raster, config).analyze(pdf_input()).await.unwrap();

    assert_eq!(events.started.load(Ordering::SeqCst), 4);
    assert_eq!(events.completed.load(Ordering::SeqCst), 3);
    assert_eq!(*events.errors.lock().unwrap(), vec![4]);
    assert_eq!(*events.job.lock().unwrap(), Some((4, 3)));
}

#[tokio::test]
async fn job_ids_are_unique() {
    let raster = Arc::new(StubRasterizer::pages(1));
    let a = analyzer(ScriptedClient::new(Reply::Regions(ONE_TEXT)), raster, quiet_config());
    let first = a.analyze(pdf_input()).await.unwrap();
    let second = a.analyze(pdf_input()).await.unwrap();
    assert_ne!(first.job_id, second.job_id);
}

// ── Logging ──────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn page_events_carry_the_job_span() {
    const ONE_GOOD_ONE_BOXLESS: &str = r#"[
        {"type":"text","bbox":[0,0,1000,1000],"text":"kept"},
        {"type":"text","text":"no box"}
    ]"#;
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let client = ScriptedClient::new(Reply::Regions(ONE_GOOD_ONE_BOXLESS));
    let raster = Arc::new(StubRasterizer::pages(1));
    let config = AnalysisConfig::builder()
        .normalize_pdf_pages(false)
        .embed_page_images(false)
        .build()
        .unwrap();
    let result = assert_ok!(analyzer(client, raster, config).analyze(pdf_input()).await);
    assert_eq!(result.stats.total_blocks, 1);

    let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let warning = text
        .lines()
        .find(|l| l.contains("kept 1/2 regions"))
        .unwrap_or_else(|| panic!("no region warning in:\n{text}"));
    assert!(warning.contains("job{job_id="), "{warning}");
    assert!(warning.contains("page{page=1}"), "{warning}");

    let block_count = text
        .lines()
        .find(|l| l.contains("Page 1: 1 block(s)"))
        .unwrap_or_else(|| panic!("no block count in:\n{text}"));
    assert!(block_count.contains("job{job_id="), "{block_count}");
}
