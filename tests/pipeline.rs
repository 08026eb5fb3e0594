//! Service-level tests with in-process fakes for the rasteriser and the OCR
//! engine. No pdfium, tesseract or network needed.

use async_trait::async_trait;
use billscan::pipeline::input::ResolvedInput;
use billscan::{
    EngineError, JobId, JobProgressCallback, JobScratch, JobStatus, OcrConfig, OcrConfigBuilder,
    OcrEngine, OcrError, OcrResult, OcrService, PageError, PageImage, PageSequence, Rasterizer,
    SourceFile, SubmitOptions,
};
use futures::stream;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Produces `total_pages` blank pages whose width encodes the document tag
/// (`doc-<tag>.pdf` → width `tag + 1`) and whose height encodes the page
/// (page `n` → height `n + 3`), optionally failing at one page.
struct FakeRasterizer {
    total_pages: usize,
    fail_at: Option<usize>,
}

impl FakeRasterizer {
    fn pages(total_pages: usize) -> Arc<Self> {
        Arc::new(Self {
            total_pages,
            fail_at: None,
        })
    }
}

fn tag_of(input: &ResolvedInput) -> u32 {
    input
        .path()
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("doc-"))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        input: &ResolvedInput,
        page_limit: usize,
        scratch: &JobScratch,
    ) -> Result<PageSequence, OcrError> {
        let width = tag_of(input) + 1;
        let mut items = Vec::new();
        for index in 0..self.total_pages.min(page_limit) {
            if self.fail_at == Some(index) {
                items.push(Err(PageError::RenderFailed {
                    page: index + 1,
                    detail: "damaged page".into(),
                }));
                break;
            }
            let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(width, 4 + index as u32, Luma([200])));
            let temp_file = scratch.persist_page(index, &image).ok();
            items.push(Ok(PageImage {
                index,
                image,
                temp_file,
            }));
        }
        Ok(PageSequence {
            total_pages: self.total_pages,
            pages: Box::pin(stream::iter(items)),
        })
    }
}

/// Records which document each call belongs to and how many overlap.
#[derive(Default)]
struct FakeEngine {
    delay: Duration,
    fail: bool,
    /// Fail only this 1-based page.
    fail_page: Option<u32>,
    /// Documents whose pages hang far past any test deadline.
    slow_tags: Vec<u32>,
    active: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<u32>>,
    /// `start <tag>:<page>` / `end <tag>:<page>` in call order.
    log: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn with_delay(ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(ms),
            ..Default::default()
        })
    }

    fn seen(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn recognize(&self, image: &DynamicImage, _language: &str) -> Result<String, EngineError> {
        let tag = image.width() - 1;
        let page = image.height() - 3;
        self.seen.lock().unwrap().push(tag);
        self.log.lock().unwrap().push(format!("start {tag}:{page}"));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = if self.slow_tags.contains(&tag) {
            Duration::from_secs(10)
        } else {
            self.delay
        };
        tokio::time::sleep(delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("end {tag}:{page}"));
        if self.fail || self.fail_page == Some(page) {
            return Err(EngineError("backend down".into()));
        }
        Ok(format!("Invoice No: INV-{tag:03}\nGrand Total: $1,180.00"))
    }
}

#[derive(Default)]
struct Recorder {
    queued: AtomicUsize,
    started: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl JobProgressCallback for Recorder {
    fn on_job_queued(&self, _: JobId) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.push("queued".into());
    }

    fn on_job_started(&self, _: JobId, _: Duration) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.push("started".into());
    }

    fn on_page_start(&self, _: JobId, page: usize, total: usize) {
        self.push(format!("page_start {page}/{total}"));
    }

    fn on_page_complete(&self, _: JobId, page: usize, total: usize, _: usize) {
        self.push(format!("page {page}/{total}"));
    }

    fn on_job_complete(&self, _: JobId, _: &OcrResult) {
        self.push("complete".into());
    }

    fn on_job_failed(&self, _: JobId, _: &OcrError) {
        self.push("failed".into());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config(root: &Path, capacity: usize) -> OcrConfigBuilder {
    OcrConfig::builder()
        .temp_dir(root.join("scratch"))
        .max_concurrency(capacity)
        .timeout_ms(5_000)
}

fn doc(dir: &Path, tag: u32) -> SourceFile {
    let path = dir.join(format!("doc-{tag}.pdf"));
    std::fs::write(&path, b"%PDF-1.4\n% fixture\n").unwrap();
    SourceFile::new(path, "application/pdf")
}

fn build(
    config: OcrConfigBuilder,
    rasterizer: Arc<FakeRasterizer>,
    engine: Arc<FakeEngine>,
    recorder: Arc<Recorder>,
) -> OcrService {
    OcrService::builder(config.build().unwrap())
        .rasterizer(rasterizer)
        .engine(engine)
        .progress(recorder)
        .build()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached within 2s");
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|e| {
            let p = e.path();
            if p.is_dir() {
                count_files(&p)
            } else {
                1
            }
        })
        .sum()
}

// ── Concurrency gate ─────────────────────────────────────────────────────────

#[tokio::test]
async fn engine_calls_never_exceed_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(30);
    let service = build(
        config(dir.path(), 2),
        FakeRasterizer::pages(2),
        engine.clone(),
        Arc::default(),
    );

    let jobs = (0..6).map(|tag| {
        let service = service.clone();
        let file = doc(dir.path(), tag);
        async move { service.submit(file, SubmitOptions::default()).await }
    });
    let results = futures::future::join_all(jobs).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(engine.seen().len(), 12);
    assert_eq!(service.gate().active(), 0);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn jobs_are_admitted_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(40);
    let recorder = Arc::new(Recorder::default());
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(1),
        engine.clone(),
        recorder.clone(),
    );

    let mut handles = Vec::new();
    for tag in 0..5u32 {
        let service = service.clone();
        let file = doc(dir.path(), tag);
        handles.push(tokio::spawn(async move {
            service.submit(file, SubmitOptions::default()).await
        }));
        let expected = tag as usize + 1;
        wait_until(|| recorder.queued.load(Ordering::SeqCst) == expected).await;
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(engine.seen(), vec![0, 1, 2, 3, 4]);
    assert_eq!(engine.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn queued_job_can_be_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(200);
    let recorder = Arc::new(Recorder::default());
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(1),
        engine.clone(),
        recorder.clone(),
    );

    let first = {
        let service = service.clone();
        let file = doc(dir.path(), 0);
        tokio::spawn(async move { service.submit(file, SubmitOptions::default()).await })
    };
    wait_until(|| recorder.started.load(Ordering::SeqCst) == 1).await;

    let token = CancellationToken::new();
    let second = {
        let service = service.clone();
        let file = doc(dir.path(), 1);
        let token = token.clone();
        tokio::spawn(async move {
            service
                .submit_with_cancel(file, SubmitOptions::default(), &token)
                .await
        })
    };
    wait_until(|| service.metrics().queued == 1).await;
    token.cancel();

    let err = second.await.unwrap().unwrap_err();
    assert!(matches!(err, OcrError::Cancelled { .. }), "got {err:?}");
    assert!(first.await.unwrap().is_ok());
    assert_eq!(engine.seen(), vec![0]);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn dropped_queued_job_leaves_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(150);
    let recorder = Arc::new(Recorder::default());
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(1),
        engine.clone(),
        recorder.clone(),
    );

    let spawn = |tag| {
        let service = service.clone();
        let file = doc(dir.path(), tag);
        tokio::spawn(async move { service.submit(file, SubmitOptions::default()).await })
    };
    let first = spawn(0);
    wait_until(|| recorder.started.load(Ordering::SeqCst) == 1).await;
    let abandoned = spawn(1);
    wait_until(|| recorder.queued.load(Ordering::SeqCst) == 2).await;
    abandoned.abort();
    let _ = abandoned.await;
    let third = spawn(2);

    first.await.unwrap().unwrap();
    third.await.unwrap().unwrap();
    assert_eq!(engine.seen(), vec![0, 2]);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn queue_position_is_taken_on_first_poll() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(100);
    let recorder = Arc::new(Recorder::default());
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(1),
        engine.clone(),
        recorder.clone(),
    );

    let first = {
        let service = service.clone();
        let file = doc(dir.path(), 0);
        tokio::spawn(async move { service.submit(file, SubmitOptions::default()).await })
    };
    wait_until(|| recorder.started.load(Ordering::SeqCst) == 1).await;

    // One poll is enough to validate the input and join the queue.
    let mut second = Box::pin(service.submit(doc(dir.path(), 1), SubmitOptions::default()));
    assert!(futures::poll!(second.as_mut()).is_pending());
    assert_eq!(recorder.queued.load(Ordering::SeqCst), 2);
    assert_eq!(service.metrics().queued, 1);

    let third = {
        let service = service.clone();
        let file = doc(dir.path(), 2);
        tokio::spawn(async move { service.submit(file, SubmitOptions::default()).await })
    };
    wait_until(|| recorder.queued.load(Ordering::SeqCst) == 3).await;

    first.await.unwrap().unwrap();
    second.await.unwrap();
    third.await.unwrap().unwrap();
    assert_eq!(engine.seen(), vec![0, 1, 2]);
}

/// Two uploads at once on a single slot: a 3-page PDF capped at 2 pages,
/// then a second document that waits for the first to finish.
#[tokio::test]
async fn capped_pdf_and_queued_upload_on_one_slot() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(20);
    let service = build(
        config(dir.path(), 1).max_pdf_pages(2),
        FakeRasterizer::pages(3),
        engine.clone(),
        Arc::default(),
    );

    let (a, b) = tokio::join!(
        service.submit(doc(dir.path(), 1), SubmitOptions::default()),
        service.submit(doc(dir.path(), 2), SubmitOptions::default()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(
        engine.log(),
        vec![
            "start 1:1", "end 1:1", "start 1:2", "end 1:2", "start 2:1", "end 2:1", "start 2:2",
            "end 2:2",
        ]
    );
    for result in [&a, &b] {
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.pages_processed, 2);
        assert_eq!(result.total_pages, 3);
        assert!(result.truncated);
    }
    assert!(b.queue_wait_ms >= 20, "waited {}ms", b.queue_wait_ms);
    assert_eq!(engine.peak.load(Ordering::SeqCst), 1);
}

/// One job more than the gate admits: the two hung jobs time out and the
/// queued one still gets its full budget once a slot frees.
#[tokio::test]
async fn job_beyond_capacity_runs_after_hung_jobs_time_out() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine {
        slow_tags: vec![1, 2],
        ..Default::default()
    });
    let service = build(
        config(dir.path(), 2).timeout_ms(300),
        FakeRasterizer::pages(1),
        engine.clone(),
        Arc::default(),
    );

    let (a, b, c) = tokio::join!(
        service.submit(doc(dir.path(), 1), SubmitOptions::default()),
        service.submit(doc(dir.path(), 2), SubmitOptions::default()),
        service.submit(doc(dir.path(), 3), SubmitOptions::default()),
    );

    for err in [a.unwrap_err(), b.unwrap_err()] {
        assert!(matches!(err, OcrError::Timeout { .. }), "got {err:?}");
        let partial = err.partial_result().unwrap();
        assert_eq!(partial.status, JobStatus::TimedOut);
        assert_eq!(partial.pages_processed, 0);
    }
    let c = c.unwrap();
    assert_eq!(c.status, JobStatus::Completed);
    assert!(c.queue_wait_ms >= 200, "waited {}ms", c.queue_wait_ms);

    let log = engine.log();
    let pos = |e: &str| log.iter().position(|x| x == e).unwrap();
    assert!(pos("start 3:1") > pos("start 1:1"));
    assert!(pos("start 3:1") > pos("start 2:1"));
    assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(service.gate().active(), 0);
    assert!(service.registry().is_empty());
}

// ── Page limit ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn page_limit_truncates_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let service = build(
        config(dir.path(), 1).max_pdf_pages(3),
        FakeRasterizer::pages(5),
        FakeEngine::with_delay(0),
        Arc::default(),
    );

    let result = service
        .submit(doc(dir.path(), 1), SubmitOptions::default().page_limit(2))
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.pages_processed, 2);
    assert_eq!(result.total_pages, 5);
    assert!(result.truncated);

    // A larger per-document limit cannot lift the configured cap.
    let result = service
        .submit(doc(dir.path(), 2), SubmitOptions::default().page_limit(10))
        .await
        .unwrap();
    assert_eq!(result.pages_processed, 3);
    assert_eq!(result.raw_text_by_page.len(), 3);
    assert!(result.truncated);
}

#[tokio::test]
async fn short_document_is_not_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(2),
        FakeEngine::with_delay(0),
        Arc::default(),
    );
    let result = service
        .submit(doc(dir.path(), 1), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(result.pages_processed, 2);
    assert!(!result.truncated);
    assert!(result.warnings.is_empty());
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn timeout_returns_partial_result_and_frees_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(400);
    let service = build(
        config(dir.path(), 1).timeout_ms(600),
        FakeRasterizer::pages(3),
        engine.clone(),
        Arc::default(),
    );

    let err = service
        .submit(doc(dir.path(), 1), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let partial = err.partial_result().expect("timeout carries a partial result");
    assert_eq!(partial.status, JobStatus::TimedOut);
    assert_eq!(partial.pages_processed, 1);
    assert_eq!(partial.total_pages, 3);
    assert!(partial.truncated);
    assert_eq!(service.gate().active(), 0);

    // The slot is free again: a follow-up job runs to completion.
    let result = service
        .submit(
            doc(dir.path(), 2),
            SubmitOptions::default().page_limit(1).timeout_ms(5_000),
        )
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn queue_wait_does_not_count_against_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let service = build(
        config(dir.path(), 1).timeout_ms(500),
        FakeRasterizer::pages(1),
        FakeEngine::with_delay(300),
        Arc::default(),
    );

    // The second job waits ~300ms, then needs ~300ms of its own 500ms.
    let (a, b) = tokio::join!(
        service.submit(doc(dir.path(), 1), SubmitOptions::default()),
        service.submit(doc(dir.path(), 2), SubmitOptions::default()),
    );
    a.unwrap();
    let b = b.unwrap();
    assert!(b.queue_wait_ms >= 200, "waited {}ms", b.queue_wait_ms);
    assert_eq!(b.status, JobStatus::Completed);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn render_failure_after_first_page_keeps_earlier_pages() {
    let dir = tempfile::tempdir().unwrap();
    let service = build(
        config(dir.path(), 1),
        Arc::new(FakeRasterizer {
            total_pages: 3,
            fail_at: Some(1),
        }),
        FakeEngine::with_delay(0),
        Arc::default(),
    );

    let result = service
        .submit(doc(dir.path(), 1), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.pages_processed, 1);
    assert!(result.truncated);
    assert!(matches!(
        result.warnings.as_slice(),
        [PageError::RenderFailed { page: 2, .. }]
    ));
}

#[tokio::test]
async fn render_failure_on_first_page_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(0);
    let service = build(
        config(dir.path(), 1),
        Arc::new(FakeRasterizer {
            total_pages: 3,
            fail_at: Some(0),
        }),
        engine.clone(),
        Arc::default(),
    );

    let err = service
        .submit(doc(dir.path(), 1), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::RasterizationFailed { .. }), "got {err:?}");
    assert!(engine.seen().is_empty());
}

#[tokio::test]
async fn unsupported_input_is_rejected_before_admission() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(0);
    let recorder = Arc::new(Recorder::default());
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(1),
        engine.clone(),
        recorder.clone(),
    );

    let txt = dir.path().join("notes.txt");
    std::fs::write(&txt, "hello world").unwrap();
    let err = service
        .submit(SourceFile::new(&txt, "text/plain"), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::UnsupportedFormat { .. }));

    // Declared as an image, but the bytes say otherwise.
    let err = service
        .submit(SourceFile::new(&txt, "image/png"), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::UnsupportedFormat { .. }));

    let err = service
        .submit(
            SourceFile::new(dir.path().join("missing.pdf"), "application/pdf"),
            SubmitOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::FileNotFound { .. }));
    assert!(!err.is_retryable());

    assert!(engine.seen().is_empty());
    assert_eq!(recorder.started.load(Ordering::SeqCst), 0);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn engine_failure_names_engine_and_page() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine {
        fail: true,
        ..Default::default()
    });
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(2),
        engine,
        Arc::default(),
    );

    let err = service
        .submit(doc(dir.path(), 1), SubmitOptions::default())
        .await
        .unwrap_err();
    match &err {
        OcrError::EngineUnavailable { engine, page, .. } => {
            assert_eq!(engine, "fake");
            assert_eq!(*page, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(service.gate().active(), 0);
}

#[tokio::test]
async fn engine_failure_on_one_page_keeps_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine {
        fail_page: Some(2),
        ..Default::default()
    });
    let service = build(
        config(dir.path(), 1).enable_debug(true),
        FakeRasterizer::pages(3),
        engine.clone(),
        Arc::default(),
    );

    let result = service
        .submit(doc(dir.path(), 4), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.total_pages, 3);
    assert_eq!(result.pages_processed, 2);
    assert_eq!(result.raw_text_by_page.len(), 2);
    assert!(!result.truncated);
    let debug = result.debug.as_ref().unwrap();
    let indices: Vec<_> = debug.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(indices, vec![0, 2]);
    match result.warnings.as_slice() {
        [PageError::EngineFailed { page, engine, .. }] => {
            assert_eq!(*page, 2);
            assert_eq!(engine, "fake");
        }
        other => panic!("unexpected warnings: {other:?}"),
    }
    let invoice = result.extracted_fields.invoice_number.as_ref().unwrap();
    assert_eq!(invoice.value, "INV-004");
    assert_eq!(engine.seen().len(), 3);
}

// ── Scratch files and the janitor ────────────────────────────────────────────

#[tokio::test]
async fn janitor_never_deletes_files_of_a_live_job() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let service = build(
        config(dir.path(), 1).temp_max_age_ms(0),
        FakeRasterizer::pages(1),
        FakeEngine::with_delay(300),
        recorder.clone(),
    );
    let scratch_root = service.config().temp_dir.clone();

    let job = {
        let service = service.clone();
        let file = doc(dir.path(), 1);
        tokio::spawn(async move { service.submit(file, SubmitOptions::default()).await })
    };
    wait_until(|| count_files(&scratch_root) > 0).await;

    let report = service.janitor().sweep().await;
    assert!(report.kept_live >= 1, "{report:?}");
    assert_eq!(report.deleted, 0);
    assert!(count_files(&scratch_root) > 0);

    job.await.unwrap().unwrap();
    assert_eq!(count_files(&scratch_root), 0, "job removes its own scratch files");
}

// ── Results ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fields_are_extracted_from_engine_text() {
    let dir = tempfile::tempdir().unwrap();
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(1),
        FakeEngine::with_delay(0),
        Arc::default(),
    );

    let result = service
        .submit(doc(dir.path(), 7), SubmitOptions::default())
        .await
        .unwrap();
    let fields = &result.extracted_fields;
    assert_eq!(fields.invoice_number.as_ref().unwrap().value, "INV-007");
    assert_eq!(fields.total_amount.as_ref().unwrap().value, 1180.0);
    assert!(result.text().contains("INV-007"));
    assert!(result.debug.is_none());
}

#[tokio::test]
async fn debug_output_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let service = build(
        config(dir.path(), 1).enable_debug(true).language("deu"),
        FakeRasterizer::pages(2),
        FakeEngine::with_delay(0),
        Arc::default(),
    );

    let result = service
        .submit(doc(dir.path(), 1), SubmitOptions::default())
        .await
        .unwrap();
    let debug = result.debug.expect("debug output");
    assert_eq!(debug.engine, "fake");
    assert_eq!(debug.language, "deu");
    assert_eq!(debug.pages.len(), 2);
    assert_eq!(debug.pages[1].page_index, 1);
}

#[tokio::test]
async fn progress_events_follow_the_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let service = build(
        config(dir.path(), 1),
        FakeRasterizer::pages(2),
        FakeEngine::with_delay(0),
        recorder.clone(),
    );

    service
        .submit(doc(dir.path(), 1), SubmitOptions::default())
        .await
        .unwrap();
    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "queued",
            "started",
            "page_start 1/2",
            "page 1/2",
            "page_start 2/2",
            "page 2/2",
            "complete"
        ]
    );
}

#[tokio::test]
async fn image_upload_runs_through_the_real_rasterizer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("receipt.png");
    DynamicImage::ImageLuma8(GrayImage::from_pixel(6, 10, Luma([90])))
        .save(&path)
        .unwrap();

    let engine = FakeEngine::with_delay(0);
    let service = OcrService::builder(config(dir.path(), 1).build().unwrap())
        .engine(engine.clone())
        .build();
    let result = service
        .submit(SourceFile::new(&path, "image/png"), SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total_pages, 1);
    assert_eq!(result.pages_processed, 1);
    assert_eq!(engine.seen(), vec![5]);
}

#[tokio::test]
async fn image_upload_is_decoded_by_content_whatever_its_name() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_delay(0);
    let service = OcrService::builder(config(dir.path(), 1).build().unwrap())
        .engine(engine.clone())
        .build();

    for name in ["upload-3f9a1c", "bill.pdf"] {
        let path = dir.path().join(name);
        DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 10, Luma([90])))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        let result = service
            .submit(SourceFile::new(&path, "image/png"), SubmitOptions::default())
            .await
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(result.pages_processed, 1, "{name}");
    }
    assert_eq!(engine.seen(), vec![7, 7]);
}
