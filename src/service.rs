//! The pipeline orchestrator: one `submit()` call, one job lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//! submit ─▶ queued ──(gate slot)──▶ running ──▶ completed
//!             │                       ├──────▶ failed
//!             └──(cancel)──▶ failed   └──────▶ timedOut
//! ```
//!
//! 1. The job is registered as `queued`, its input validated, and it joins
//!    the gate queue, all within the first poll of the `submit` future.
//!    Submission order therefore is grant order.
//! 2. Once admitted the job is `running` and its deadline starts. Queue wait
//!    never counts against it.
//! 3. Pages are pulled from the rasteriser one at a time, normalised and
//!    recognised under the deadline.
//! 4. Fields are extracted, the slot is released, the result assembled, the
//!    scratch directory removed, and finally the job leaves the registry.
//!
//! The slot is a scoped [`GatePermit`](crate::gate::GatePermit): every exit,
//! including `?` early returns and a dropped future, gives it back.

use crate::config::{OcrConfig, SourceFile, SubmitOptions, TimeoutScope};
use crate::error::{OcrError, PageError};
use crate::gate::{ConcurrencyGate, GateMetrics};
use crate::janitor::{Janitor, JanitorHandle};
use crate::output::{ExtractedFields, OcrDebug, OcrResult, PageResult};
use crate::pipeline::engine::{EngineError, OcrEngine, TesseractEngine};
use crate::pipeline::extract::extract_fields;
use crate::pipeline::input::{resolve_input, ResolvedInput};
use crate::pipeline::normalize::{normalize_page, ContrastNormalizer, ImageNormalizer};
use crate::pipeline::render::{DocumentRasterizer, PageImage, Rasterizer};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::registry::{JobId, JobRegistry, JobStatus};
use crate::scratch::JobScratch;
use crate::supervisor::{wrap_until, Deadline, TimedOut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// One submitted document with its resolved settings.
///
/// Status is not stored here: the [`JobRegistry`] is the only record of it.
#[derive(Debug, Clone)]
pub struct OcrJob {
    pub id: JobId,
    pub source: SourceFile,
    pub language: String,
    pub page_limit: usize,
    pub timeout_ms: u64,
    pub timeout_scope: TimeoutScope,
    pub created_at: DateTime<Utc>,
}

impl OcrJob {
    /// Resolve per-document options against the service config. The page
    /// limit can lower the configured cap but never raise it.
    pub fn new(source: SourceFile, options: &SubmitOptions, config: &OcrConfig) -> Self {
        let language = options
            .language_hint
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&config.language)
            .to_string();
        Self {
            id: JobId::new(),
            source,
            language,
            page_limit: options
                .page_limit
                .unwrap_or(config.max_pdf_pages)
                .clamp(1, config.max_pdf_pages.max(1)),
            timeout_ms: options.timeout_ms.unwrap_or(config.timeout_ms).max(1),
            timeout_scope: config.timeout_scope,
            created_at: Utc::now(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Bounded-concurrency OCR service. Cheap to clone; clones share the gate,
/// the registry and the backends.
#[derive(Clone)]
pub struct OcrService {
    inner: Arc<Inner>,
}

struct Inner {
    config: OcrConfig,
    gate: ConcurrencyGate,
    registry: JobRegistry,
    rasterizer: Arc<dyn Rasterizer>,
    normalizer: Arc<dyn ImageNormalizer>,
    engine: Arc<dyn OcrEngine>,
    progress: ProgressCallback,
}

impl std::fmt::Debug for OcrService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrService")
            .field("engine", &self.inner.engine.name())
            .field("capacity", &self.inner.gate.capacity())
            .field("jobs", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`OcrService`]. Every backend defaults to the production one.
pub struct OcrServiceBuilder {
    config: OcrConfig,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    normalizer: Option<Arc<dyn ImageNormalizer>>,
    engine: Option<Arc<dyn OcrEngine>>,
    progress: Option<ProgressCallback>,
}

impl OcrServiceBuilder {
    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn ImageNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn build(self) -> OcrService {
        let config = self.config;
        let rasterizer = self.rasterizer.unwrap_or_else(|| {
            Arc::new(DocumentRasterizer::new(
                config.pdfium_library_dir.clone(),
                config.max_rendered_pixels,
            ))
        });
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(TesseractEngine::new(config.tesseract_bin.clone())));
        OcrService {
            inner: Arc::new(Inner {
                gate: ConcurrencyGate::new(config.max_concurrency),
                registry: JobRegistry::new(),
                rasterizer,
                normalizer: self
                    .normalizer
                    .unwrap_or_else(|| Arc::new(ContrastNormalizer::default())),
                engine,
                progress: self
                    .progress
                    .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
                config,
            }),
        }
    }
}

/// Why page processing stopped early.
enum Stop {
    TimedOut(TimedOut),
    Failed(OcrError),
}

/// What a running job has produced so far.
#[derive(Default)]
struct JobWork {
    total_pages: usize,
    /// Pages the engine finished with, whether or not it read them.
    attempted: usize,
    pages: Vec<PageResult>,
    warnings: Vec<PageError>,
}

impl OcrService {
    /// Service with the default backends.
    pub fn new(config: OcrConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: OcrConfig) -> OcrServiceBuilder {
        OcrServiceBuilder {
            config,
            rasterizer: None,
            normalizer: None,
            engine: None,
            progress: None,
        }
    }

    pub fn config(&self) -> &OcrConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    pub fn metrics(&self) -> GateMetrics {
        self.inner.gate.metrics(&self.inner.registry)
    }

    /// A janitor over this service's scratch root and registry.
    pub fn janitor(&self) -> Janitor {
        let c = &self.inner.config;
        Janitor::new(
            c.temp_dir.clone(),
            c.temp_max_age(),
            c.janitor_interval(),
            self.inner.registry.clone(),
        )
    }

    /// Start the janitor on its interval.
    pub fn spawn_janitor(&self) -> JanitorHandle {
        self.janitor().spawn()
    }

    /// OCR one document.
    ///
    /// Waits for a gate slot, then processes up to the page limit under the
    /// job deadline. Dropping the returned future abandons the job: a queued
    /// job leaves the queue, a running one frees its slot.
    ///
    /// # Errors
    ///
    /// * [`OcrError::UnsupportedFormat`], [`OcrError::FileNotFound`],
    ///   [`OcrError::PermissionDenied`]: the input was rejected.
    /// * [`OcrError::Timeout`]: the deadline fired; carries the partial result.
    /// * [`OcrError::EngineUnavailable`]: the engine failed on a page.
    /// * [`OcrError::RasterizationFailed`] / [`OcrError::CorruptPdf`]: no page
    ///   could be produced.
    pub async fn submit(
        &self,
        file: SourceFile,
        options: SubmitOptions,
    ) -> Result<OcrResult, OcrError> {
        self.submit_with_cancel(file, options, &CancellationToken::new())
            .await
    }

    /// [`submit`](Self::submit) with a token that abandons the job while it
    /// is still queued. Once admitted, the job runs to completion or timeout.
    pub async fn submit_with_cancel(
        &self,
        file: SourceFile,
        options: SubmitOptions,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, OcrError> {
        let job = OcrJob::new(file, &options, &self.inner.config);
        let span = info_span!("ocr.job", job_id = %job.id);
        self.run(job, cancel).instrument(span).await
    }

    async fn run(&self, job: OcrJob, cancel: &CancellationToken) -> Result<OcrResult, OcrError> {
        let inner = &self.inner;
        let _registration = inner.registry.register(job.id);
        inner.progress.on_job_queued(job.id);
        debug!(
            "Queued {} ({}), {} active",
            job.source.path.display(),
            job.source.mime_type,
            inner.gate.active()
        );

        // Still inside the first poll: nothing may await before the gate.
        let input = match resolve_input(&job.source) {
            Ok(input) => input,
            Err(e) => return Err(self.fail(&job, e)),
        };

        let permit = match inner.gate.acquire_cancellable(job.id, cancel).await {
            Ok(permit) => permit,
            Err(e) => {
                info!("Cancelled while queued");
                return Err(self.fail(&job, e));
            }
        };
        self.mark(job.id, JobStatus::Running);
        let deadline = Deadline::start(job.timeout(), job.timeout_scope);
        let queue_wait = permit.waited();
        inner.progress.on_job_started(job.id, queue_wait);
        info!(
            "Admitted after {}ms (limit {} pages, {}ms)",
            queue_wait.as_millis(),
            job.page_limit,
            job.timeout_ms
        );

        let scratch = match JobScratch::create(&inner.config.temp_dir, job.id).await {
            Ok(s) => s,
            Err(e) => return Err(self.fail(&job, e)),
        };

        let mut work = JobWork::default();
        let outcome = self
            .process(&job, &input, &deadline, &scratch, &mut work)
            .await;
        let texts: Vec<String> = work.pages.iter().map(|p| p.raw_text.clone()).collect();
        let fields = extract_fields(&texts);
        permit.release();

        let status = match &outcome {
            Ok(()) => JobStatus::Completed,
            Err(Stop::TimedOut(_)) => JobStatus::TimedOut,
            Err(Stop::Failed(_)) => JobStatus::Failed,
        };
        let result = self.assemble(&job, work, texts, fields, status, queue_wait, &deadline);
        scratch.remove().await;

        match outcome {
            Ok(()) => {
                self.mark(job.id, JobStatus::Completed);
                info!(
                    "Completed: {}/{} pages, {} key fields, {}ms",
                    result.pages_processed,
                    result.total_pages,
                    result.extracted_fields.key_fields_found(),
                    result.processing_ms
                );
                inner.progress.on_job_complete(job.id, &result);
                Ok(result)
            }
            Err(Stop::TimedOut(t)) => {
                self.mark(job.id, JobStatus::TimedOut);
                warn!(
                    "Timed out after {}ms with {}/{} pages",
                    t.elapsed.as_millis(),
                    result.pages_processed,
                    result.total_pages
                );
                let err = OcrError::Timeout {
                    job_id: job.id,
                    elapsed_ms: t.elapsed.as_millis() as u64,
                    limit_ms: t.limit.as_millis() as u64,
                    partial: Box::new(result),
                };
                inner.progress.on_job_failed(job.id, &err);
                Err(err)
            }
            Err(Stop::Failed(e)) => Err(self.fail(&job, e)),
        }
    }

    /// Rasterise and recognise pages until the document, the page limit or
    /// the deadline runs out.
    async fn process(
        &self,
        job: &OcrJob,
        input: &ResolvedInput,
        deadline: &Deadline,
        scratch: &JobScratch,
        work: &mut JobWork,
    ) -> Result<(), Stop> {
        let inner = &self.inner;
        let mut sequence = wrap_until(
            inner.rasterizer.rasterize(input, job.page_limit, scratch),
            deadline.step_deadline(),
            deadline,
        )
        .await
        .map_err(Stop::TimedOut)?
        .map_err(Stop::Failed)?;

        work.total_pages = sequence.total_pages;
        let planned = sequence.total_pages.min(job.page_limit);
        debug!("Document has {} pages, processing {}", sequence.total_pages, planned);

        let mut render_error = None;
        let mut engine_error: Option<(usize, String)> = None;
        loop {
            let until = deadline.step_deadline();
            let page = match wrap_until(sequence.pages.next(), until, deadline)
                .await
                .map_err(Stop::TimedOut)?
            {
                None => break,
                Some(Ok(page)) => page,
                Some(Err(e)) => {
                    inner.progress.on_page_warning(job.id, &e);
                    render_error = Some(e.to_string());
                    work.warnings.push(e);
                    break;
                }
            };

            let page_no = page.index + 1;
            inner.progress.on_page_start(job.id, page_no, planned);
            let started = Instant::now();
            let (warning, recognized) = wrap_until(self.recognize_page(job, page), until, deadline)
                .await
                .map_err(Stop::TimedOut)?;
            work.attempted += 1;

            if let Some(w) = warning {
                inner.progress.on_page_warning(job.id, &w);
                work.warnings.push(w);
            }
            let text = match recognized {
                Ok(text) => text,
                Err(EngineError(detail)) => {
                    let w = PageError::EngineFailed {
                        page: page_no,
                        engine: inner.engine.name().to_string(),
                        detail: detail.clone(),
                    };
                    warn!("{}", w);
                    inner.progress.on_page_warning(job.id, &w);
                    work.warnings.push(w);
                    engine_error.get_or_insert((page_no, detail));
                    continue;
                }
            };

            let processing_ms = started.elapsed().as_millis() as u64;
            debug!("Page {}: {} chars in {}ms", page_no, text.len(), processing_ms);
            inner
                .progress
                .on_page_complete(job.id, page_no, planned, text.len());
            work.pages.push(PageResult {
                page_index: page_no - 1,
                raw_text: text,
                processing_ms,
            });
        }

        if work.pages.is_empty() {
            let err = match engine_error {
                Some((page, detail)) => OcrError::EngineUnavailable {
                    engine: inner.engine.name().to_string(),
                    page,
                    detail,
                },
                None => OcrError::RasterizationFailed {
                    path: job.source.path.clone(),
                    detail: render_error.unwrap_or_else(|| "document has no pages".into()),
                },
            };
            return Err(Stop::Failed(err));
        }
        Ok(())
    }

    /// Normalise then recognise one page. An engine failure is returned
    /// alongside the normalisation warning so the caller can keep going.
    async fn recognize_page(
        &self,
        job: &OcrJob,
        page: PageImage,
    ) -> (Option<PageError>, Result<String, EngineError>) {
        let inner = &self.inner;
        let page_no = page.index + 1;
        let (image, warning) = normalize_page(
            Arc::clone(&inner.normalizer),
            page_no,
            Arc::new(page.image),
        )
        .await;

        let text = inner.engine.recognize(&image, &job.language).await;
        (warning, text)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        job: &OcrJob,
        work: JobWork,
        texts: Vec<String>,
        fields: ExtractedFields,
        status: JobStatus,
        queue_wait: Duration,
        deadline: &Deadline,
    ) -> OcrResult {
        let pages_processed = work.pages.len();
        let debug = self.inner.config.enable_debug.then(|| OcrDebug {
            engine: self.inner.engine.name().to_string(),
            language: job.language.clone(),
            page_limit: job.page_limit,
            timeout_ms: job.timeout_ms,
            pages: work.pages,
        });
        OcrResult {
            job_id: job.id,
            status,
            pages_processed,
            total_pages: work.total_pages,
            truncated: work.total_pages > work.attempted,
            extracted_fields: fields,
            raw_text_by_page: texts,
            warnings: work.warnings,
            created_at: job.created_at,
            queue_wait_ms: queue_wait.as_millis() as u64,
            processing_ms: deadline.elapsed().as_millis() as u64,
            debug,
        }
    }

    /// Mark the job failed, notify, and hand the error back.
    fn fail(&self, job: &OcrJob, error: OcrError) -> OcrError {
        self.mark(job.id, JobStatus::Failed);
        warn!("Failed: {}", error);
        self.inner.progress.on_job_failed(job.id, &error);
        error
    }

    fn mark(&self, id: JobId, status: JobStatus) {
        if let Err(e) = self.inner.registry.transition(id, status) {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_options_resolve_against_config() {
        let config = OcrConfig::builder()
            .max_pdf_pages(5)
            .timeout_ms(1000)
            .build()
            .unwrap();
        let file = SourceFile::new("/tmp/a.pdf", "application/pdf");

        let job = OcrJob::new(file.clone(), &SubmitOptions::default(), &config);
        assert_eq!(job.page_limit, 5);
        assert_eq!(job.timeout_ms, 1000);
        assert_eq!(job.language, "eng");

        let opts = SubmitOptions::default()
            .page_limit(50)
            .timeout_ms(0)
            .language_hint(" hin ");
        let job = OcrJob::new(file.clone(), &opts, &config);
        assert_eq!(job.page_limit, 5, "options cannot raise the cap");
        assert_eq!(job.timeout_ms, 1);
        assert_eq!(job.language, "hin");

        let job = OcrJob::new(file, &SubmitOptions::default().page_limit(0), &config);
        assert_eq!(job.page_limit, 1);
    }

    #[test]
    fn service_debug_shows_engine() {
        let service = OcrService::new(OcrConfig::default());
        let dbg = format!("{service:?}");
        assert!(dbg.contains("tesseract"));
        assert_eq!(service.metrics().capacity, 2);
    }
}
