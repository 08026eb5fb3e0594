//! Progress-callback trait for per-job lifecycle events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::service::OcrServiceBuilder::progress`] to observe every job the
//! service runs: admission, each page, and the final outcome.
//!
//! # Why callbacks instead of channels?
//!
//! A callback is the least invasive integration point: hosts can forward
//! events to a broadcast channel, a WebSocket, a database row or a terminal
//! progress bar without the library knowing how they communicate.
//!
//! # Example
//!
//! ```rust
//! use billscan::{JobId, JobProgressCallback};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct PageCounter(AtomicUsize);
//!
//! impl JobProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _job: JobId, _page: usize, _total: usize, _chars: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::error::{OcrError, PageError};
use crate::output::OcrResult;
use crate::registry::JobId;
use std::sync::Arc;
use std::time::Duration;

/// Called by the service as jobs move through their lifecycle.
///
/// Many jobs run at once, so every method may be called concurrently from
/// different tasks. All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// The job is registered and waiting for a gate slot.
    fn on_job_queued(&self, job_id: JobId) {
        let _ = job_id;
    }

    /// The job holds a slot and its deadline has started.
    fn on_job_started(&self, job_id: JobId, queue_wait: Duration) {
        let _ = (job_id, queue_wait);
    }

    /// OCR is about to run on a page.
    ///
    /// * `page`        — 1-indexed page number
    /// * `total_pages` — pages that will be processed (after the page cap)
    fn on_page_start(&self, job_id: JobId, page: usize, total_pages: usize) {
        let _ = (job_id, page, total_pages);
    }

    /// A page was recognised; `chars` is the length of its raw text.
    fn on_page_complete(&self, job_id: JobId, page: usize, total_pages: usize, chars: usize) {
        let _ = (job_id, page, total_pages, chars);
    }

    /// A non-fatal page problem was recorded.
    fn on_page_warning(&self, job_id: JobId, warning: &PageError) {
        let _ = (job_id, warning);
    }

    /// The job produced a result.
    fn on_job_complete(&self, job_id: JobId, result: &OcrResult) {
        let _ = (job_id, result);
    }

    /// The job ended with an error (including timeouts and cancellation).
    fn on_job_failed(&self, job_id: JobId, error: &OcrError) {
        let _ = (job_id, error);
    }
}

/// No-op implementation, used when no callback is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type stored by the service.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
