//! Error types for the billscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] — **Fatal** for the job: the document cannot be turned
//!   into a result (unsupported file, engine down, deadline hit, caller
//!   cancelled). Returned as `Err(OcrError)` from
//!   [`crate::service::OcrService::submit`].
//!
//! * [`PageError`] — **Non-fatal**: one page could not be rasterised,
//!   normalised or recognised, but other pages are fine. Stored in
//!   [`crate::output::OcrResult::warnings`] so callers see partial success
//!   instead of losing the whole document.
//!
//! Field-extraction ambiguity is neither: a field that cannot be read is
//! simply absent from [`crate::output::ExtractedFields`].

use crate::output::OcrResult;
use crate::registry::{JobId, JobStatus};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the billscan library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("Source file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// Neither the declared MIME type nor the file contents are a PDF or a
    /// raster image we can decode. Not retried.
    #[error("Unsupported format '{mime_type}' for '{path}'")]
    UnsupportedFormat { path: PathBuf, mime_type: String },

    // ── Rasterisation errors ──────────────────────────────────────────────
    /// PDF could not be opened at all (corrupt, encrypted, truncated).
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Not a single page could be produced from the document.
    #[error("Rasterization failed for '{path}': {detail}")]
    RasterizationFailed { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The OCR engine failed or could not be reached. Retryable at the
    /// caller's discretion; this crate performs no retries itself.
    #[error("OCR engine '{engine}' unavailable on page {page}: {detail}")]
    EngineUnavailable {
        engine: String,
        page: usize,
        detail: String,
    },

    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// The job deadline elapsed. `partial` holds whatever pages finished in
    /// time, with status [`JobStatus::TimedOut`].
    #[error("OCR job {job_id} timed out after {elapsed_ms}ms (limit: {limit_ms}ms)")]
    Timeout {
        job_id: JobId,
        elapsed_ms: u64,
        limit_ms: u64,
        partial: Box<OcrResult>,
    },

    /// The caller cancelled the job while it was still queued.
    #[error("OCR job {job_id} cancelled before admission")]
    Cancelled { job_id: JobId },

    /// A job tried to move backwards in its lifecycle.
    #[error("Job {job_id}: illegal status transition {from:?} → {to:?}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Scratch directory could not be created or written.
    #[error("Scratch I/O failed for '{path}': {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    /// Whether a caller may reasonably resubmit the same document.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OcrError::EngineUnavailable { .. } | OcrError::Timeout { .. }
        )
    }

    /// The partial result carried by a timeout, if any.
    pub fn partial_result(&self) -> Option<&OcrResult> {
        match self {
            OcrError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed; later pages were not attempted.
    #[error("Page {page}: rasterization failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Preprocessing failed; the raw page was sent to the engine instead.
    #[error("Page {page}: normalization failed, raw image used: {detail}")]
    NormalizeFailed { page: usize, detail: String },

    /// The engine failed on this page; the remaining pages were still tried.
    #[error("Page {page}: {engine} failed: {detail}")]
    EngineFailed {
        page: usize,
        engine: String,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_display() {
        let e = OcrError::UnsupportedFormat {
            path: PathBuf::from("/tmp/bill.docx"),
            mime_type: "application/msword".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("application/msword"), "got: {msg}");
        assert!(msg.contains("bill.docx"));
    }

    #[test]
    fn engine_unavailable_is_retryable() {
        let e = OcrError::EngineUnavailable {
            engine: "tesseract".into(),
            page: 2,
            detail: "exit status 1".into(),
        };
        assert!(e.is_retryable());
        assert!(e.to_string().contains("page 2"));
    }

    #[test]
    fn unsupported_format_is_not_retryable() {
        let e = OcrError::UnsupportedFormat {
            path: PathBuf::from("x"),
            mime_type: "text/plain".into(),
        };
        assert!(!e.is_retryable());
        assert!(e.partial_result().is_none());
    }

    #[test]
    fn page_error_display() {
        let e = PageError::RenderFailed {
            page: 3,
            detail: "bad xref".into(),
        };
        assert_eq!(e.to_string(), "Page 3: rasterization failed: bad xref");

        let e = PageError::EngineFailed {
            page: 2,
            engine: "tesseract".into(),
            detail: "exit status 1".into(),
        };
        assert_eq!(e.to_string(), "Page 2: tesseract failed: exit status 1");
    }
}
