//! # billscan
//!
//! Bounded-concurrency OCR ingestion for invoices and bills.
//!
//! A host hands over an uploaded PDF or image and gets back its text, page by
//! page, plus best-effort business fields (vendor, invoice number, dates,
//! amounts, currency) each tagged with a confidence tier.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Queue      register the job, wait FIFO for a gate slot
//!  ├─ 2. Render     rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Normalize  greyscale, contrast stretch, sharpen
//!  ├─ 4. OCR        tesseract CLI or a vision model, page by page
//!  ├─ 5. Extract    regex field heuristics over the page texts
//!  └─ 6. Output     OcrResult; scratch files removed
//! ```
//!
//! Every job runs under a deadline that starts when it is admitted, so time
//! spent queued never counts. On expiry the job returns
//! [`OcrError::Timeout`] carrying whatever pages finished. A background
//! [`Janitor`] reclaims stale scratch files but never touches files of a job
//! that is still queued or running.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use billscan::{OcrConfig, OcrService, SourceFile, SubmitOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = OcrService::new(OcrConfig::from_env()?);
//!     let janitor = service.spawn_janitor();
//!
//!     let file = SourceFile::new("uploads/bill.pdf", "application/pdf");
//!     let result = service.submit(file, SubmitOptions::default()).await?;
//!     println!("{}", result.text());
//!     if let Some(total) = &result.extracted_fields.total_amount {
//!         println!("total: {} ({:?})", total.value, total.confidence);
//!     }
//!
//!     janitor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `billscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! billscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod gate;
pub mod janitor;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod scratch;
pub mod service;
pub mod supervisor;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OcrConfig, OcrConfigBuilder, SourceFile, SubmitOptions, TimeoutScope};
pub use error::{OcrError, PageError};
pub use gate::{ConcurrencyGate, GateMetrics, GatePermit};
pub use janitor::{Janitor, JanitorHandle, SweepReport};
pub use output::{
    Confidence, Currency, ExtractedFields, Field, OcrDebug, OcrResult, PageResult, PAGE_BREAK,
};
pub use pipeline::engine::{EngineError, OcrEngine, TesseractEngine, VisionEngine};
pub use pipeline::normalize::{ContrastNormalizer, ImageNormalizer, NoopNormalizer};
pub use pipeline::render::{DocumentRasterizer, PageImage, PageSequence, Rasterizer};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use registry::{JobId, JobRegistry, JobStatus};
pub use scratch::{JobScratch, TempFile};
pub use service::{OcrJob, OcrService, OcrServiceBuilder};
pub use task::{suggest_task, SuggestedTask, TaskPriority};
