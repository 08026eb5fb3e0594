//! Per-page stages of an OCR job.
//!
//! Each submodule does one transformation and is testable on its own. The
//! service in [`crate::service`] strings them together under the job deadline.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ normalize ──▶ engine ──▶ extract
//! (sniff)   (pdfium)   (contrast)    (OCR)      (fields)
//! ```
//!
//! 1. [`input`]     — check the declared MIME type and sniff the real one
//! 2. [`render`]    — rasterise pages lazily in `spawn_blocking`; pdfium is
//!    not async-safe
//! 3. [`normalize`] — greyscale, stretch contrast, cap height and sharpen;
//!    a failure falls back to the raw page
//! 4. [`engine`]    — tesseract or a vision model; the only stage that leaves
//!    the process
//! 5. [`extract`]   — regex heuristics for vendor, number, dates and amounts
//!
//! [`encode`] holds the PNG and base64 helpers the engines share.

pub mod encode;
pub mod engine;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod render;
