//! Page preprocessing before OCR.
//!
//! Normalisation is an optimisation, not a requirement: a page that fails to
//! normalise is sent to the engine as rendered, and the job records a
//! [`PageError::NormalizeFailed`] warning.

use crate::error::PageError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Preprocessing failed for one page.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NormalizeError(pub String);

/// Turns a raw page into an engine-friendly one.
///
/// Implementations must not modify `image`; they return a new buffer. Called
/// on the blocking pool.
pub trait ImageNormalizer: Send + Sync {
    fn normalize(&self, image: &DynamicImage) -> Result<DynamicImage, NormalizeError>;
}

/// Grayscale, percentile contrast stretch, bounded downscale, light sharpen.
#[derive(Debug, Clone)]
pub struct ContrastNormalizer {
    /// Pages taller than this are scaled down. Never enlarged.
    pub max_height: u32,
    /// Fraction of pixels clipped at each end of the histogram.
    pub clip: f32,
    pub sharpen_sigma: f32,
}

impl Default for ContrastNormalizer {
    fn default() -> Self {
        Self {
            max_height: 2000,
            clip: 0.01,
            sharpen_sigma: 1.0,
        }
    }
}

impl ContrastNormalizer {
    fn stretch(&self, gray: &GrayImage) -> GrayImage {
        let mut histogram = [0u64; 256];
        for Luma([v]) in gray.pixels() {
            histogram[*v as usize] += 1;
        }
        let total: u64 = histogram.iter().sum();
        let cut = (total as f64 * f64::from(self.clip)) as u64;

        let low = percentile(&histogram, cut);
        let high = 255 - percentile_rev(&histogram, cut);
        if high <= low {
            // Flat page; nothing to stretch.
            return gray.clone();
        }

        let span = f32::from(high - low);
        let mut lut = [0u8; 256];
        for (i, slot) in lut.iter_mut().enumerate() {
            let v = (i as f32 - f32::from(low)) * 255.0 / span;
            *slot = v.clamp(0.0, 255.0) as u8;
        }
        let mut out = gray.clone();
        for Luma([v]) in out.pixels_mut() {
            *v = lut[*v as usize];
        }
        out
    }
}

/// Lowest value with more than `cut` pixels at or below it.
fn percentile(histogram: &[u64; 256], cut: u64) -> u8 {
    let mut acc = 0;
    for (v, n) in histogram.iter().enumerate() {
        acc += n;
        if acc > cut {
            return v as u8;
        }
    }
    255
}

/// Same as [`percentile`] counted from the top, as a distance from 255.
fn percentile_rev(histogram: &[u64; 256], cut: u64) -> u8 {
    let mut acc = 0;
    for (d, n) in histogram.iter().rev().enumerate() {
        acc += n;
        if acc > cut {
            return d as u8;
        }
    }
    255
}

impl ImageNormalizer for ContrastNormalizer {
    fn normalize(&self, image: &DynamicImage) -> Result<DynamicImage, NormalizeError> {
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return Err(NormalizeError(format!("empty image ({w}x{h})")));
        }

        let mut gray = self.stretch(&image.to_luma8());

        if h > self.max_height {
            let nh = self.max_height;
            let nw = ((u64::from(w) * u64::from(nh)) / u64::from(h)).max(1) as u32;
            gray = imageops::resize(&gray, nw, nh, FilterType::Triangle);
        }

        let sharpened = imageops::unsharpen(&gray, self.sharpen_sigma, 2);
        debug!(
            "Normalized {}x{} → {}x{}",
            w,
            h,
            sharpened.width(),
            sharpened.height()
        );
        Ok(DynamicImage::ImageLuma8(sharpened))
    }
}

/// Pass-through normaliser, for engines that do their own preprocessing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNormalizer;

impl ImageNormalizer for NoopNormalizer {
    fn normalize(&self, image: &DynamicImage) -> Result<DynamicImage, NormalizeError> {
        Ok(image.clone())
    }
}

/// Normalise one page on the blocking pool, falling back to the raw image.
///
/// `page` is 1-based and only used for the warning.
pub async fn normalize_page(
    normalizer: Arc<dyn ImageNormalizer>,
    page: usize,
    raw: Arc<DynamicImage>,
) -> (Arc<DynamicImage>, Option<PageError>) {
    let input = Arc::clone(&raw);
    let outcome = tokio::task::spawn_blocking(move || normalizer.normalize(&input)).await;

    let detail = match outcome {
        Ok(Ok(normalized)) => return (Arc::new(normalized), None),
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("normalizer panicked: {e}"),
    };
    warn!("Page {}: normalization failed, using raw image: {}", page, detail);
    (raw, Some(PageError::NormalizeFailed { page, detail }))
}
