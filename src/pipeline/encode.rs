//! Image encoding: `DynamicImage` → PNG bytes, and base64 PNG wrapped in
//! `ImageData` for vision-model requests.
//!
//! PNG is used on both paths because it is lossless: JPEG artefacts around
//! glyph edges cost more recognition accuracy than they save in bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page as PNG bytes (what tesseract reads on stdin).
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a page as a base64 PNG ready for a vision-model API.
///
/// `detail: "high"` asks tiling providers for full resolution; with the
/// single-tile overview, line items and small print are unreadable.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let png = encode_png(img)?;
    let b64 = STANDARD.encode(&png);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
