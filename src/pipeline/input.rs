//! Input resolution: validate the persisted upload and decide what it is.
//!
//! The declared MIME type comes from the uploader and is only a hint; the
//! first bytes of the file decide between the PDF path and the single-image
//! path. A file that is neither is rejected with
//! [`OcrError::UnsupportedFormat`] before any slot work is done, so pdfium
//! and the image decoders never see garbage.

use crate::config::SourceFile;
use crate::error::OcrError;
use image::ImageFormat;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What kind of document a source file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(ImageFormat),
}

/// A source file that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// MIME types accepted at the door. Anything else is rejected even if the
/// bytes would decode.
fn declared_kind_ok(mime_type: &str) -> bool {
    let mime = mime_type.trim().to_ascii_lowercase();
    mime == "application/pdf" || mime.starts_with("image/")
}

/// Check existence, readability and format of `file`.
///
/// Synchronous on purpose: the service calls this between registering a job
/// and joining the gate queue, and both must happen in the same poll for
/// admission to stay in submission order. Only the first 16 bytes are read.
pub fn resolve_input(file: &SourceFile) -> Result<ResolvedInput, OcrError> {
    let path = file.path.clone();

    // Blocking std::fs I/O; see above.
    let mut f = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrError::PermissionDenied { path });
        }
        Err(_) => return Err(OcrError::FileNotFound { path }),
    };

    if !declared_kind_ok(&file.mime_type) {
        return Err(OcrError::UnsupportedFormat {
            path,
            mime_type: file.mime_type.clone(),
        });
    }

    let mut head = [0u8; 16];
    let n = read_head(&mut f, &mut head);
    let kind = sniff(&head[..n]).ok_or_else(|| OcrError::UnsupportedFormat {
        path: path.clone(),
        mime_type: file.mime_type.clone(),
    })?;

    debug!(
        "Resolved {} as {:?} (declared {})",
        path.display(),
        kind,
        file.mime_type
    );
    Ok(ResolvedInput { path, kind })
}

fn read_head(f: &mut std::fs::File, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match f.read(&mut buf[filled..]) {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    filled
}

/// Identify a document from its leading bytes.
pub fn sniff(head: &[u8]) -> Option<DocumentKind> {
    if head.starts_with(b"%PDF") {
        return Some(DocumentKind::Pdf);
    }
    match image::guess_format(head) {
        Ok(fmt @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Tiff)) => {
            Some(DocumentKind::Image(fmt))
        }
        _ => None,
    }
}
