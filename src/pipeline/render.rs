//! Document rasterisation: turn the source file into a lazy page sequence.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which keeps
//! thread-local state and is not safe to drive from async contexts. The whole
//! document is opened and rendered on one blocking-pool thread; pages flow
//! back to the job through a channel of capacity 1, so at most one rendered
//! page waits ahead of the OCR engine and memory stays flat however long the
//! document is.
//!
//! ## Why stop on drop?
//!
//! When the job times out or is abandoned, the receiving stream is dropped.
//! The render thread notices on its next send and stops, instead of
//! rasterising pages nobody will read.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would be 12 000 px tall.
//! `max_rendered_pixels` caps the longest edge regardless of physical size,
//! which keeps memory bounded and suits OCR engines, whose accuracy plateaus
//! around 2 000 px.

use crate::error::{OcrError, PageError};
use crate::pipeline::input::{DocumentKind, ResolvedInput};
use crate::scratch::{JobScratch, TempFile};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based page index in the source document.
    pub index: usize,
    pub image: DynamicImage,
    /// The PNG persisted in the job's scratch directory, if one was written.
    pub temp_file: Option<TempFile>,
}

/// The pages of one document, produced on demand.
///
/// `pages` yields at most `min(total_pages, page_limit)` items, in order. An
/// `Err` item is a render failure; nothing follows it.
pub struct PageSequence {
    pub total_pages: usize,
    pub pages: BoxStream<'static, Result<PageImage, PageError>>,
}

impl std::fmt::Debug for PageSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSequence")
            .field("total_pages", &self.total_pages)
            .finish_non_exhaustive()
    }
}

/// Produces page images from a validated source file.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Open the document and start producing up to `page_limit` pages.
    ///
    /// Fails only if the document cannot be opened at all; later page
    /// failures arrive as `Err` items in the sequence.
    async fn rasterize(
        &self,
        input: &ResolvedInput,
        page_limit: usize,
        scratch: &JobScratch,
    ) -> Result<PageSequence, OcrError>;
}

/// Default rasteriser: pdfium for PDFs, the `image` crate for single images.
#[derive(Debug, Clone)]
pub struct DocumentRasterizer {
    pdfium_library_dir: Option<PathBuf>,
    max_rendered_pixels: u32,
}

impl DocumentRasterizer {
    pub fn new(pdfium_library_dir: Option<PathBuf>, max_rendered_pixels: u32) -> Self {
        Self {
            pdfium_library_dir,
            max_rendered_pixels,
        }
    }

    async fn rasterize_pdf(
        &self,
        path: &Path,
        page_limit: usize,
        scratch: &JobScratch,
    ) -> Result<PageSequence, OcrError> {
        let (count_tx, count_rx) = oneshot::channel();
        let (page_tx, page_rx) = mpsc::channel(1);
        let job = RenderJob {
            path: path.to_path_buf(),
            library_dir: self.pdfium_library_dir.clone(),
            max_pixels: self.max_rendered_pixels,
            page_limit,
            scratch: scratch.clone(),
        };

        tokio::task::spawn_blocking(move || job.run(count_tx, page_tx));

        let total_pages = count_rx
            .await
            .map_err(|_| OcrError::Internal("render task ended before opening the PDF".into()))??;

        Ok(PageSequence {
            total_pages,
            pages: Box::pin(ReceiverStream::new(page_rx)),
        })
    }

    /// Decode with the format sniffed from the file's bytes. Uploads arrive
    /// with arbitrary names, so the extension is never consulted.
    async fn decode_image(
        &self,
        path: &Path,
        format: ImageFormat,
    ) -> Result<PageSequence, OcrError> {
        let owned = path.to_path_buf();
        let image = tokio::task::spawn_blocking(move || -> image::ImageResult<DynamicImage> {
            let file = std::fs::File::open(&owned)?;
            image::load(std::io::BufReader::new(file), format)
        })
        .await
        .map_err(|e| OcrError::Internal(format!("Decode task panicked: {e}")))?
        .map_err(|e| OcrError::RasterizationFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        debug!(
            "Decoded image {} → {}x{} px",
            path.display(),
            image.width(),
            image.height()
        );
        let page = PageImage {
            index: 0,
            image,
            temp_file: None,
        };
        Ok(PageSequence {
            total_pages: 1,
            pages: Box::pin(stream::iter([Ok(page)])),
        })
    }
}

impl Default for DocumentRasterizer {
    fn default() -> Self {
        Self::new(None, 2000)
    }
}

#[async_trait]
impl Rasterizer for DocumentRasterizer {
    async fn rasterize(
        &self,
        input: &ResolvedInput,
        page_limit: usize,
        scratch: &JobScratch,
    ) -> Result<PageSequence, OcrError> {
        match input.kind {
            DocumentKind::Pdf => self.rasterize_pdf(&input.path, page_limit, scratch).await,
            DocumentKind::Image(format) => self.decode_image(&input.path, format).await,
        }
    }
}

/// Bind pdfium from `library_dir`, or from the system library path.
pub fn bind_pdfium(library_dir: Option<&Path>) -> Result<Pdfium, OcrError> {
    let bindings = match library_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| OcrError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Everything the blocking render thread needs, moved in one piece.
struct RenderJob {
    path: PathBuf,
    library_dir: Option<PathBuf>,
    max_pixels: u32,
    page_limit: usize,
    scratch: JobScratch,
}

impl RenderJob {
    fn run(
        self,
        count_tx: oneshot::Sender<Result<usize, OcrError>>,
        page_tx: mpsc::Sender<Result<PageImage, PageError>>,
    ) {
        let pdfium = match bind_pdfium(self.library_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => {
                let _ = count_tx.send(Err(e));
                return;
            }
        };

        let document = match pdfium.load_pdf_from_file(&self.path, None) {
            Ok(d) => d,
            Err(e) => {
                let _ = count_tx.send(Err(OcrError::CorruptPdf {
                    path: self.path.clone(),
                    detail: format!("{e:?}"),
                }));
                return;
            }
        };

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);
        if count_tx.send(Ok(total_pages)).is_err() {
            return;
        }

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        for idx in 0..total_pages.min(self.page_limit) {
            let item = self.render_one(&pages, idx, &render_config);
            let failed = item.is_err();
            if let Err(e) = &item {
                warn!("{}", e);
            }
            if page_tx.blocking_send(item).is_err() {
                debug!("Page consumer gone, stopping render at page {}", idx + 1);
                return;
            }
            if failed {
                return;
            }
        }
    }

    fn render_one(
        &self,
        pages: &PdfPages<'_>,
        idx: usize,
        render_config: &PdfRenderConfig,
    ) -> Result<PageImage, PageError> {
        let render_failed = |detail: String| PageError::RenderFailed {
            page: idx + 1,
            detail,
        };

        let page = pages
            .get(idx as u16)
            .map_err(|e| render_failed(format!("{e:?}")))?;
        let image = page
            .render_with_config(render_config)
            .map_err(|e| render_failed(format!("{e:?}")))?
            .as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        let temp_file = self.scratch.persist_page(idx, &image)?;
        Ok(PageImage {
            index: idx,
            image,
            temp_file: Some(temp_file),
        })
    }
}
