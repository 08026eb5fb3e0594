//! Per-job scratch space for intermediate page images.
//!
//! Every job writes under `<temp_dir>/<job_id>/`, so ownership of any file in
//! the shared directory can be read straight off its parent directory name.
//! The janitor relies on that layout.

use crate::error::{OcrError, PageError};
use crate::registry::JobId;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An intermediate file on disk, owned by one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempFile {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub owner_job_id: JobId,
}

/// The scratch directory of one job.
#[derive(Debug, Clone)]
pub struct JobScratch {
    job_id: JobId,
    dir: PathBuf,
}

impl JobScratch {
    /// Create `<root>/<job_id>/`.
    pub async fn create(root: &Path, job_id: JobId) -> Result<Self, OcrError> {
        let dir = root.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OcrError::Scratch {
                path: dir.clone(),
                source: e,
            })?;
        debug!("Scratch directory ready: {}", dir.display());
        Ok(Self { job_id, dir })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for the rendered image of a 0-based page index.
    pub fn page_path(&self, page_index: usize) -> PathBuf {
        self.dir.join(format!("page-{:04}.png", page_index + 1))
    }

    /// Write a rendered page as PNG. Blocking; call from a blocking context.
    pub fn persist_page(
        &self,
        page_index: usize,
        image: &DynamicImage,
    ) -> Result<TempFile, PageError> {
        let path = self.page_path(page_index);
        image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| PageError::RenderFailed {
                page: page_index + 1,
                detail: format!("could not write {}: {e}", path.display()),
            })?;
        Ok(TempFile {
            path,
            created_at: Utc::now(),
            owner_job_id: self.job_id,
        })
    }

    /// Remove the directory and everything in it. Failures are logged; the
    /// janitor picks up whatever is left once the job is gone.
    pub(crate) async fn remove(self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!("Removed scratch directory {}", self.dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove scratch directory {}: {}",
                self.dir.display(),
                e
            ),
        }
    }
}
