//! Temp-file janitor: periodic reclamation of stale scratch files.
//!
//! A file is deleted only when both hold:
//!
//! 1. it is at least `max_age` old, and
//! 2. its owning job (the name of its parent directory) is absent from the
//!    [`JobRegistry`] or already terminal.
//!
//! Files of a live job are never touched, however old, so a slow document can
//! never lose its page images mid-OCR. Files with no recognisable owner are
//! governed by age alone.

use crate::registry::{JobId, JobRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sweeps the shared scratch directory on a fixed interval.
#[derive(Debug, Clone)]
pub struct Janitor {
    root: PathBuf,
    max_age: Duration,
    interval: Duration,
    registry: JobRegistry,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub kept_live: usize,
    pub kept_young: usize,
    pub failed: usize,
}

impl Janitor {
    pub fn new(
        root: impl Into<PathBuf>,
        max_age: Duration,
        interval: Duration,
        registry: JobRegistry,
    ) -> Self {
        Self {
            root: root.into(),
            max_age,
            interval,
            registry,
        }
    }

    /// Run one sweep over the scratch root.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                warn!("Janitor cannot read {}: {}", self.root.display(), e);
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Janitor stopped listing {}: {}", self.root.display(), e);
                    break;
                }
            };
            let path = entry.path();
            let is_dir = match entry.file_type().await {
                Ok(t) => t.is_dir(),
                Err(_) => continue,
            };

            if is_dir {
                let owner = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<JobId>().ok());
                self.sweep_job_dir(&path, owner, &mut report).await;
            } else {
                report.scanned += 1;
                self.reclaim(&path, &mut report).await;
            }
        }

        debug!(
            "Janitor sweep: {} scanned, {} deleted, {} live, {} young",
            report.scanned, report.deleted, report.kept_live, report.kept_young
        );
        report
    }

    async fn sweep_job_dir(&self, dir: &Path, owner: Option<JobId>, report: &mut SweepReport) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let live = owner.is_some_and(|id| self.registry.is_live(id));

        while let Ok(Some(entry)) = entries.next_entry().await {
            report.scanned += 1;
            if live {
                report.kept_live += 1;
                continue;
            }
            self.reclaim(&entry.path(), report).await;
        }

        if !live {
            // Succeeds only once the directory is empty.
            if tokio::fs::remove_dir(dir).await.is_ok() {
                debug!("Janitor removed empty scratch dir {}", dir.display());
            }
        }
    }

    async fn reclaim(&self, path: &Path, report: &mut SweepReport) {
        let age = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
            Err(_) => {
                report.failed += 1;
                return;
            }
        };
        if age < self.max_age {
            report.kept_young += 1;
            return;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                report.deleted += 1;
                debug!("Purged stale temp file {}", path.display());
            }
            Err(e) => {
                report.failed += 1;
                warn!("Could not purge {}: {}", path.display(), e);
            }
        }
    }

    /// Run [`sweep`](Self::sweep) every `interval` on a background task.
    pub fn spawn(self) -> JanitorHandle {
        let token = CancellationToken::new();
        let stop = token.clone();
        info!(
            "Janitor started on {} (every {}ms, max age {}ms)",
            self.root.display(),
            self.interval.as_millis(),
            self.max_age.as_millis()
        );
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        if report.deleted > 0 {
                            info!("Janitor purged {} stale temp files", report.deleted);
                        }
                    }
                }
            }
        });
        JanitorHandle { token, task }
    }
}

/// Handle to a running janitor task.
#[derive(Debug)]
pub struct JanitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stop the janitor and wait for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Janitor task ended abnormally: {}", e);
        }
    }
}
