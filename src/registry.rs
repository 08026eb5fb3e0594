//! Job registry: the one shared `job id → status` map.
//!
//! The orchestrator is the only writer (the mutating methods are
//! crate-private). Gate metrics and the temp-file janitor only read it, so
//! "is this job still running?" has exactly one answer everywhere.

use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Identifier of one submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of an OCR job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    /// `queued → running | failed`, `running → completed | failed | timedOut`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

/// Shared, cheaply cloneable registry of in-flight jobs.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, JobStatus>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of a job, `None` once it has been deregistered.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.read(|jobs| jobs.get(&id).copied())
    }

    /// Registered and not yet terminal.
    pub fn is_live(&self, id: JobId) -> bool {
        self.status(id).is_some_and(|s| !s.is_terminal())
    }

    /// Number of registered jobs currently in `status`.
    pub fn count(&self, status: JobStatus) -> usize {
        self.read(|jobs| jobs.values().filter(|s| **s == status).count())
    }

    pub fn len(&self) -> usize {
        self.read(|jobs| jobs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered job.
    pub fn snapshot(&self) -> Vec<(JobId, JobStatus)> {
        self.read(|jobs| jobs.iter().map(|(id, s)| (*id, *s)).collect())
    }

    /// Insert a job as `queued`. The returned guard deregisters it on drop.
    pub(crate) fn register(&self, id: JobId) -> RegistrationGuard {
        self.write(|jobs| {
            jobs.insert(id, JobStatus::Queued);
        });
        RegistrationGuard {
            registry: self.clone(),
            id,
        }
    }

    pub(crate) fn transition(&self, id: JobId, next: JobStatus) -> Result<(), OcrError> {
        self.write(|jobs| {
            let current = jobs
                .get_mut(&id)
                .ok_or_else(|| OcrError::Internal(format!("job {id} is not registered")))?;
            if !current.can_transition_to(next) {
                return Err(OcrError::InvalidTransition {
                    job_id: id,
                    from: *current,
                    to: next,
                });
            }
            *current = next;
            Ok(())
        })
    }

    fn deregister(&self, id: JobId) {
        self.write(|jobs| {
            jobs.remove(&id);
        });
    }

    fn read<R>(&self, f: impl FnOnce(&HashMap<JobId, JobStatus>) -> R) -> R {
        let guard = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<JobId, JobStatus>) -> R) -> R {
        let mut guard = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Keeps a job registered for as long as it is alive.
///
/// Dropped after the result is assembled, or early when the caller drops the
/// `submit` future, so abandoned jobs never linger as "live".
#[derive(Debug)]
pub(crate) struct RegistrationGuard {
    registry: JobRegistry,
    id: JobId,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
