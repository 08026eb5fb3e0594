//! Timeout supervisor: races job work against a deadline.
//!
//! The clock starts when a job is admitted (enters `running`), so time spent
//! queued at the gate never counts against it. On expiry the wrapped future
//! is dropped. Engine calls are built to stop when dropped (the tesseract
//! child is killed, an HTTP request is aborted); only `spawn_blocking` work
//! such as image normalisation keeps running detached, and its result is
//! discarded.

use crate::config::TimeoutScope;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// The deadline of one running job.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
    scope: TimeoutScope,
}

impl Deadline {
    /// Start the clock now.
    pub fn start(limit: Duration, scope: TimeoutScope) -> Self {
        Self {
            started: Instant::now(),
            limit,
            scope,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn scope(&self) -> TimeoutScope {
        self.scope
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Instant by which the next step must finish: the fixed job deadline, or
    /// a fresh one per page.
    pub fn step_deadline(&self) -> Instant {
        match self.scope {
            TimeoutScope::Job => self.started + self.limit,
            TimeoutScope::Page => Instant::now() + self.limit,
        }
    }

    /// Run `operation` under this deadline.
    pub async fn wrap<F, T>(&self, operation: F) -> Result<T, TimedOut>
    where
        F: Future<Output = T>,
    {
        wrap_until(operation, self.step_deadline(), self).await
    }
}

/// Run `operation` until `until`, reporting expiry against `deadline`.
pub async fn wrap_until<F, T>(operation: F, until: Instant, deadline: &Deadline) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    tokio::time::timeout_at(until, operation)
        .await
        .map_err(|_| TimedOut {
            elapsed: deadline.elapsed(),
            limit: deadline.limit,
        })
}

/// The deadline fired before the operation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut {
    pub elapsed: Duration,
    pub limit: Duration,
}
