//! Concurrency gate: bounded admission to the OCR engine.
//!
//! A fair [`tokio::sync::Semaphore`] does the queueing: waiters are granted
//! slots strictly in arrival order and a later caller can never take a slot
//! ahead of an earlier one. Dropping a pending `acquire` future removes the
//! waiter from the queue, which is what makes cancellation clean.
//!
//! Each service owns its own gate, so tests build isolated instances instead
//! of sharing process-wide counters.

use crate::error::OcrError;
use crate::registry::{JobId, JobRegistry, JobStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Counting semaphore admitting at most `capacity` jobs at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Wait for a free slot. FIFO with respect to other callers.
    pub async fn acquire(&self) -> Result<GatePermit, OcrError> {
        let requested = Instant::now();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| OcrError::Internal("concurrency gate closed".into()))?;
        let waited = requested.elapsed();
        debug!(
            "Gate slot granted after {}ms ({}/{} active)",
            waited.as_millis(),
            self.active(),
            self.capacity
        );
        Ok(GatePermit {
            _permit: permit,
            waited,
        })
    }

    /// Like [`acquire`](Self::acquire), but gives up as soon as `cancel`
    /// fires. The abandoned waiter leaves the queue without taking a slot.
    pub async fn acquire_cancellable(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> Result<GatePermit, OcrError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OcrError::Cancelled { job_id }),
            permit = self.acquire() => permit,
        }
    }

    /// Point-in-time view combining slot usage with registry state.
    pub fn metrics(&self, registry: &JobRegistry) -> GateMetrics {
        GateMetrics {
            capacity: self.capacity,
            active: self.active(),
            queued: registry.count(JobStatus::Queued),
            running: registry.count(JobStatus::Running),
        }
    }
}

/// A granted slot. Released when dropped, so every exit path of the guarded
/// job gives the slot back.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
}

impl GatePermit {
    /// Time spent queued before the slot was granted.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Release the slot now and wake the longest-waiting caller.
    pub fn release(self) {}
}

/// Gate and registry counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateMetrics {
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
    pub running: usize,
}
