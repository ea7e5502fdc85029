//! Concurrency limiter for batch jobs
//!
//! A FIFO-fair counting semaphore. The driver acquires a permit before it
//! hands a batch off; the worker drops it only after its results are merged.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ContactsError, Result};

/// Caps the number of batch jobs between dispatch and merge
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    peak: Arc<AtomicUsize>,
}

/// Slot held by one batch job until its results are merged
#[must_use = "dropping the permit releases the slot"]
pub struct BatchPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Create a limiter; a zero limit is raised to one
    pub fn new(max_concurrency: usize) -> Self {
        let capacity = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<BatchPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ContactsError::BatchFailed("concurrency limiter closed".to_string()))?;

        self.peak.fetch_max(self.in_flight(), Ordering::SeqCst);
        Ok(BatchPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Highest number of slots held at once so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// True when every slot is free
    pub fn is_idle(&self) -> bool {
        self.semaphore.available_permits() == self.capacity
    }
}
