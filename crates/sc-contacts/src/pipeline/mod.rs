//! Batched fetch pipeline
//!
//! One blocking thread walks the store and cuts the walk into batches.
//! Up to `max_concurrency` batches are normalized at once on the blocking
//! pool, and each finished batch is merged into a single result set.
//!
//! ```text
//!   store ──> driver ──(limiter)──> worker × C ──> accumulator ──> caller
//! ```

pub mod accumulator;
pub mod driver;
pub mod limiter;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use sc_core::PipelineConfig;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::error::{ContactsError, Result};
use crate::models::{FetchRequest, NormalizedContact, RawContact};
use crate::store::ContactStore;

pub use accumulator::{Accumulated, ResultAccumulator};
pub use driver::{DriverOutcome, EnumerationDriver};
pub use limiter::{BatchPermit, ConcurrencyLimiter};
pub use worker::BatchWorker;

/// A contiguous slice of the enumeration, owned by one worker
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Position of the batch in the walk, from 0
    pub seq: u64,
    pub records: Vec<RawContact>,
}

/// What a worker hands to the accumulator
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub seq: u64,
    pub contacts: Vec<NormalizedContact>,
    /// Records that failed to normalize
    pub dropped: usize,
}

/// Cooperative cancellation for one fetch
///
/// Checked before each batch is submitted and before each batch starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Diagnostics for one completed fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSummary {
    /// Records read from the store
    pub total_seen: usize,
    /// Contacts returned to the caller
    pub delivered: usize,
    /// Records left out because they failed to normalize
    pub dropped: usize,
    pub batches: usize,
    /// Most batches in flight at once
    pub peak_concurrency: usize,
    pub elapsed_ms: u64,
}

/// Result of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub contacts: Vec<NormalizedContact>,
    pub summary: FetchSummary,
}

/// Runs one fetch at a time through driver, workers and accumulator
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Enumerate `store` and return every record that normalized
    ///
    /// Returns only once every dispatched batch has been merged or has
    /// failed. An enumeration error is reported ahead of a failed batch,
    /// and both ahead of cancellation.
    pub async fn run(
        &self,
        store: Arc<dyn ContactStore>,
        request: FetchRequest,
        cancel: CancellationFlag,
    ) -> Result<PipelineOutput> {
        let started = Instant::now();
        let limiter = ConcurrencyLimiter::new(self.config.max_concurrency);
        let accumulator = Arc::new(ResultAccumulator::new(
            self.config.initial_capacity,
            self.config.result_order,
        ));
        let worker = BatchWorker::new(request.fields.clone());

        info!(
            "Fetching from {} (batch size {}, concurrency {}, {} order)",
            store.name(),
            self.config.batch_size,
            limiter.capacity(),
            self.config.result_order
        );

        let driver = EnumerationDriver::new(
            self.config.batch_size,
            limiter.clone(),
            Arc::clone(&accumulator),
            worker,
            cancel.clone(),
        );
        let handle = Handle::current();

        let outcome = tokio::task::spawn_blocking(move || driver.run(store.as_ref(), &request, &handle))
            .await
            .map_err(|e| {
                error!("Enumeration thread failed: {}", e);
                ContactsError::Enumeration(format!("enumeration thread failed: {}", e))
            })?;

        let DriverOutcome {
            mut batches,
            total_seen,
            submitted,
            error: walk_error,
        } = outcome;

        // Quiescence: every batch joined, every permit back
        let mut batch_error = None;
        while let Some(joined) = batches.join_next().await {
            if let Err(e) = joined {
                error!("Batch task failed: {}", e);
                batch_error.get_or_insert_with(|| ContactsError::BatchFailed(e.to_string()));
            }
        }
        debug_assert!(limiter.is_idle());
        debug!(
            "Pipeline quiescent: {} of {} batches merged",
            accumulator.merged_batches(),
            submitted
        );

        let accumulated = accumulator.take();

        match first_failure(walk_error, batch_error, cancel.is_cancelled()) {
            Some(ContactsError::Cancelled) => {
                info!("Fetch cancelled after {} records", total_seen);
                return Err(ContactsError::Cancelled);
            }
            Some(e) => {
                error!("Fetch failed after {} records: {}", total_seen, e);
                return Err(e);
            }
            None => {}
        }

        let summary = FetchSummary {
            total_seen,
            delivered: accumulated.contacts.len(),
            dropped: accumulated.dropped,
            batches: accumulated.batches,
            peak_concurrency: limiter.peak(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Fetched {} contacts ({} dropped) in {} ms",
            summary.delivered, summary.dropped, summary.elapsed_ms
        );

        Ok(PipelineOutput {
            contacts: accumulated.contacts,
            summary,
        })
    }
}

/// Pick the error a fetch reports
///
/// Enumeration errors rank first, then failed batches, then cancellation.
/// The walk also stops with `Cancelled` when it sees the flag, so that case
/// is ranked with the flag rather than as a walk failure.
fn first_failure(
    walk_error: Option<ContactsError>,
    batch_error: Option<ContactsError>,
    cancelled: bool,
) -> Option<ContactsError> {
    let walk_cancelled = walk_error == Some(ContactsError::Cancelled);
    walk_error
        .filter(|e| *e != ContactsError::Cancelled)
        .or(batch_error)
        .or_else(|| (cancelled || walk_cancelled).then_some(ContactsError::Cancelled))
}
