//! Enumeration driver
//!
//! Runs on its own blocking thread. Reads the store lazily, fills a buffer
//! of `batch_size` records, and hands each full buffer to a worker without
//! waiting for it. The only wait is for a limiter slot.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::accumulator::ResultAccumulator;
use super::limiter::ConcurrencyLimiter;
use super::worker::BatchWorker;
use super::{BatchJob, CancellationFlag};
use crate::error::{ContactsError, Result};
use crate::models::{FetchRequest, RawContact};
use crate::store::ContactStore;

/// How often the walk reports progress
const PROGRESS_INTERVAL: usize = 1000;

/// What the walk left behind for the orchestrator to drain
pub struct DriverOutcome {
    /// Every dispatched batch, still running or finished
    pub batches: JoinSet<()>,
    /// Records read from the store (diagnostics only)
    pub total_seen: usize,
    /// Batches handed to workers
    pub submitted: u64,
    /// Set when the walk stopped early
    pub error: Option<ContactsError>,
}

pub struct EnumerationDriver {
    batch_size: usize,
    limiter: ConcurrencyLimiter,
    accumulator: Arc<ResultAccumulator>,
    worker: BatchWorker,
    cancel: CancellationFlag,
}

/// Mutable state of one walk
struct Walk {
    batches: JoinSet<()>,
    buffer: Vec<RawContact>,
    total_seen: usize,
    next_seq: u64,
}

impl EnumerationDriver {
    pub fn new(
        batch_size: usize,
        limiter: ConcurrencyLimiter,
        accumulator: Arc<ResultAccumulator>,
        worker: BatchWorker,
        cancel: CancellationFlag,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            limiter,
            accumulator,
            worker,
            cancel,
        }
    }

    /// Walk the store to the end or to the first failure
    ///
    /// Must be called off the async runtime; `handle` is used to wait for
    /// limiter slots and to spawn workers.
    pub fn run(self, store: &dyn ContactStore, request: &FetchRequest, handle: &Handle) -> DriverOutcome {
        let mut walk = Walk {
            batches: JoinSet::new(),
            buffer: Vec::with_capacity(self.batch_size),
            total_seen: 0,
            next_seq: 0,
        };

        let error = self.walk(store, request, handle, &mut walk).err();

        match &error {
            Some(e) => warn!(
                "Enumeration of {} stopped after {} records: {}",
                store.name(),
                walk.total_seen,
                e
            ),
            None => info!(
                "Enumerated {} records from {} in {} batches",
                walk.total_seen,
                store.name(),
                walk.next_seq
            ),
        }

        DriverOutcome {
            batches: walk.batches,
            total_seen: walk.total_seen,
            submitted: walk.next_seq,
            error,
        }
    }

    fn walk(
        &self,
        store: &dyn ContactStore,
        request: &FetchRequest,
        handle: &Handle,
        walk: &mut Walk,
    ) -> Result<()> {
        let stream = store.enumerate(request)?;

        for item in stream {
            let raw = item?;
            walk.total_seen += 1;
            if walk.total_seen % PROGRESS_INTERVAL == 0 {
                debug!("Enumerated {} records so far", walk.total_seen);
            }

            walk.buffer.push(raw);
            if walk.buffer.len() >= self.batch_size {
                let records = std::mem::replace(&mut walk.buffer, Vec::with_capacity(self.batch_size));
                self.submit(walk, records, handle)?;
            }
        }

        if !walk.buffer.is_empty() {
            let records = std::mem::take(&mut walk.buffer);
            self.submit(walk, records, handle)?;
        }

        Ok(())
    }

    /// Hand one batch to a worker, waiting for a limiter slot first
    fn submit(&self, walk: &mut Walk, records: Vec<RawContact>, handle: &Handle) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ContactsError::Cancelled);
        }

        let permit = handle.block_on(self.limiter.acquire())?;

        let job = BatchJob {
            seq: walk.next_seq,
            records,
        };
        walk.next_seq += 1;

        debug!(
            "Dispatching batch {} ({} records, {} in flight)",
            job.seq,
            job.records.len(),
            self.limiter.in_flight()
        );

        let worker = self.worker.clone();
        let accumulator = Arc::clone(&self.accumulator);
        let cancel = self.cancel.clone();

        walk.batches.spawn_blocking_on(
            move || {
                if cancel.is_cancelled() {
                    debug!("Skipping batch {} after cancellation", job.seq);
                    drop(permit);
                    return;
                }

                let output = worker.run(job);
                accumulator.merge(output);
                // Released only once the merge is done
                drop(permit);
            },
            handle,
        );

        Ok(())
    }
}
