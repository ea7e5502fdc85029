//! Batch worker

use std::sync::Arc;

use tracing::warn;

use super::{BatchJob, BatchOutput};
use crate::models::FieldSet;
use crate::normalizer::normalize;

/// Normalizes one batch at a time; holds no shared mutable state
#[derive(Clone)]
pub struct BatchWorker {
    fields: Arc<FieldSet>,
}

impl BatchWorker {
    pub fn new(fields: FieldSet) -> Self {
        Self {
            fields: Arc::new(fields),
        }
    }

    /// Normalize every record of the job, in order
    ///
    /// Records that fail to normalize are counted and left out.
    pub fn run(&self, job: BatchJob) -> BatchOutput {
        let mut contacts = Vec::with_capacity(job.records.len());
        let mut dropped = 0;

        for raw in &job.records {
            match normalize(raw, &self.fields) {
                Ok(contact) => contacts.push(contact),
                Err(e) => {
                    dropped += 1;
                    warn!("Dropping record in batch {}: {}", job.seq, e);
                }
            }
        }

        BatchOutput {
            seq: job.seq,
            contacts,
            dropped,
        }
    }
}
