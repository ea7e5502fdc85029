//! Result accumulator
//!
//! The only owner of the growing result set. Merges are serialized by a
//! mutex so two batches never interleave element by element.

use std::sync::{Mutex, PoisonError};

use sc_core::ResultOrder;
use tracing::debug;

use super::BatchOutput;
use crate::models::NormalizedContact;

/// Where one merged batch sits in the result set
#[derive(Debug, Clone, Copy)]
struct Segment {
    seq: u64,
    start: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct ResultSet {
    contacts: Vec<NormalizedContact>,
    segments: Vec<Segment>,
    dropped: usize,
}

/// Everything accumulated by the time the pipeline is quiescent
#[derive(Debug, Default)]
pub struct Accumulated {
    pub contacts: Vec<NormalizedContact>,
    pub dropped: usize,
    pub batches: usize,
}

pub struct ResultAccumulator {
    order: ResultOrder,
    inner: Mutex<ResultSet>,
}

impl ResultAccumulator {
    pub fn new(initial_capacity: usize, order: ResultOrder) -> Self {
        Self {
            order,
            inner: Mutex::new(ResultSet {
                contacts: Vec::with_capacity(initial_capacity),
                ..Default::default()
            }),
        }
    }

    /// Append one finished batch
    pub fn merge(&self, output: BatchOutput) {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let start = set.contacts.len();
        let len = output.contacts.len();
        grow_for(&mut set.contacts, len);

        set.contacts.extend(output.contacts);
        set.dropped += output.dropped;
        set.segments.push(Segment {
            seq: output.seq,
            start,
            len,
        });

        debug!(
            "Merged batch {} ({} contacts, {} total)",
            output.seq,
            len,
            set.contacts.len()
        );
    }

    /// Number of batches merged so far
    pub fn merged_batches(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .segments
            .len()
    }

    /// Current capacity of the result set
    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contacts
            .capacity()
    }

    /// Move the result set out, ordered per [`ResultOrder`]
    ///
    /// Only meaningful once every dispatched batch has merged.
    pub fn take(&self) -> Accumulated {
        let set = std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner));
        let batches = set.segments.len();

        let contacts = match self.order {
            ResultOrder::Arrival => set.contacts,
            ResultOrder::Enumeration => reorder(set.contacts, set.segments),
        };

        Accumulated {
            contacts,
            dropped: set.dropped,
            batches,
        }
    }
}

/// Double the capacity (at least) whenever `additional` does not fit
fn grow_for(contacts: &mut Vec<NormalizedContact>, additional: usize) {
    let needed = contacts.len() + additional;
    if needed <= contacts.capacity() {
        return;
    }

    let target = needed.max(contacts.capacity() * 2);
    contacts.reserve_exact(target - contacts.len());
}

/// Reassemble merged segments in batch sequence order
fn reorder(mut contacts: Vec<NormalizedContact>, mut segments: Vec<Segment>) -> Vec<NormalizedContact> {
    if segments.windows(2).all(|w| w[0].seq < w[1].seq) {
        return contacts;
    }

    let total = contacts.len();

    // Peel segments off the tail so every split_off is a suffix; an empty
    // segment sharing a start with a full one goes after it
    segments.sort_by(|a, b| b.start.cmp(&a.start).then(b.len.cmp(&a.len)));
    let mut chunks: Vec<(u64, Vec<NormalizedContact>)> = segments
        .iter()
        .map(|seg| {
            debug_assert_eq!(seg.start + seg.len, contacts.len());
            (seg.seq, contacts.split_off(seg.start))
        })
        .collect();

    chunks.sort_by_key(|(seq, _)| *seq);

    let mut ordered = Vec::with_capacity(total);
    for (_, chunk) in chunks {
        ordered.extend(chunk);
    }
    ordered
}
