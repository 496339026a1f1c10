//! Batching deduplicator over a source.
//!
//! The deduplicator pulls fsevents from a source into the
//! [pool](crate::pool::FseventPool) until the source pauses, runs dry or the
//! pool fills up, then flushes the pool into per-id batches. With a batch
//! size of zero the pool is bypassed entirely: every event becomes its own
//! single-event batch, in arrival order.

use robinhood::{Error, Fsevent, Id, Result};

use crate::pool::{FseventPool, PushOutcome};
use crate::source::Source;

/// One flushed unit of work: every pending event of one id, in merged
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// The id every event of this batch applies to.
    pub id: Id,
    /// The events, in the order the pool folded them.
    pub events: Vec<Fsevent>,
}

/// Pulls events from a source and produces deduplicated batches.
pub struct Deduplicator {
    source: Box<dyn Source>,
    pool: Option<FseventPool>,
    /// The event that filled the pool, replayed on the next round.
    held_back: Option<Fsevent>,
    flushes: u64,
}

impl Deduplicator {
    /// Create a deduplicator pulling from `source`.
    ///
    /// `batch_size` bounds the number of distinct ids deduplicated together;
    /// zero disables deduplication.
    pub fn new(batch_size: usize, source: Box<dyn Source>) -> Result<Self> {
        let pool = match batch_size {
            0 => None,
            size => Some(FseventPool::new(size)?),
        };
        Ok(Deduplicator {
            source,
            pool,
            held_back: None,
            flushes: 0,
        })
    }

    /// The source this deduplicator pulls from.
    pub fn source_mut(&mut self) -> &mut dyn Source {
        self.source.as_mut()
    }

    /// The number of flushes produced so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Produce the next round of batches, or `Ok(None)` once the source is
    /// exhausted and the pool drained.
    pub fn next_batches(&mut self) -> Result<Option<Vec<Batch>>> {
        let Some(pool) = &mut self.pool else {
            return self.next_without_dedup();
        };

        loop {
            let event = match self.held_back.take() {
                Some(event) => Some(event),
                None => self.source.next_event()?,
            };
            let Some(event) = event else {
                break;
            };

            match pool.push(&event)? {
                PushOutcome::Inserted => {}
                PushOutcome::Full => {
                    // A full pool is a flow-control signal: flush, then
                    // replay this event on the next round. It cannot fill
                    // the pool twice in a row.
                    self.held_back = Some(event);
                    break;
                }
            }
        }

        let batches: Vec<Batch> = pool
            .flush()
            .into_iter()
            .map(|(id, events)| Batch { id, events })
            .collect();
        if batches.is_empty() {
            return Ok(None);
        }

        let total = batches.iter().map(|batch| batch.events.len()).sum();
        self.source.save_batch(total, true);
        self.flushes += 1;
        Ok(Some(batches))
    }

    fn next_without_dedup(&mut self) -> Result<Option<Vec<Batch>>> {
        let Some(event) = self.source.next_event()? else {
            return Ok(None);
        };

        self.source.save_batch(1, false);
        self.flushes += 1;
        Ok(Some(vec![Batch {
            id: event.id().clone(),
            events: vec![event],
        }]))
    }

    /// Acknowledge every produced batch back to the source.
    pub fn ack_all(&mut self) -> Result<()> {
        for batch_id in 0..self.flushes {
            self.source.ack_batch(batch_id).map_err(|err| {
                Error::backend(format!("cannot acknowledge batch {batch_id}: {err}"))
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("source", &self.source.name())
            .field("dedup", &self.pool.is_some())
            .field("flushes", &self.flushes)
            .finish()
    }
}
