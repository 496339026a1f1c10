//! The producer/consumer pipeline driver.
//!
//! One producer (the caller's thread) pulls batches out of the
//! [`Deduplicator`] and dispatches them to `W` consumer threads, each
//! owning one sink. Dispatch is by a stable hash of the batch's id, so
//! every batch for a given id lands on the same consumer and per-id
//! ordering is observable at the sink without cross-consumer
//! synchronisation.
//!
//! A shared "in-process" set records the ids currently held by consumers:
//! the producer waits before dispatching another batch for an id already in
//! flight, and before exceeding the in-flight budget.
//!
//! Cancellation is cooperative. When the source is exhausted, the producer
//! sets the done flag and wakes every consumer; each drains its queue and
//! exits. The first per-batch error stops the pipeline and is reported to
//! the caller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use robinhood::{Error, Id, ProbeMap, Result};

use crate::dedup::{Batch, Deduplicator};
use crate::enrich::{EnrichIter, Enricher, NoPartial};
use crate::hash::consumer_index;
use crate::sink::Sink;

/// Knobs of a pipeline run.
#[derive(Clone, Copy, Debug)]
pub struct PipelineOptions {
    /// The maximum number of batches in flight at once; 0 picks a default
    /// proportional to the number of workers.
    pub max_in_flight: usize,
    /// Whether partial fsevents may reach the sinks unenriched. File sinks
    /// accept them; mirror backends do not.
    pub allow_partials: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            max_in_flight: 0,
            allow_partials: true,
        }
    }
}

struct ConsumerQueue {
    batches: Mutex<VecDeque<Batch>>,
    signal: Condvar,
}

struct Shared {
    in_process: Mutex<ProbeMap<Id, ()>>,
    available: Condvar,
    done: AtomicBool,
    failure: Mutex<Option<Error>>,
}

/// Run the pipeline to completion: one consumer thread per sink, the
/// producer loop on the caller's thread.
///
/// Returns once the source is exhausted and every batch has been processed,
/// or once the first error stopped the pipeline.
pub fn run(
    mut deduplicator: Deduplicator,
    sinks: Vec<Box<dyn Sink>>,
    enricher: Option<Arc<Enricher>>,
    options: PipelineOptions,
) -> Result<()> {
    if sinks.is_empty() {
        return Err(Error::invalid("the pipeline needs at least one sink"));
    }
    let workers = sinks.len();
    let max_in_flight = match options.max_in_flight {
        0 => workers * 2,
        bound => bound,
    };

    let shared = Arc::new(Shared {
        // Oversize the slot table; the producer bounds the occupancy.
        in_process: Mutex::new(ProbeMap::with_capacity(max_in_flight * 2)?),
        available: Condvar::new(),
        done: AtomicBool::new(false),
        failure: Mutex::new(None),
    });

    let mut queues = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for (index, mut sink) in sinks.into_iter().enumerate() {
        let queue = Arc::new(ConsumerQueue {
            batches: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
        });
        queues.push(queue.clone());

        let worker_shared = shared.clone();
        let worker_enricher = enricher.clone();
        let allow_partials = options.allow_partials;
        let spawned = thread::Builder::new()
            .name(format!("rbh-fsevents-worker-{index}"))
            .spawn(move || {
                consumer_loop(
                    index,
                    sink.as_mut(),
                    &queue,
                    &worker_shared,
                    worker_enricher,
                    allow_partials,
                )
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                shared.done.store(true, Ordering::Release);
                for queue in &queues {
                    queue.signal.notify_all();
                }
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(Error::backend(format!("cannot spawn worker {index}: {err}")));
            }
        }
    }

    info!("feeding {workers} worker(s), {max_in_flight} batches in flight at most");
    let produced = produce(&mut deduplicator, &queues, &shared, max_in_flight);

    shared.done.store(true, Ordering::Release);
    for queue in &queues {
        queue.signal.notify_all();
    }
    for handle in handles {
        let _ = handle.join();
    }

    produced?;
    if let Some(failure) = shared.failure.lock().take() {
        return Err(failure);
    }
    deduplicator.ack_all()
}

fn produce(
    deduplicator: &mut Deduplicator,
    queues: &[Arc<ConsumerQueue>],
    shared: &Shared,
    max_in_flight: usize,
) -> Result<()> {
    loop {
        if shared.done.load(Ordering::Acquire) {
            // A consumer failed; stop producing and let run() report it.
            return Ok(());
        }

        let Some(batches) = deduplicator.next_batches()? else {
            debug!("source exhausted after {} flush(es)", deduplicator.flushes());
            return Ok(());
        };

        for batch in batches {
            let index = consumer_index(&batch.id, queues.len());
            {
                let mut in_process = shared.in_process.lock();
                loop {
                    if shared.done.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    if !in_process.contains(&batch.id) && in_process.len() < max_in_flight {
                        break;
                    }
                    shared.available.wait(&mut in_process);
                }
                in_process.set(batch.id.clone(), ())?;
            }

            queues[index].batches.lock().push_back(batch);
            queues[index].signal.notify_one();
        }
    }
}

fn consumer_loop(
    index: usize,
    sink: &mut dyn Sink,
    queue: &ConsumerQueue,
    shared: &Shared,
    enricher: Option<Arc<Enricher>>,
    allow_partials: bool,
) {
    loop {
        let batch = {
            let mut batches = queue.batches.lock();
            loop {
                if let Some(batch) = batches.pop_front() {
                    break batch;
                }
                if shared.done.load(Ordering::Acquire) {
                    return;
                }
                queue.signal.wait(&mut batches);
            }
        };

        let id = batch.id.clone();
        let result = process_batch(sink, batch, enricher.as_ref(), allow_partials);

        {
            let mut in_process = shared.in_process.lock();
            let _ = in_process.pop(&id);
        }
        shared.available.notify_all();

        if let Err(err) = result {
            error!("worker {index}: cannot process a batch of fsevents: {err}");
            shared.failure.lock().get_or_insert(err);
            shared.done.store(true, Ordering::Release);
            shared.available.notify_all();
            return;
        }
    }
}

fn process_batch(
    sink: &mut dyn Sink,
    batch: Batch,
    enricher: Option<&Arc<Enricher>>,
    allow_partials: bool,
) -> Result<()> {
    let events = batch.events.into_iter();
    match enricher {
        Some(enricher) => sink.process(&mut EnrichIter::new(events, enricher.clone())),
        None if allow_partials => sink.process(&mut events.map(Ok)),
        None => sink.process(&mut NoPartial::new(events)),
    }
}
