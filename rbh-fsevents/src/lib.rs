//! Collect fsevents from a source, deduplicate them and feed a mirror.
//!
//! This crate implements the event pipeline of the RobinHood suite:
//!
//! ```text
//! source → deduplication pool → (enricher) → sink(s)
//! ```
//!
//! [Sources](source::Source) produce fsevents (from a file of serialized
//! events, a Lustre changelog, ...); the [pool](pool::FseventPool) folds
//! redundant events for the same entry; the optional
//! [enricher](enrich::Enricher) completes partial events against a live
//! filesystem; [sinks](sink::Sink) apply batches to a mirror backend or
//! dump them to a file. The [pipeline](pipeline::run) connects them with
//! one producer and one consumer thread per sink.

#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod dedup;
pub mod enrich;
pub mod hash;
pub mod pipeline;
pub mod plugins;
pub mod pool;
pub mod sink;
pub mod source;
