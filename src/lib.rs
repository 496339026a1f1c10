//! Core library for the RobinHood filesystem metadata mirror.
//!
//! RobinHood maintains a queryable mirror of filesystem metadata. Producers
//! (filesystem walkers, changelog readers) emit streams of typed
//! [fsevents](Fsevent) describing inode upserts, namespace links and
//! unlinks, deletions and extended-attribute changes; a consumer pipeline
//! deduplicates, enriches and applies them to a mirror. On the read side, a
//! policy engine evaluates structured [filters](Filter) over the mirrored
//! [fsentries](Fsentry).
//!
//! This crate holds the pieces everything else builds on: the data model
//! (values, ids, statx records, fsentries, fsevents), the filter algebra and
//! its in-memory evaluator, the URI scheme naming backends and entries, the
//! polymorphic [backend contract](Backend), a fixed-capacity probing hash
//! map, and the policy engine core. The event pipeline itself lives in the
//! `rbh-fsevents` crate; concrete backends (document stores, walkers,
//! changelog readers) live in theirs.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::backend::{
    AccumulatorField, Backend, FieldAccumulator, FilterOptions, FilterOutput, FilterProjection,
    FilterSort, FsentryIterator, GroupFields, InfoFlags, RangeField, ReportIterator,
};
pub use crate::error::{Error, Result};
pub use crate::filter::{Filter, FilterField, FilterOperator};
pub use crate::fsentry::{Fsentry, FsentryBuilder, FsentryProperty};
pub use crate::fsevent::{Fsevent, XattrTarget};
pub use crate::hashmap::ProbeMap;
pub use crate::id::{BackendId, FileHandle, Id, LUSTRE_ID_SIZE, LuFid};
pub use crate::policy::{Action, ActionCache, ActionKind, CommonOperations, Policy, Rule};
pub use crate::statx::{Statx, StatxAttributes, StatxMask, StatxTimestamp};
pub use crate::uri::{RawUri, Uri, UriVariant};
pub use crate::value::{RegexOptions, Value, ValueMap, ValueType};

pub mod backend;
pub mod error;
pub mod filter;
pub mod fsentry;
pub mod fsevent;
pub mod hashmap;
pub mod id;
pub mod policy;
pub mod statx;
pub mod uri;
pub mod value;
