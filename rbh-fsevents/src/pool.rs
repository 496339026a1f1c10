//! The fsevent deduplication pool.
//!
//! Changelog streams are extremely redundant: a file created, written and
//! removed within one batch needs no mirror update at all, and a thousand
//! writes to the same file collapse into one upsert. The pool holds up to a
//! fixed number of ids, folds every new event into the pending events of its
//! id, and flushes ids in the order their oldest pending event arrived.
//!
//! Folding rules, per incoming event type:
//!
//! - LINK goes to the *head* of the pending list, so later events for the
//!   same link see the link already present;
//! - UNLINK cancels a pending LINK with the same `(parent, name)`, both
//!   disappearing; otherwise it is appended;
//! - DELETE drops every pending event; one DELETE is kept only when a LINK
//!   was among the dropped events, otherwise the DELETE disappears too;
//! - UPSERT merges into a pending UPSERT (statx overlay, enrichment-request
//!   union);
//! - XATTR merges into a pending XATTR for the same target: concrete values
//!   overwrite per key, enrichment requests merge slot-wise.

use std::collections::VecDeque;

use robinhood::fsevent::{ENRICH_KEY, ENRICH_LUSTRE, ENRICH_XATTRS, XATTR_FID};
use robinhood::{Fsevent, Id, ProbeMap, Result, Value, ValueMap};
use smallvec::SmallVec;

/// What happened to a pushed event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushOutcome {
    /// The event was folded into the pool.
    Inserted,
    /// The pool already holds its maximum number of ids; nothing was
    /// inserted. Flush and push again.
    Full,
}

/// Pending events for one id.
///
/// Lists stay short by construction, merging collapses them.
type Pending = SmallVec<[Fsevent; 4]>;

/// A bounded, id-indexed batch of fsevents that folds redundant events.
#[derive(Debug)]
pub struct FseventPool {
    index: ProbeMap<Id, Pending>,
    order: VecDeque<Id>,
    capacity: usize,
}

impl FseventPool {
    /// Create a pool holding at most `capacity` distinct ids.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(FseventPool {
            // Oversize the slot table so probing stays short of capacity.
            index: ProbeMap::with_capacity((capacity * 100 / 70).max(capacity))?,
            order: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// The number of ids currently pooled.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the pool holds no event at all.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether the pool holds its maximum number of ids.
    pub fn is_full(&self) -> bool {
        self.order.len() == self.capacity
    }

    /// Fold `event` into the pool.
    ///
    /// Returns [`PushOutcome::Full`] without inserting when the pool already
    /// holds its maximum number of ids; the caller is expected to flush and
    /// push the event again.
    pub fn push(&mut self, event: &Fsevent) -> Result<PushOutcome> {
        if self.is_full() {
            return Ok(PushOutcome::Full);
        }

        if self.index.contains(event.id()) {
            self.merge(event)?;
            return Ok(PushOutcome::Inserted);
        }

        let mut pending = Pending::new();
        pending.push(event.clone());
        self.index.set(event.id().clone(), pending)?;
        self.order.push_back(event.id().clone());
        Ok(PushOutcome::Inserted)
    }

    fn forget(&mut self, id: &Id) {
        let _ = self.index.pop(id);
        if let Some(position) = self.order.iter().position(|pooled| pooled == id) {
            self.order.remove(position);
        }
    }

    fn merge(&mut self, event: &Fsevent) -> Result<()> {
        let pending = self.index.get_mut(event.id())?;

        let drop_id = match event {
            // Insert new links before any other pending action.
            Fsevent::Link { .. } => {
                pending.insert(0, event.clone());
                false
            }
            Fsevent::Unlink {
                parent_id, name, ..
            } => {
                let cancelled = pending.iter().position(|pooled| {
                    matches!(pooled, Fsevent::Link { parent_id: p, name: n, .. }
                             if p == parent_id && n == name)
                });
                match cancelled {
                    Some(position) => {
                        pending.remove(position);
                        pending.is_empty()
                    }
                    None => {
                        pending.push(event.clone());
                        false
                    }
                }
            }
            Fsevent::Delete { .. } => {
                let link_was_pending = pending
                    .iter()
                    .any(|pooled| matches!(pooled, Fsevent::Link { .. }));
                pending.clear();
                if link_was_pending {
                    pending.push(event.clone());
                    false
                } else {
                    // The delete itself is absorbed with them.
                    true
                }
            }
            Fsevent::Upsert { .. } => {
                let cached = pending
                    .iter_mut()
                    .find(|pooled| matches!(pooled, Fsevent::Upsert { .. }));
                match cached {
                    Some(cached) => merge_upsert(cached, event),
                    None => pending.push(event.clone()),
                }
                false
            }
            Fsevent::Xattr { target, .. } => {
                let cached = pending.iter_mut().find(|pooled| {
                    matches!(pooled, Fsevent::Xattr { target: pooled_target, .. }
                             if pooled_target == target)
                });
                match cached {
                    Some(cached) => merge_xattr(cached, event),
                    None => pending.push(event.clone()),
                }
                false
            }
        };

        if drop_id {
            self.forget(event.id());
        }
        Ok(())
    }

    /// Drain the pool, oldest id first.
    ///
    /// Events inside one id keep their merged order; ids come out in the
    /// order their oldest pending event arrived. At most one pool's worth of
    /// ids is drained per flush.
    pub fn flush(&mut self) -> Vec<(Id, Vec<Fsevent>)> {
        let mut batches = Vec::with_capacity(self.order.len().min(self.capacity));
        while batches.len() < self.capacity {
            let Some(id) = self.order.pop_front() else {
                break;
            };
            let pending = self.index.pop(&id).unwrap_or_default();
            batches.push((id, pending.into_vec()));
        }
        batches
    }
}

fn merge_upsert(cached: &mut Fsevent, incoming: &Fsevent) {
    let (
        Fsevent::Upsert {
            xattrs: cached_xattrs,
            statx: cached_statx,
            symlink: cached_symlink,
            ..
        },
        Fsevent::Upsert {
            xattrs: incoming_xattrs,
            statx: incoming_statx,
            symlink: incoming_symlink,
            ..
        },
    ) = (cached, incoming)
    else {
        return;
    };

    if let Some(incoming_statx) = incoming_statx {
        match cached_statx {
            Some(statx) => statx.merge(incoming_statx),
            None => *cached_statx = Some(*incoming_statx),
        }
    }
    if incoming_symlink.is_some() {
        *cached_symlink = incoming_symlink.clone();
    }
    merge_xattr_maps(cached_xattrs, incoming_xattrs);
}

fn merge_xattr(cached: &mut Fsevent, incoming: &Fsevent) {
    let (
        Fsevent::Xattr {
            xattrs: cached_xattrs,
            ..
        },
        Fsevent::Xattr {
            xattrs: incoming_xattrs,
            ..
        },
    ) = (cached, incoming)
    else {
        return;
    };

    merge_xattr_maps(cached_xattrs, incoming_xattrs);
}

/// Merge the xattrs of an incoming event into a pooled one.
///
/// Concrete values overwrite per key; the `rbh-fsevents` enrichment request
/// is merged slot-wise instead of replaced wholesale.
fn merge_xattr_maps(cached: &mut ValueMap, incoming: &ValueMap) {
    for (key, value) in incoming.iter() {
        let mergeable = key == ENRICH_KEY
            && matches!(cached.get(ENRICH_KEY), Some(Value::Map(_)))
            && value.as_map().is_some();
        if mergeable {
            if let (Some(Value::Map(cached_enrich)), Some(incoming_enrich)) =
                (cached.get_mut(ENRICH_KEY), value.as_map())
            {
                merge_enrich_maps(cached_enrich, incoming_enrich);
            }
        } else {
            cached.insert(key, value.clone());
        }
    }
    normalize_xattrs(cached);
}

/// Merge two enrichment requests.
///
/// Requested xattr names are unioned, statx masks are OR'd, markers are
/// kept; everything else overwrites per slot.
fn merge_enrich_maps(cached: &mut ValueMap, incoming: &ValueMap) {
    for (key, value) in incoming.iter() {
        match key {
            ENRICH_XATTRS => {
                let unionable = matches!(cached.get(ENRICH_XATTRS), Some(Value::Sequence(_)))
                    && value.as_sequence().is_some();
                if !unionable {
                    cached.insert(key, value.clone());
                    continue;
                }
                if let (Some(Value::Sequence(names)), Some(incoming_names)) =
                    (cached.get_mut(ENRICH_XATTRS), value.as_sequence())
                {
                    for name in incoming_names {
                        if !names.contains(name) {
                            names.push(name.clone());
                        }
                    }
                }
            }
            "statx" => {
                let both_masks = matches!(
                    (cached.get("statx"), value),
                    (Some(Value::Uint32(_)), Value::Uint32(_))
                );
                if !both_masks {
                    cached.insert(key, value.clone());
                    continue;
                }
                if let (Some(Value::Uint32(cached_mask)), Value::Uint32(incoming_mask)) =
                    (cached.get_mut("statx"), value)
                {
                    *cached_mask |= *incoming_mask;
                }
            }
            _ => {
                if cached.get(key).is_none() {
                    cached.insert(key, value.clone());
                }
            }
        }
    }
    normalize_enrich(cached);
}

/// Keep the merged xattrs in their canonical order: the `fid` xattr first
/// when present, then the enrichment request, then everything else.
fn normalize_xattrs(xattrs: &mut ValueMap) {
    let fid = xattrs.remove(XATTR_FID);
    let enrich = xattrs.remove(ENRICH_KEY);
    let rest = std::mem::take(xattrs);

    if let Some(fid) = fid {
        xattrs.insert(XATTR_FID, fid);
    }
    if let Some(enrich) = enrich {
        xattrs.insert(ENRICH_KEY, enrich);
    }
    for (key, value) in rest {
        xattrs.insert(key, value);
    }
}

/// Inside the enrichment request, `xattrs` precedes `lustre` when both
/// occur.
fn normalize_enrich(enrich: &mut ValueMap) {
    let names = enrich.remove(ENRICH_XATTRS);
    let lustre = enrich.remove(ENRICH_LUSTRE);
    let rest = std::mem::take(enrich);

    if let Some(names) = names {
        enrich.insert(ENRICH_XATTRS, names);
    }
    if let Some(lustre) = lustre {
        enrich.insert(ENRICH_LUSTRE, lustre);
    }
    for (key, value) in rest {
        enrich.insert(key, value);
    }
}
