//! Fsevent enrichment.
//!
//! Changelog-style producers emit partial fsevents: instead of attribute
//! values they carry an enrichment request (see [`robinhood::fsevent`])
//! naming what must be fetched from the live filesystem. The [`Enricher`]
//! resolves those requests by looking the entry up through a filesystem
//! backend, producing full fsevents a mirror can apply.
//!
//! Enrichment happens per batch, after deduplication, and preserves event
//! order inside the batch.

use std::sync::Arc;

use log::{debug, warn};
use robinhood::fsevent::{ENRICH_KEY, ENRICH_LUSTRE, ENRICH_XATTRS};
use robinhood::{
    Backend, Error, Filter, FilterField, FilterOperator, FilterOptions, FilterOutput,
    FilterProjection, Fsentry, FsentryProperty, Fsevent, Id, Result, StatxMask, Value, ValueMap,
    XattrTarget,
};

/// Resolves partial fsevents against a live filesystem backend.
pub struct Enricher {
    backend: Arc<dyn Backend + Sync>,
    skip_error: bool,
}

impl Enricher {
    /// Create an enricher over `backend`.
    ///
    /// With `skip_error` set, an event that cannot be enriched (typically
    /// because the entry disappeared between the event and the lookup) is
    /// dropped with a warning; otherwise it fails the batch.
    pub fn new(backend: Arc<dyn Backend + Sync>, skip_error: bool) -> Self {
        Enricher {
            backend,
            skip_error,
        }
    }

    /// Whether enrichment failures drop the event instead of failing the
    /// batch.
    pub fn skip_error(&self) -> bool {
        self.skip_error
    }

    /// Out-of-band metadata describing the source backends feeding the
    /// mirror, suitable for [`crate::sink::Sink::insert_metadata`].
    pub fn source_backends(&self) -> ValueMap {
        let mut metadata = ValueMap::new();
        metadata.insert(
            "backend_source",
            Value::Sequence(vec![Value::String(self.backend.name().to_owned())]),
        );
        metadata
    }

    fn lookup(&self, id: &Id) -> Result<Fsentry> {
        let filter = Filter::compare(
            FilterOperator::Equal,
            FilterField::Id,
            Value::Binary(id.as_bytes().to_vec()),
        )?;
        let options = FilterOptions {
            limit: 1,
            one: true,
            ..Default::default()
        };
        let output = FilterOutput::Projection(FilterProjection {
            fsentry_mask: FsentryProperty::ALL,
            statx_mask: StatxMask::ALL,
            ..Default::default()
        });

        self.backend
            .filter(&filter, &options, &output)?
            .next()
            .ok_or(Error::NoEntry)?
    }

    /// Resolve the enrichment request of `event`, if it carries one.
    pub fn enrich(&self, mut event: Fsevent) -> Result<Fsevent> {
        if !event.is_partial() {
            return Ok(event);
        }

        let enrich = match event
            .xattrs_mut()
            .and_then(|xattrs| xattrs.remove(ENRICH_KEY))
        {
            Some(Value::Map(map)) => map,
            _ => ValueMap::new(),
        };

        if enrich.get(ENRICH_LUSTRE).is_some() {
            // Lustre attribute enrichment belongs to the lustre plugin.
            return Err(Error::NotSupported);
        }

        let entry = self.lookup(event.id())?;

        if let Some(Value::Uint32(mask_bits)) = enrich.get("statx") {
            if let (Fsevent::Upsert { statx, .. }, Some(entry_statx)) =
                (&mut event, entry.statx())
            {
                let mut fetched = *entry_statx;
                fetched.mask &= StatxMask::from_bits_truncate(*mask_bits);
                match statx {
                    Some(statx) => statx.merge(&fetched),
                    None => *statx = Some(fetched),
                }
            }
        }

        if enrich.get("symlink").is_some() {
            if let Fsevent::Upsert { symlink, .. } = &mut event {
                match entry.symlink() {
                    Some(target) => *symlink = Some(target.to_owned()),
                    None => debug!("entry has no symlink target to enrich with"),
                }
            }
        }

        if let Some(names) = enrich.get(ENRICH_XATTRS).and_then(Value::as_sequence) {
            for name in names {
                let Some(name) = name.as_str() else {
                    return Err(Error::invalid("requested xattr names must be strings"));
                };
                let value = match &event {
                    Fsevent::Xattr {
                        target: XattrTarget::Ns { .. },
                        ..
                    }
                    | Fsevent::Link { .. } => {
                        entry.ns_xattrs().and_then(|xattrs| xattrs.get(name))
                    }
                    _ => entry.find_inode_xattr(name),
                };
                match value {
                    Some(value) => {
                        let value = value.clone();
                        if let Some(xattrs) = event.xattrs_mut() {
                            xattrs.insert(name, value);
                        }
                    }
                    None => debug!("entry has no '{name}' xattr to enrich with"),
                }
            }
        }

        Ok(event)
    }
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("backend", &self.backend.name())
            .field("skip_error", &self.skip_error)
            .finish()
    }
}

/// An iterator adapter enriching each event of a batch.
pub struct EnrichIter<I> {
    events: I,
    enricher: Arc<Enricher>,
}

impl<I> EnrichIter<I> {
    /// Wrap `events`, enriching each one through `enricher`.
    pub fn new(events: I, enricher: Arc<Enricher>) -> Self {
        EnrichIter { events, enricher }
    }
}

impl<I: Iterator<Item = Fsevent>> Iterator for EnrichIter<I> {
    type Item = Result<Fsevent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let event = self.events.next()?;
            match self.enricher.enrich(event) {
                Ok(event) => return Some(Ok(event)),
                Err(err) if self.enricher.skip_error() => {
                    warn!("skipping fsevent that cannot be enriched: {err}");
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// An iterator adapter rejecting partial events.
///
/// Used when the destination is a mirror backend and no enricher is
/// configured: partial events cannot be applied, and silently dropping them
/// would corrupt the mirror.
pub struct NoPartial<I> {
    events: I,
}

impl<I> NoPartial<I> {
    /// Wrap `events`.
    pub fn new(events: I) -> Self {
        NoPartial { events }
    }
}

impl<I: Iterator<Item = Fsevent>> Iterator for NoPartial<I> {
    type Item = Result<Fsevent>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.events.next()?;
        if event.is_partial() {
            Some(Err(Error::invalid(
                "partial fsevent cannot be applied without an enricher",
            )))
        } else {
            Some(Ok(event))
        }
    }
}
