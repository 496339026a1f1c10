//! End-to-end pipeline runs: source → pool → (enricher) → sinks.

use std::sync::{Arc, Mutex};

use rbh_fsevents::dedup::Deduplicator;
use rbh_fsevents::enrich::Enricher;
use rbh_fsevents::pipeline::{self, PipelineOptions};
use rbh_fsevents::sink::Sink;
use rbh_fsevents::source::Source;
use robinhood::fsevent::{ENRICH_KEY, ENRICH_XATTRS};
use robinhood::{
    Backend, Error, Filter, FilterOptions, FilterOutput, Fsentry, FsentryIterator, Fsevent, Id,
    Result, Value, ValueMap,
};

struct VecSource {
    events: std::vec::IntoIter<Fsevent>,
}

impl VecSource {
    fn new(events: Vec<Fsevent>) -> Box<Self> {
        Box::new(VecSource {
            events: events.into_iter(),
        })
    }
}

impl Source for VecSource {
    fn name(&self) -> &str {
        "vec"
    }

    fn next_event(&mut self) -> Result<Option<Fsevent>> {
        Ok(self.events.next())
    }
}

/// Records every event it receives, tagged with the sink's index.
struct MemorySink {
    index: usize,
    received: Arc<Mutex<Vec<(usize, Fsevent)>>>,
    fail_on: Option<Id>,
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn process(&mut self, fsevents: &mut dyn Iterator<Item = Result<Fsevent>>) -> Result<()> {
        for event in fsevents {
            let event = event?;
            if self.fail_on.as_ref() == Some(event.id()) {
                return Err(Error::backend("memory sink asked to fail"));
            }
            self.received.lock().unwrap().push((self.index, event));
        }
        Ok(())
    }
}

fn memory_sinks(
    count: usize,
    fail_on: Option<Id>,
) -> (Vec<Box<dyn Sink>>, Arc<Mutex<Vec<(usize, Fsevent)>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sinks = (0..count)
        .map(|index| {
            Box::new(MemorySink {
                index,
                received: received.clone(),
                fail_on: fail_on.clone(),
            }) as Box<dyn Sink>
        })
        .collect();
    (sinks, received)
}

fn id(byte: u8) -> Id {
    Id::new(vec![byte])
}

fn link(id_byte: u8, name: &str) -> Fsevent {
    Fsevent::link(id(id_byte), ValueMap::new(), Id::root_parent(), name)
}

#[test]
fn events_flow_from_source_to_sink() {
    let events = vec![link(1, "a"), link(2, "b"), link(3, "c")];
    let (sinks, received) = memory_sinks(1, None);

    let deduplicator = Deduplicator::new(10, VecSource::new(events.clone())).unwrap();
    pipeline::run(deduplicator, sinks, None, PipelineOptions::default()).unwrap();

    let received = received.lock().unwrap();
    let delivered: Vec<&Fsevent> = received.iter().map(|(_, event)| event).collect();
    assert_eq!(delivered, events.iter().collect::<Vec<_>>());
}

#[test]
fn cancelled_events_never_reach_the_sink() {
    let events = vec![
        link(1, "t"),
        Fsevent::unlink(id(1), Id::root_parent(), "t"),
        link(2, "kept"),
    ];
    let (sinks, received) = memory_sinks(1, None);

    let deduplicator = Deduplicator::new(10, VecSource::new(events)).unwrap();
    pipeline::run(deduplicator, sinks, None, PipelineOptions::default()).unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1, link(2, "kept"));
}

#[test]
fn per_id_ordering_is_preserved_across_workers() {
    // Small pool, many interleaved events: every id flushes several times,
    // across four workers.
    let mut events = Vec::new();
    for round in 0..16u8 {
        for entry in 0..8u8 {
            events.push(link(entry, &format!("round-{round}")));
        }
    }
    let (sinks, received) = memory_sinks(4, None);

    let deduplicator = Deduplicator::new(4, VecSource::new(events)).unwrap();
    pipeline::run(deduplicator, sinks, None, PipelineOptions::default()).unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 16 * 8);

    for entry in 0..8u8 {
        let for_entry: Vec<&(usize, Fsevent)> = received
            .iter()
            .filter(|(_, event)| event.id() == &id(entry))
            .collect();

        // Every event for one id lands on one worker...
        let workers: std::collections::HashSet<usize> =
            for_entry.iter().map(|(worker, _)| *worker).collect();
        assert_eq!(workers.len(), 1, "id {entry} visited several workers");

        // ... in emission order.
        let names: Vec<&str> = for_entry
            .iter()
            .filter_map(|(_, event)| match event {
                Fsevent::Link { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..16).map(|round| format!("round-{round}")).collect();
        assert_eq!(names, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }
}

#[test]
fn a_failing_sink_stops_the_pipeline() {
    let mut events = Vec::new();
    for round in 0..64u8 {
        events.push(link(round % 4, &format!("round-{round}")));
    }
    let (sinks, _received) = memory_sinks(2, Some(id(1)));

    let deduplicator = Deduplicator::new(2, VecSource::new(events)).unwrap();
    let result = pipeline::run(deduplicator, sinks, None, PipelineOptions::default());
    assert!(matches!(result, Err(Error::Backend(_))));
}

#[test]
fn no_dedup_mode_delivers_every_event() {
    let events = vec![link(1, "a"), link(1, "b"), link(1, "c")];
    let (sinks, received) = memory_sinks(2, None);

    let deduplicator = Deduplicator::new(0, VecSource::new(events.clone())).unwrap();
    pipeline::run(deduplicator, sinks, None, PipelineOptions::default()).unwrap();

    let received = received.lock().unwrap();
    let delivered: Vec<&Fsevent> = received.iter().map(|(_, event)| event).collect();
    assert_eq!(delivered, events.iter().collect::<Vec<_>>());
}

struct OneEntry {
    entry: Fsentry,
}

impl Backend for OneEntry {
    fn id(&self) -> u8 {
        1
    }

    fn name(&self) -> &str {
        "one-entry"
    }

    fn filter(
        &self,
        filter: &Filter,
        _options: &FilterOptions,
        _output: &FilterOutput,
    ) -> Result<FsentryIterator<'_>> {
        let matched = filter.matches(&self.entry);
        let entry = self.entry.clone();
        Ok(Box::new(matched.then_some(Ok(entry)).into_iter()))
    }
}

#[test]
fn partial_events_are_enriched_on_the_way() {
    let target = id(7);

    let mut inode_xattrs = ValueMap::new();
    inode_xattrs.insert("user.blob", Value::Binary(vec![1, 2, 3]));
    let entry = Fsentry::builder()
        .id(target.clone())
        .inode_xattrs(inode_xattrs)
        .build()
        .unwrap();
    let enricher = Arc::new(Enricher::new(Arc::new(OneEntry { entry }), false));

    let mut enrich = ValueMap::new();
    enrich.insert(
        ENRICH_XATTRS,
        Value::Sequence(vec![Value::String("user.blob".into())]),
    );
    let mut xattrs = ValueMap::new();
    xattrs.insert(ENRICH_KEY, Value::Map(enrich));
    let events = vec![Fsevent::inode_xattr(target.clone(), xattrs)];

    let (sinks, received) = memory_sinks(1, None);
    let deduplicator = Deduplicator::new(10, VecSource::new(events)).unwrap();
    pipeline::run(deduplicator, sinks, Some(enricher), PipelineOptions::default()).unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let event = &received[0].1;
    assert!(!event.is_partial());
    assert_eq!(
        event.find_xattr("user.blob"),
        Some(&Value::Binary(vec![1, 2, 3]))
    );
}

#[test]
fn partial_events_without_an_enricher_fail_backend_sinks() {
    let mut enrich = ValueMap::new();
    enrich.insert(ENRICH_XATTRS, Value::Sequence(vec![]));
    let mut xattrs = ValueMap::new();
    xattrs.insert(ENRICH_KEY, Value::Map(enrich));
    let events = vec![Fsevent::inode_xattr(id(1), xattrs)];

    let (sinks, _received) = memory_sinks(1, None);
    let deduplicator = Deduplicator::new(10, VecSource::new(events)).unwrap();
    let result = pipeline::run(
        deduplicator,
        sinks,
        None,
        PipelineOptions {
            allow_partials: false,
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}
