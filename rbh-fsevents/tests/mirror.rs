//! Feeding an in-memory mirror backend and reading it back.
//!
//! These tests drive the whole contract: fsevents flow through the pool and
//! the pipeline into a backend sink, the mirror applies them through its
//! `update` operation, and the policy engine evaluates filters over what
//! the mirror serves back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rbh_fsevents::dedup::Deduplicator;
use rbh_fsevents::pipeline::{self, PipelineOptions};
use rbh_fsevents::sink::{BackendSink, Sink};
use rbh_fsevents::source::Source;
use robinhood::{
    Backend, CommonOperations, Error, Filter, FilterField, FilterOperator, FilterOptions,
    FilterOutput, Fsentry, FsentryIterator, Fsevent, Id, Policy, Result, Rule, Statx, StatxMask,
    Value, ValueMap, XattrTarget, policy,
};

#[derive(Default)]
struct Inode {
    statx: Option<Statx>,
    symlink: Option<String>,
    xattrs: ValueMap,
}

struct Link {
    id: Id,
    parent_id: Id,
    name: String,
    ns_xattrs: ValueMap,
}

#[derive(Default)]
struct Mirror {
    inodes: HashMap<Id, Inode>,
    links: Vec<Link>,
}

impl Mirror {
    fn apply(&mut self, event: Fsevent) -> Result<()> {
        if event.is_partial() {
            return Err(Error::invalid("cannot apply a partial fsevent"));
        }

        match event {
            Fsevent::Upsert {
                id,
                xattrs,
                statx,
                symlink,
            } => {
                let inode = self.inodes.entry(id).or_default();
                if let Some(statx) = statx {
                    match &mut inode.statx {
                        Some(current) => current.merge(&statx),
                        None => inode.statx = Some(statx),
                    }
                }
                if symlink.is_some() {
                    inode.symlink = symlink;
                }
                for (key, value) in xattrs {
                    inode.xattrs.insert(key, value);
                }
            }
            Fsevent::Link {
                id,
                xattrs,
                parent_id,
                name,
            } => {
                self.inodes.entry(id.clone()).or_default();
                self.links
                    .retain(|link| !(link.id == id && link.parent_id == parent_id && link.name == name));
                self.links.push(Link {
                    id,
                    parent_id,
                    name,
                    ns_xattrs: xattrs,
                });
            }
            Fsevent::Unlink {
                id,
                parent_id,
                name,
            } => {
                self.links
                    .retain(|link| !(link.id == id && link.parent_id == parent_id && link.name == name));
            }
            Fsevent::Delete { id } => {
                self.inodes.remove(&id);
                self.links.retain(|link| link.id != id);
            }
            Fsevent::Xattr { id, xattrs, target } => match target {
                XattrTarget::Inode => {
                    let inode = self.inodes.entry(id).or_default();
                    for (key, value) in xattrs {
                        inode.xattrs.insert(key, value);
                    }
                }
                XattrTarget::Ns { parent_id, name } => {
                    let link = self
                        .links
                        .iter_mut()
                        .find(|link| {
                            link.id == id && link.parent_id == parent_id && link.name == name
                        })
                        .ok_or(Error::NoEntry)?;
                    for (key, value) in xattrs {
                        link.ns_xattrs.insert(key, value);
                    }
                }
            },
        }
        Ok(())
    }

    fn entries(&self) -> Vec<Fsentry> {
        self.links
            .iter()
            .map(|link| {
                let inode = &self.inodes[&link.id];
                let mut builder = Fsentry::builder()
                    .id(link.id.clone())
                    .parent_id(link.parent_id.clone())
                    .name(link.name.clone())
                    .ns_xattrs(link.ns_xattrs.clone())
                    .inode_xattrs(inode.xattrs.clone());
                if let Some(statx) = inode.statx {
                    builder = builder.statx(statx);
                }
                if let Some(symlink) = &inode.symlink {
                    builder = builder.symlink(symlink.clone());
                }
                builder.build().expect("mirror holds consistent entries")
            })
            .collect()
    }
}

/// A shareable handle over one mirror; every clone sees the same state.
#[derive(Clone)]
struct MemoryMirror {
    mirror: Arc<Mutex<Mirror>>,
}

impl MemoryMirror {
    fn new() -> Self {
        MemoryMirror {
            mirror: Arc::new(Mutex::new(Mirror::default())),
        }
    }
}

impl Backend for MemoryMirror {
    fn id(&self) -> u8 {
        200
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn update(&mut self, fsevents: &mut dyn Iterator<Item = Result<Fsevent>>) -> Result<usize> {
        let mut mirror = self.mirror.lock().unwrap();
        let mut applied = 0;
        for event in fsevents {
            mirror.apply(event?)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn filter(
        &self,
        filter: &Filter,
        options: &FilterOptions,
        _output: &FilterOutput,
    ) -> Result<FsentryIterator<'_>> {
        let mut matched: Vec<Result<Fsentry>> = self
            .mirror
            .lock()
            .unwrap()
            .entries()
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .skip(options.skip)
            .map(Ok)
            .collect();
        if options.limit > 0 {
            matched.truncate(options.limit);
        }
        Ok(Box::new(matched.into_iter()))
    }
}

struct VecSource {
    events: std::vec::IntoIter<Fsevent>,
}

impl Source for VecSource {
    fn name(&self) -> &str {
        "vec"
    }

    fn next_event(&mut self) -> Result<Option<Fsevent>> {
        Ok(self.events.next())
    }
}

fn id(byte: u8) -> Id {
    Id::new(vec![byte])
}

/// LINK + UPSERT + namespace path for one regular file.
fn create_file(events: &mut Vec<Fsevent>, id_byte: u8, name: &str, size: u64) {
    let mut ns = ValueMap::new();
    ns.insert("path", Value::String(format!("/{name}")));
    events.push(Fsevent::link(id(id_byte), ns, Id::root_parent(), name));

    let statx = Statx {
        mask: StatxMask::TYPE | StatxMask::SIZE,
        mode: 0o100644,
        size,
        ..Default::default()
    };
    events.push(Fsevent::upsert(id(id_byte), ValueMap::new(), Some(statx), None).unwrap());
}

fn feed(mirror: &MemoryMirror, events: Vec<Fsevent>, batch_size: usize, workers: usize) {
    let sinks: Vec<Box<dyn Sink>> = (0..workers)
        .map(|_| Box::new(BackendSink::new(Box::new(mirror.clone()))) as Box<dyn Sink>)
        .collect();
    let deduplicator = Deduplicator::new(
        batch_size,
        Box::new(VecSource {
            events: events.into_iter(),
        }),
    )
    .unwrap();
    pipeline::run(deduplicator, sinks, None, PipelineOptions::default()).unwrap();
}

#[test]
fn the_mirror_reflects_the_event_stream() {
    let mirror = MemoryMirror::new();
    let mut events = Vec::new();
    create_file(&mut events, 1, "small", 10);
    create_file(&mut events, 2, "large", 4096);
    // A file created and removed within the batch never reaches the mirror.
    create_file(&mut events, 3, "ephemeral", 1);
    events.push(Fsevent::unlink(id(3), Id::root_parent(), "ephemeral"));
    events.push(Fsevent::delete(id(3)));

    feed(&mirror, events, 10, 2);

    let everything = mirror
        .filter(
            &Filter::Null,
            &FilterOptions::default(),
            &FilterOutput::default(),
        )
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    let mut names: Vec<&str> = everything
        .iter()
        .filter_map(|entry| entry.name())
        .collect();
    names.sort_unstable();
    assert_eq!(names, ["large", "small"]);
}

#[test]
fn upserts_for_one_file_collapse_into_the_final_state() {
    let mirror = MemoryMirror::new();
    let mut events = Vec::new();
    create_file(&mut events, 1, "grown", 10);
    for size in [100, 1000, 10_000] {
        let statx = Statx {
            mask: StatxMask::SIZE,
            size,
            ..Default::default()
        };
        events.push(Fsevent::upsert(id(1), ValueMap::new(), Some(statx), None).unwrap());
    }

    feed(&mirror, events, 10, 1);

    let sized = mirror
        .filter(
            &Filter::compare(
                FilterOperator::Equal,
                FilterField::Statx(StatxMask::SIZE),
                Value::Uint64(10_000),
            )
            .unwrap(),
            &FilterOptions::default(),
            &FilterOutput::default(),
        )
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(sized.len(), 1);
    assert_eq!(sized[0].name(), Some("grown"));
}

#[derive(Default)]
struct Recorder {
    deleted: Mutex<Vec<String>>,
    logged: Mutex<Vec<String>>,
}

impl CommonOperations for Recorder {
    fn delete_entry(&self, entry: &Fsentry) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push(entry.path().unwrap_or("").to_owned());
        Ok(())
    }

    fn log_entry(&self, entry: &Fsentry) -> Result<()> {
        self.logged
            .lock()
            .unwrap()
            .push(entry.path().unwrap_or("").to_owned());
        Ok(())
    }
}

#[test]
fn the_policy_engine_runs_over_mirrored_entries() {
    let mirror = MemoryMirror::new();
    let mut events = Vec::new();
    create_file(&mut events, 1, "keep.log", 10);
    create_file(&mut events, 2, "purge.dat", 1 << 20);

    feed(&mirror, events, 10, 1);

    let purge_large = Policy {
        name: "purge-large".into(),
        filter: Filter::Null,
        action: "common:log".into(),
        parameters: None,
        rules: vec![Rule {
            name: "large-files".into(),
            filter: Filter::compare(
                FilterOperator::StrictlyGreater,
                FilterField::Statx(StatxMask::SIZE),
                Value::Uint64(1024),
            )
            .unwrap(),
            action: "common:delete".into(),
            parameters: None,
        }],
    };

    let entries = mirror
        .filter(
            &purge_large.filter,
            &FilterOptions::default(),
            &FilterOutput::default(),
        )
        .unwrap();
    let recorder = Recorder::default();
    let failed = policy::execute(entries, &purge_large, "/mnt", &recorder).unwrap();

    assert_eq!(failed, 0);
    assert_eq!(*recorder.deleted.lock().unwrap(), ["/purge.dat"]);
    assert_eq!(*recorder.logged.lock().unwrap(), ["/keep.log"]);
}
