//! `rbh-fsevents`: collect fsevents from a source and send them to a
//! destination, deduplicating and optionally enriching them on the way.

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use log::{LevelFilter, warn};
use rbh_fsevents::dedup::Deduplicator;
use rbh_fsevents::enrich::Enricher;
use rbh_fsevents::pipeline::{self, PipelineOptions};
use rbh_fsevents::plugins;
use rbh_fsevents::sink::{self, Sink};
use rbh_fsevents::source::{self, LimitedSource, Source};
use robinhood::{Error, Uri};

/// Collect changelog records from SOURCE, optionally enrich them with data
/// collected from a live filesystem, and send them to DESTINATION.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Source of fsevents: '-' for stdin, or a source URI
    /// (eg. src:file:/path/to/test, src:lustre:lustre-MDT0000).
    source: String,

    /// Destination: '-' for stdout, or a RobinHood URI (eg. rbh:mongo:test).
    destination: String,

    /// Number of fsevents to keep in memory for deduplication; 0 disables
    /// deduplication.
    #[arg(short, long, default_value_t = 100)]
    batch_size: usize,

    /// Path to a file where raw changelog records should be dumped; only
    /// valid with a Lustre source.
    #[arg(short, long)]
    dump: Option<String>,

    /// Enrich fsevents by querying MOUNTPOINT as needed; MOUNTPOINT is a
    /// RobinHood URI (eg. rbh:lustre:/mnt/lustre).
    #[arg(short, long, value_name = "MOUNTPOINT", conflicts_with = "raw")]
    enrich: Option<String>,

    /// Maximum number of changelog records to read; 0 means no limit.
    #[arg(short, long, default_value_t = 0)]
    max: u64,

    /// Treat enrichment errors as fatal instead of skipping the event.
    #[arg(short = 'n', long)]
    no_skip: bool,

    /// Number of workers used to enrich events and update the destination.
    #[arg(short = 'w', long, default_value_t = 1)]
    nb_workers: usize,

    /// Do not enrich changelog records (default).
    #[arg(short, long)]
    raw: bool,

    /// Report progress and timing information.
    #[arg(short, long)]
    verbose: bool,
}

fn build_source(args: &Args) -> anyhow::Result<Box<dyn Source>> {
    let source = source::source_from_arg(&args.source)
        .with_context(|| format!("invalid source '{}'", args.source))?;
    Ok(match args.max {
        0 => source,
        limit => Box::new(LimitedSource::new(source, limit)),
    })
}

fn build_sinks(args: &Args) -> anyhow::Result<Vec<Box<dyn Sink>>> {
    let mut sinks = Vec::with_capacity(args.nb_workers);
    for _ in 0..args.nb_workers.max(1) {
        sinks.push(
            sink::sink_from_arg(&args.destination)
                .with_context(|| format!("invalid destination '{}'", args.destination))?,
        );
    }
    Ok(sinks)
}

fn build_enricher(args: &Args) -> anyhow::Result<Option<Arc<Enricher>>> {
    let Some(uri) = &args.enrich else {
        return Ok(None);
    };
    let parsed = Uri::parse(uri).with_context(|| format!("invalid enrich URI '{uri}'"))?;
    let backend = plugins::filesystem_backend_from_uri(&parsed)
        .with_context(|| format!("cannot open enrich backend '{uri}'"))?;
    Ok(Some(Arc::new(Enricher::new(backend, !args.no_skip))))
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.dump.is_some() {
        // Only the changelog reader can dump raw records.
        bail!("--dump is only supported with a Lustre source");
    }

    let source = build_source(&args)?;
    let mut sinks = build_sinks(&args)?;
    let enricher = build_enricher(&args)?;

    if let Some(enricher) = &enricher {
        // Record which live backends feed this mirror.
        match sinks[0].insert_metadata(&enricher.source_backends()) {
            Ok(()) | Err(Error::NotSupported) => {}
            Err(err) => bail!("cannot record source backends in the destination: {err}"),
        }
    }

    let allow_partials = sinks[0].allows_partials();
    if enricher.is_none() && !allow_partials {
        warn!("raw records cannot be applied to a mirror; partial fsevents will be rejected");
    }

    let deduplicator = Deduplicator::new(args.batch_size, source)?;
    pipeline::run(
        deduplicator,
        sinks,
        enricher,
        PipelineOptions {
            allow_partials,
            ..Default::default()
        },
    )?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    if let Err(err) = run(args) {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}
