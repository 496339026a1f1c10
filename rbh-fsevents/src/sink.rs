//! Fsevent sinks.
//!
//! A sink consumes batches of fsevents: either a mirror backend applying
//! them through its `update` operation, or a file of serialized events (the
//! destination `-`, and the `--dump` output).

use std::io::Write;

use log::debug;
use robinhood::{Backend, Error, Fsevent, Result, Uri, ValueMap};

/// A consumer of fsevent batches.
pub trait Sink: Send {
    /// The sink's name, mostly for logging purposes.
    fn name(&self) -> &str;

    /// Apply one batch of fsevents, in order.
    ///
    /// The first failed event fails the whole batch.
    fn process(&mut self, fsevents: &mut dyn Iterator<Item = Result<Fsevent>>) -> Result<()>;

    /// Record out-of-band metadata about the mirror.
    fn insert_metadata(&mut self, metadata: &ValueMap) -> Result<()> {
        let _ = metadata;
        Err(Error::NotSupported)
    }

    /// Whether this sink can apply partial fsevents.
    ///
    /// Mirror backends cannot: partial events must be enriched first.
    fn allows_partials(&self) -> bool {
        true
    }
}

/// A sink applying fsevents to a mirror backend.
pub struct BackendSink {
    backend: Box<dyn Backend>,
    name: String,
}

impl BackendSink {
    /// Wrap a backend into a sink.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        let name = format!("backend:{}", backend.name());
        BackendSink { backend, name }
    }
}

impl Sink for BackendSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, fsevents: &mut dyn Iterator<Item = Result<Fsevent>>) -> Result<()> {
        let applied = self.backend.update(fsevents)?;
        debug!("{}: applied {applied} fsevents", self.name);
        Ok(())
    }

    fn insert_metadata(&mut self, metadata: &ValueMap) -> Result<()> {
        self.backend.insert_metadata(metadata)
    }

    fn allows_partials(&self) -> bool {
        false
    }
}

/// A sink writing bincode-framed fsevents to a writer.
pub struct FileSink<W> {
    writer: W,
    name: String,
}

impl<W: Write> FileSink<W> {
    /// Create a sink over `writer`.
    pub fn new(writer: W) -> Self {
        FileSink {
            writer,
            name: "file".to_owned(),
        }
    }
}

impl<W: Write + Send> Sink for FileSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, fsevents: &mut dyn Iterator<Item = Result<Fsevent>>) -> Result<()> {
        for event in fsevents {
            let event = event?;
            bincode::serialize_into(&mut self.writer, &event)
                .map_err(|err| Error::backend(format!("cannot serialize fsevent: {err}")))?;
        }
        self.writer
            .flush()
            .map_err(|err| Error::backend(format!("cannot flush fsevents: {err}")))
    }
}

/// Build a sink from a command-line argument: `-` for stdout, or a RobinHood
/// URI naming a mirror backend.
pub fn sink_from_arg(arg: &str) -> Result<Box<dyn Sink>> {
    if arg == "-" {
        return Ok(Box::new(FileSink::new(std::io::stdout())));
    }
    let uri = Uri::parse(arg)?;
    Ok(Box::new(BackendSink::new(
        crate::plugins::mirror_backend_from_uri(&uri)?,
    )))
}
