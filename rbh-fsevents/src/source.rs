//! Fsevent sources.
//!
//! A source produces the fsevents the pipeline consumes: from a file of
//! serialized events, from a Lustre changelog, or from a bespoke format.
//! Sources are named by a URI of the form:
//!
//! ```text
//! src:<kind>:<target>[?ack-user=<user>]
//! ```
//!
//! where `kind` is `file`, `lustre` or `hestia`, and `target` is a file path
//! or an MDT name. Only the `ack-user` query option is recognized; it names
//! the changelog user to acknowledge read records with on the server.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use robinhood::{Error, Fsevent, RawUri, Result, uri};

/// A pull-based producer of fsevents.
///
/// `next_event` returns `Ok(None)` once the stream is exhausted; that is a
/// clean end, not a failure. The two side channels let the pipeline tell the
/// source how much it must keep replayable ([`save_batch`](Source::save_batch))
/// and when a batch has safely landed in the sink
/// ([`ack_batch`](Source::ack_batch)); sources with nothing to replay keep
/// the default no-ops.
pub trait Source: Send {
    /// The source's name, mostly for logging and dispatch decisions.
    fn name(&self) -> &str;

    /// Produce the next fsevent, or `Ok(None)` at the end of the stream.
    fn next_event(&mut self) -> Result<Option<Fsevent>>;

    /// Restart the stream from its beginning.
    ///
    /// Not every source can; the default reports
    /// [`NotSupported`](robinhood::Error::NotSupported).
    fn reset(&mut self) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Called once per flush: the source must keep whatever backs the last
    /// `ack_required` events retrievable until the matching
    /// [`ack_batch`](Source::ack_batch).
    fn save_batch(&mut self, ack_required: usize, dedup_used: bool) {
        let _ = (ack_required, dedup_used);
    }

    /// Acknowledge that batch `batch_id` reached the sink; the source may
    /// release whatever backed it.
    fn ack_batch(&mut self, batch_id: u64) -> Result<()> {
        let _ = batch_id;
        Ok(())
    }
}

/// A source reading bincode-framed fsevents from a reader.
pub struct FileSource<R> {
    reader: BufReader<R>,
    name: String,
}

impl<R: Read> FileSource<R> {
    /// Create a source over `reader`.
    pub fn new(reader: R) -> Self {
        FileSource {
            reader: BufReader::new(reader),
            name: "file".to_owned(),
        }
    }
}

impl<R: Read + Seek + Send> FileSource<R> {
    /// Rewind the underlying reader to the beginning of the stream.
    ///
    /// This is the seekable sources' implementation of
    /// [`Source::reset`]; pipe-backed sources cannot offer it.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|err| Error::invalid(format!("cannot rewind the fsevent stream: {err}")))?;
        Ok(())
    }
}

impl<R: Read + Send> Source for FileSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_event(&mut self) -> Result<Option<Fsevent>> {
        match bincode::deserialize_from(&mut self.reader) {
            Ok(event) => Ok(Some(event)),
            Err(err) => match *err {
                bincode::ErrorKind::Io(ref io)
                    if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    Ok(None)
                }
                _ => Err(Error::invalid(format!("malformed fsevent stream: {err}"))),
            },
        }
    }
}

/// The kinds of source a source URI can name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceKind {
    /// A file of serialized fsevents.
    File,
    /// A Lustre changelog, read from an MDT.
    Lustre,
    /// A Hestia event file.
    Hestia,
}

/// A parsed source URI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceUri {
    /// What kind of source the URI names.
    pub kind: SourceKind,
    /// The file path or MDT name.
    pub target: String,
    /// The changelog user to acknowledge records with, if any.
    pub ack_user: Option<String>,
}

impl SourceUri {
    /// Parse a `src:<kind>:<target>[?ack-user=<user>]` URI.
    pub fn parse(string: &str) -> Result<SourceUri> {
        let raw = RawUri::parse(string)?;
        if raw.scheme != "src" {
            return Err(Error::invalid(format!(
                "'{}': unsupported source scheme",
                raw.scheme
            )));
        }

        let (kind, target) = raw
            .path
            .split_once(':')
            .ok_or_else(|| Error::invalid(format!("invalid source path: '{}'", raw.path)))?;
        let kind = match kind {
            "file" => SourceKind::File,
            "lustre" => SourceKind::Lustre,
            "hestia" => SourceKind::Hestia,
            other => {
                return Err(Error::invalid(format!(
                    "'{other}': unsupported source kind"
                )));
            }
        };

        let ack_user = match raw.query {
            None => None,
            Some(query) => {
                let (key, value) = query.split_once('=').ok_or_else(|| {
                    Error::invalid(format!(
                        "source query should be of the form 'key=value', got '{query}'"
                    ))
                })?;
                if key != "ack-user" {
                    return Err(Error::invalid(format!(
                        "source query only supports 'ack-user=<user>', got '{query}'"
                    )));
                }
                Some(value.to_owned())
            }
        };

        Ok(SourceUri {
            kind,
            target: String::from_utf8(uri::percent_decode(target)?)
                .map_err(|_| Error::invalid("source target is not UTF-8"))?,
            ack_user,
        })
    }
}

/// A source capped to a maximum number of events.
pub struct LimitedSource {
    inner: Box<dyn Source>,
    remaining: u64,
}

impl LimitedSource {
    /// Cap `inner` to at most `limit` events.
    pub fn new(inner: Box<dyn Source>, limit: u64) -> Self {
        LimitedSource {
            inner,
            remaining: limit,
        }
    }
}

impl Source for LimitedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn next_event(&mut self) -> Result<Option<Fsevent>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let event = self.inner.next_event()?;
        if event.is_some() {
            self.remaining -= 1;
        }
        Ok(event)
    }

    fn save_batch(&mut self, ack_required: usize, dedup_used: bool) {
        self.inner.save_batch(ack_required, dedup_used);
    }

    fn ack_batch(&mut self, batch_id: u64) -> Result<()> {
        self.inner.ack_batch(batch_id)
    }
}

/// Build a source from a command-line argument: `-` for stdin, or a source
/// URI.
pub fn source_from_arg(arg: &str) -> Result<Box<dyn Source>> {
    if arg == "-" {
        return Ok(Box::new(FileSource::new(std::io::stdin())));
    }

    let uri = SourceUri::parse(arg)?;
    match uri.kind {
        SourceKind::File => {
            let file = File::open(&uri.target)
                .map_err(|err| Error::invalid(format!("{}: {err}", uri.target)))?;
            Ok(Box::new(FileSource::new(file)))
        }
        // The changelog reader and the Hestia parser are separate
        // collaborators; this build only links the file source.
        SourceKind::Lustre => Err(Error::NotSupported),
        SourceKind::Hestia => Err(Error::NotSupported),
    }
}
