//! Error handling for the RobinHood core.
//!
//! Every fallible operation in this crate returns [`Result`]. The error kinds
//! mirror the failure modes of the on-disk and over-the-wire contracts: a
//! malformed filter or URI is [`Error::InvalidArgument`], a miss in a lookup
//! structure is [`Error::NoEntry`], an exhausted iterator is [`Error::NoData`]
//! (a control signal rather than a failure), and so on.
//!
//! Backends that cannot map a failure to one of the well-defined kinds wrap a
//! free-form message in [`Error::Backend`]. The message is meant to be printed
//! to users, never parsed.

use thiserror::Error;

/// A specialized result type for RobinHood operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for RobinHood operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A malformed filter, URI or value, an operator/value mismatch, or an
    /// option from another backend's option space.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not implemented by this backend or plugin.
    #[error("operation not supported")]
    NotSupported,

    /// The option id lies in this backend's option space but the backend does
    /// not recognize it.
    #[error("protocol option not supported")]
    ProtocolNotSupported,

    /// A lookup missed (filter returned nothing, key absent from a map).
    #[error("no such entry")]
    NoEntry,

    /// The iterator is exhausted. This is a first-class control signal, not a
    /// failure.
    #[error("no data available")]
    NoData,

    /// A caller-supplied buffer is too small for the data to copy into it.
    #[error("insufficient buffer space")]
    InsufficientBuffer,

    /// A fixed-capacity structure is full.
    #[error("no buffer space available")]
    NoBufferSpace,

    /// Percent-decoding encountered a truncated or non-hexadecimal escape.
    #[error("illegal byte sequence")]
    IllegalSequence,

    /// An opaque backend failure. The message explains as best as possible why
    /// the operation failed; print it, do not parse it.
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`] with a formatted message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Shorthand for an [`Error::Backend`] with a formatted message.
    ///
    /// Messages longer than 512 bytes are truncated, matching the size of the
    /// diagnostic buffer backends historically wrote into.
    pub fn backend(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > 512 {
            let mut end = 512;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Error::Backend(message)
    }
}
