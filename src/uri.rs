//! RobinHood URIs.
//!
//! A backend, a filesystem and optionally an entry inside it are named by a
//! URI of the form:
//!
//! ```text
//! rbh:<backend>:<fsname>[#<fragment>]
//! ```
//!
//! `backend` and `fsname` are percent-encoded. The fragment, when present,
//! is either empty (the filesystem root, by path `""`), a bracketed entry id
//! (raw bytes, or a Lustre fid written `[seq:oid:ver]`), or a path.
//!
//! Splitting a string into its URI components ([`RawUri`]) is separate from
//! interpreting them as a RobinHood URI ([`Uri`]); producers of other `xxx:`
//! schemes (such as event sources) reuse the former.

use memchr::memchr;

use crate::error::{Error, Result};
use crate::id::{Id, LuFid};

/// The URI scheme RobinHood URIs use.
pub const RBH_SCHEME: &str = "rbh";

/// A URI split into its RFC 3986 components, without interpretation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawUri<'a> {
    /// The scheme (without the trailing colon).
    pub scheme: &'a str,
    /// The userinfo part of the authority, if any.
    pub userinfo: Option<&'a str>,
    /// The host part of the authority, if any.
    pub host: Option<&'a str>,
    /// The port part of the authority, if any.
    pub port: Option<&'a str>,
    /// The (still percent-encoded) path.
    pub path: &'a str,
    /// The query, if any.
    pub query: Option<&'a str>,
    /// The (still percent-encoded) fragment, if any.
    pub fragment: Option<&'a str>,
}

fn is_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl<'a> RawUri<'a> {
    /// Split `string` into URI components.
    ///
    /// Only the checks necessary for the split are performed; no
    /// percent-decoding happens here.
    pub fn parse(string: &'a str) -> Result<RawUri<'a>> {
        let (scheme, mut rest) = string
            .split_once(':')
            .ok_or_else(|| Error::invalid(format!("'{string}': no scheme")))?;
        if !is_scheme(scheme) {
            return Err(Error::invalid(format!("'{string}': invalid scheme")));
        }

        let mut uri = RawUri {
            scheme,
            ..RawUri::default()
        };

        if let Some((before, fragment)) = rest.split_once('#') {
            uri.fragment = Some(fragment);
            rest = before;
        }
        if let Some((before, query)) = rest.split_once('?') {
            uri.query = Some(query);
            rest = before;
        }

        if let Some(hierarchy) = rest.strip_prefix("//") {
            let (authority, path) = match hierarchy.find('/') {
                Some(slash) => hierarchy.split_at(slash),
                None => (hierarchy, ""),
            };
            uri.path = path;

            let host_port = match authority.split_once('@') {
                Some((userinfo, host_port)) => {
                    uri.userinfo = Some(userinfo);
                    host_port
                }
                None => authority,
            };
            match host_port.rsplit_once(':') {
                Some((host, port)) => {
                    uri.host = Some(host);
                    uri.port = Some(port);
                }
                None => uri.host = Some(host_port),
            }
        } else {
            uri.path = rest;
        }

        Ok(uri)
    }
}

/// Whether `string` looks like a URI (has a valid scheme).
pub fn is_uri(string: &str) -> bool {
    RawUri::parse(string).is_ok()
}

fn hex_digit(byte: u8) -> Result<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(Error::IllegalSequence),
    }
}

/// Decode a percent-encoded string into bytes.
///
/// Both hexadecimal cases are accepted; bytes other than `%` escapes are
/// copied verbatim, so the output is never longer than the input. Fails with
/// [`Error::IllegalSequence`] on a truncated or non-hexadecimal escape.
pub fn percent_decode(src: &str) -> Result<Vec<u8>> {
    let src = src.as_bytes();
    let mut decoded = Vec::with_capacity(src.len());
    let mut position = 0;

    while let Some(offset) = memchr(b'%', &src[position..]) {
        let escape = position + offset;
        decoded.extend_from_slice(&src[position..escape]);
        if escape + 3 > src.len() {
            return Err(Error::IllegalSequence);
        }
        let high = hex_digit(src[escape + 1])?;
        let low = hex_digit(src[escape + 2])?;
        decoded.push(high << 4 | low);
        position = escape + 3;
    }
    decoded.extend_from_slice(&src[position..]);

    Ok(decoded)
}

fn percent_decode_string(src: &str) -> Result<String> {
    String::from_utf8(percent_decode(src)?)
        .map_err(|_| Error::invalid("percent-decoded data is not UTF-8"))
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// Percent-encode `bytes`, leaving unreserved characters and anything in
/// `keep` verbatim.
pub fn percent_encode(bytes: &[u8], keep: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len());
    for &byte in bytes {
        if is_unreserved(byte) || keep.contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// What the fragment of a [`Uri`] addresses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UriVariant {
    /// No fragment: the URI names the whole filesystem.
    Bare,
    /// An id fragment: the URI names one entry by id.
    Id(Id),
    /// A path fragment: the URI names one entry by path. The empty path
    /// addresses the filesystem root.
    Path(String),
}

/// An interpreted RobinHood URI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Uri {
    /// The backend name (eg. "mongo").
    pub backend: String,
    /// The filesystem name (eg. "/mnt/lustre", or a mirror instance name).
    pub fsname: String,
    /// The entry the fragment addresses, if any.
    pub variant: UriVariant,
}

/// Parse a C-style numeric literal: decimal, `0x` hexadecimal, or octal
/// with a leading `0`. The empty string parses as 0.
fn parse_c_numeric(string: &str) -> Result<u64> {
    if string.is_empty() {
        return Ok(0);
    }
    let (digits, radix) = if let Some(hex) = string
        .strip_prefix("0x")
        .or_else(|| string.strip_prefix("0X"))
    {
        (hex, 16)
    } else if string.len() > 1 && string.starts_with('0') {
        (&string[1..], 8)
    } else {
        (string, 10)
    };

    u64::from_str_radix(digits, radix)
        .map_err(|_| Error::invalid(format!("'{string}' is not an integer")))
}

/// Parse a bracketed fragment (brackets already stripped) into an [`Id`].
///
/// Fid detection happens on the still-encoded text: exactly two unencoded
/// colons make a fid, anything else is a raw byte id.
fn parse_id_fragment(inner: &str) -> Result<Id> {
    if inner.bytes().filter(|&byte| byte == b':').count() == 2 {
        let mut fields = inner.split(':');
        let seq = parse_c_numeric(&percent_decode_string(fields.next().unwrap_or(""))?)?;
        let oid = parse_c_numeric(&percent_decode_string(fields.next().unwrap_or(""))?)?;
        let ver = parse_c_numeric(&percent_decode_string(fields.next().unwrap_or(""))?)?;

        let oid = u32::try_from(oid).map_err(|_| Error::invalid("fid oid overflows 32 bits"))?;
        let ver = u32::try_from(ver).map_err(|_| Error::invalid("fid ver overflows 32 bits"))?;
        Ok(Id::from_lu_fid(&LuFid { seq, oid, ver }))
    } else {
        Ok(Id::new(percent_decode(inner)?))
    }
}

impl Uri {
    /// Interpret a [`RawUri`] as a RobinHood URI.
    pub fn from_raw(raw: &RawUri<'_>) -> Result<Uri> {
        if raw.scheme != RBH_SCHEME {
            return Err(Error::invalid(format!(
                "unexpected scheme: '{}'",
                raw.scheme
            )));
        }

        let (backend, fsname) = raw
            .path
            .split_once(':')
            .ok_or_else(|| Error::invalid(format!("invalid path: '{}'", raw.path)))?;

        let variant = match raw.fragment {
            None => UriVariant::Bare,
            Some("") => UriVariant::Path(String::new()),
            Some(fragment) => match fragment
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                Some(inner) => UriVariant::Id(parse_id_fragment(inner)?),
                None => UriVariant::Path(percent_decode_string(fragment)?),
            },
        };

        Ok(Uri {
            backend: percent_decode_string(backend)?,
            fsname: percent_decode_string(fsname)?,
            variant,
        })
    }

    /// Parse a RobinHood URI from a string.
    pub fn parse(string: &str) -> Result<Uri> {
        Uri::from_raw(&RawUri::parse(string)?)
    }
}

impl std::fmt::Display for Uri {
    /// Format the URI canonically; parsing the result yields back an equal
    /// [`Uri`].
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{RBH_SCHEME}:{}:{}",
            percent_encode(self.backend.as_bytes(), b""),
            percent_encode(self.fsname.as_bytes(), b"/:")
        )?;
        match &self.variant {
            UriVariant::Bare => Ok(()),
            UriVariant::Path(path) => {
                write!(f, "#{}", percent_encode(path.as_bytes(), b"/:"))
            }
            UriVariant::Id(id) => match id.as_lu_fid() {
                Ok(fid) => write!(f, "#[{:#x}:{:#x}:{:#x}]", fid.seq, fid.oid, fid.ver),
                Err(_) => write!(f, "#[{}]", percent_encode(id.as_bytes(), b"")),
            },
        }
    }
}
