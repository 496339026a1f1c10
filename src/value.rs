//! Dynamically typed values.
//!
//! A [`Value`] is the unit of data exchanged with backends: extended
//! attributes, filter operands, report results and out-of-band metadata are
//! all values. The variants cover scalars, strings, raw bytes, regexes, and
//! the two recursive shapes, sequences and maps.
//!
//! Values can be serialized into a caller-supplied byte buffer with
//! [`Value::copy_into`] and read back with [`Value::parse`]; the round-trip
//! preserves value equality.

use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Options modifying how a regex value is matched.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RegexOptions: u32 {
        /// Match without regard to case.
        const CASE_INSENSITIVE = 0x1;
    }
}

/// The discriminant of a [`Value`].
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ValueType {
    /// A boolean.
    Boolean,
    /// A signed 32-bit integer.
    Int32,
    /// An unsigned 32-bit integer.
    Uint32,
    /// A signed 64-bit integer.
    Int64,
    /// An unsigned 64-bit integer.
    Uint64,
    /// A UTF-8 string.
    String,
    /// Arbitrary bytes.
    Binary,
    /// A regular expression pattern with matching options.
    Regex,
    /// An ordered sequence of values.
    Sequence,
    /// An ordered mapping from string keys to values.
    Map,
}

impl ValueType {
    /// The human-readable name of this type, as used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Int32 => "int32",
            ValueType::Uint32 => "unsigned int32",
            ValueType::Int64 => "int64",
            ValueType::Uint64 => "unsigned int64",
            ValueType::String => "string",
            ValueType::Binary => "binary",
            ValueType::Regex => "regex",
            ValueType::Sequence => "sequence",
            ValueType::Map => "map",
        }
    }

    /// Parse a type from its [`as_str`](Self::as_str) name.
    pub fn from_name(name: &str) -> Option<Self> {
        [
            ValueType::Boolean,
            ValueType::Int32,
            ValueType::Uint32,
            ValueType::Int64,
            ValueType::Uint64,
            ValueType::String,
            ValueType::Binary,
            ValueType::Regex,
            ValueType::Sequence,
            ValueType::Map,
        ]
        .into_iter()
        .find(|t| t.as_str() == name)
    }
}

/// A dynamically typed value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Value {
    /// A boolean.
    Boolean(bool),
    /// A signed 32-bit integer.
    Int32(i32),
    /// An unsigned 32-bit integer.
    Uint32(u32),
    /// A signed 64-bit integer.
    Int64(i64),
    /// An unsigned 64-bit integer.
    Uint64(u64),
    /// A UTF-8 string.
    String(String),
    /// Arbitrary bytes.
    Binary(Vec<u8>),
    /// A regular expression pattern with matching options.
    Regex {
        /// The pattern text.
        pattern: String,
        /// Matching options.
        options: RegexOptions,
    },
    /// An ordered sequence of values.
    Sequence(Vec<Value>),
    /// An ordered mapping from string keys to values.
    Map(ValueMap),
}

impl Value {
    /// The discriminant of this value.
    pub fn kind(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Int32(_) => ValueType::Int32,
            Value::Uint32(_) => ValueType::Uint32,
            Value::Int64(_) => ValueType::Int64,
            Value::Uint64(_) => ValueType::Uint64,
            Value::String(_) => ValueType::String,
            Value::Binary(_) => ValueType::Binary,
            Value::Regex { .. } => ValueType::Regex,
            Value::Sequence(_) => ValueType::Sequence,
            Value::Map(_) => ValueType::Map,
        }
    }

    /// The string payload, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(string) => Some(string),
            _ => None,
        }
    }

    /// The map payload, if this value is a map.
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The map payload, mutably, if this value is a map.
    pub fn as_map_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The sequence payload, if this value is a sequence.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(values) => Some(values),
            _ => None,
        }
    }

    /// The sequence payload, mutably, if this value is a sequence.
    pub fn as_sequence_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Sequence(values) => Some(values),
            _ => None,
        }
    }

    /// Check this value is structurally valid.
    ///
    /// Most invalid states are unrepresentable in the first place; what is
    /// left to check is that regex patterns actually compile, recursively.
    pub fn validate(&self) -> Result<()> {
        match self {
            Value::Regex { pattern, options } => {
                regex::RegexBuilder::new(pattern)
                    .case_insensitive(options.contains(RegexOptions::CASE_INSENSITIVE))
                    .build()
                    .map_err(|err| Error::invalid(format!("bad regex '{pattern}': {err}")))?;
            }
            Value::Sequence(values) => {
                for value in values {
                    value.validate()?;
                }
            }
            Value::Map(map) => {
                for (_, value) in map.iter() {
                    value.validate()?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The number of bytes [`copy_into`](Self::copy_into) writes for this
    /// value.
    pub fn serialized_size(&self) -> usize {
        1 + match self {
            Value::Boolean(_) => 1,
            Value::Int32(_) | Value::Uint32(_) => 4,
            Value::Int64(_) | Value::Uint64(_) => 8,
            Value::String(string) => 4 + string.len(),
            Value::Binary(data) => 4 + data.len(),
            Value::Regex { pattern, .. } => 4 + 4 + pattern.len(),
            Value::Sequence(values) => {
                4 + values.iter().map(Value::serialized_size).sum::<usize>()
            }
            Value::Map(map) => map.serialized_size(),
        }
    }

    /// Serialize this value into `buffer`.
    ///
    /// Returns the number of bytes written. Fails with
    /// [`Error::InsufficientBuffer`] rather than writing past the end of
    /// `buffer`; the buffer contents are unspecified on failure.
    pub fn copy_into(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut writer = Writer { buffer, position: 0 };
        self.write(&mut writer)?;
        Ok(writer.position)
    }

    fn write(&self, writer: &mut Writer<'_>) -> Result<()> {
        writer.put(&[u8::from(self.kind())])?;
        match self {
            Value::Boolean(boolean) => writer.put(&[u8::from(*boolean)]),
            Value::Int32(int32) => writer.put(&int32.to_le_bytes()),
            Value::Uint32(uint32) => writer.put(&uint32.to_le_bytes()),
            Value::Int64(int64) => writer.put(&int64.to_le_bytes()),
            Value::Uint64(uint64) => writer.put(&uint64.to_le_bytes()),
            Value::String(string) => writer.put_bytes(string.as_bytes()),
            Value::Binary(data) => writer.put_bytes(data),
            Value::Regex { pattern, options } => {
                writer.put(&options.bits().to_le_bytes())?;
                writer.put_bytes(pattern.as_bytes())
            }
            Value::Sequence(values) => {
                writer.put_count(values.len())?;
                for value in values {
                    value.write(writer)?;
                }
                Ok(())
            }
            Value::Map(map) => map.write(writer),
        }
    }

    /// Deserialize a value from the front of `buffer`.
    ///
    /// Returns the value and the number of bytes consumed.
    pub fn parse(buffer: &[u8]) -> Result<(Value, usize)> {
        let mut reader = Reader { buffer, position: 0 };
        let value = Value::read(&mut reader)?;
        Ok((value, reader.position))
    }

    fn read(reader: &mut Reader<'_>) -> Result<Value> {
        let tag = reader.take(1)?[0];
        let kind = ValueType::try_from(tag)
            .map_err(|_| Error::invalid(format!("unknown value discriminant {tag}")))?;
        Ok(match kind {
            ValueType::Boolean => Value::Boolean(reader.take(1)?[0] != 0),
            ValueType::Int32 => Value::Int32(i32::from_le_bytes(reader.take_array()?)),
            ValueType::Uint32 => Value::Uint32(u32::from_le_bytes(reader.take_array()?)),
            ValueType::Int64 => Value::Int64(i64::from_le_bytes(reader.take_array()?)),
            ValueType::Uint64 => Value::Uint64(u64::from_le_bytes(reader.take_array()?)),
            ValueType::String => Value::String(reader.take_string()?),
            ValueType::Binary => Value::Binary(reader.take_counted()?.to_vec()),
            ValueType::Regex => {
                let bits = u32::from_le_bytes(reader.take_array()?);
                let options = RegexOptions::from_bits(bits)
                    .ok_or_else(|| Error::invalid(format!("unknown regex options {bits:#x}")))?;
                Value::Regex {
                    pattern: reader.take_string()?,
                    options,
                }
            }
            ValueType::Sequence => {
                let count = reader.take_count()?;
                let mut values = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    values.push(Value::read(reader)?);
                }
                Value::Sequence(values)
            }
            ValueType::Map => Value::Map(ValueMap::read(reader)?),
        })
    }
}

/// An ordered mapping from string keys to [`Value`]s.
///
/// Iteration and serialization follow insertion order; [`insert`]
/// (ValueMap::insert) on an existing key replaces the value in place without
/// moving the pair. Several consumers rely on that ordering, notably the
/// layout of enrichment requests inside deduplicated fsevents.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ValueMap {
    pairs: Vec<(String, Value)>,
}

impl ValueMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of pairs in the map.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the map holds no pair at all.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Look up the value associated with `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    /// Look up the value associated with `key`, mutably.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.pairs
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    /// Associate `value` with `key`.
    ///
    /// If the key is already present the value is replaced in place and the
    /// previous value returned; otherwise the pair is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.pairs.push((key, value));
                None
            }
        }
    }

    /// Remove the pair associated with `key`, preserving the order of the
    /// remaining pairs.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.pairs.iter().position(|(k, _)| k == key)?;
        Some(self.pairs.remove(index).1)
    }

    /// Iterate over the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The number of bytes [`copy_into`](Self::copy_into) writes for this map.
    pub fn serialized_size(&self) -> usize {
        4 + self
            .pairs
            .iter()
            .map(|(key, value)| 4 + key.len() + value.serialized_size())
            .sum::<usize>()
    }

    /// Serialize this map into `buffer`, returning the number of bytes
    /// written. See [`Value::copy_into`].
    pub fn copy_into(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut writer = Writer { buffer, position: 0 };
        self.write(&mut writer)?;
        Ok(writer.position)
    }

    fn write(&self, writer: &mut Writer<'_>) -> Result<()> {
        writer.put_count(self.pairs.len())?;
        for (key, value) in &self.pairs {
            writer.put_bytes(key.as_bytes())?;
            value.write(writer)?;
        }
        Ok(())
    }

    /// Deserialize a map from the front of `buffer`.
    ///
    /// Returns the map and the number of bytes consumed.
    pub fn parse(buffer: &[u8]) -> Result<(ValueMap, usize)> {
        let mut reader = Reader { buffer, position: 0 };
        let map = ValueMap::read(&mut reader)?;
        Ok((map, reader.position))
    }

    fn read(reader: &mut Reader<'_>) -> Result<ValueMap> {
        let count = reader.take_count()?;
        let mut map = ValueMap::new();
        for _ in 0..count {
            let key = reader.take_string()?;
            map.insert(key, Value::read(reader)?);
        }
        Ok(map)
    }
}

impl FromIterator<(String, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl IntoIterator for ValueMap {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

struct Writer<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl Writer<'_> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.position.checked_add(bytes.len());
        match end {
            Some(end) if end <= self.buffer.len() => {
                self.buffer[self.position..end].copy_from_slice(bytes);
                self.position = end;
                Ok(())
            }
            _ => Err(Error::InsufficientBuffer),
        }
    }

    fn put_count(&mut self, count: usize) -> Result<()> {
        let count = u32::try_from(count).map_err(|_| Error::invalid("count exceeds u32"))?;
        self.put(&count.to_le_bytes())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_count(bytes.len())?;
        self.put(bytes)
    }
}

struct Reader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| Error::invalid("truncated value"))?;
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn take_count(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn take_counted(&mut self) -> Result<&'a [u8]> {
        let len = self.take_count()?;
        self.take(len)
    }

    fn take_string(&mut self) -> Result<String> {
        let bytes = self.take_counted()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::invalid("string is not UTF-8"))
    }
}

#[cfg(test)]
mod test {
    use super::{RegexOptions, Value, ValueMap, ValueType};
    use crate::error::Error;

    fn sample() -> Value {
        let mut map = ValueMap::new();
        map.insert("name", Value::String("fsentry".into()));
        map.insert("mode", Value::Uint32(0o644));
        Value::Sequence(vec![
            Value::Boolean(true),
            Value::Int64(-42),
            Value::Binary(vec![0x00, 0xff, 0x7f]),
            Value::Regex {
                pattern: r".*\.c".into(),
                options: RegexOptions::CASE_INSENSITIVE,
            },
            Value::Map(map),
        ])
    }

    #[test]
    fn copy_into_round_trip() {
        let value = sample();
        let mut buffer = vec![0; value.serialized_size()];
        let written = value.copy_into(&mut buffer).unwrap();
        assert_eq!(written, buffer.len());

        let (parsed, consumed) = Value::parse(&buffer).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(parsed, value);
    }

    #[test]
    fn copy_into_short_buffer() {
        let value = sample();
        let mut buffer = vec![0; value.serialized_size() - 1];
        assert_eq!(value.copy_into(&mut buffer), Err(Error::InsufficientBuffer));
    }

    #[test]
    fn parse_unknown_discriminant() {
        assert!(Value::parse(&[0xfe, 0, 0, 0]).is_err());
    }

    #[test]
    fn map_insert_replaces_in_place() {
        let mut map = ValueMap::new();
        map.insert("a", Value::Uint32(1));
        map.insert("b", Value::Uint32(2));
        let previous = map.insert("a", Value::Uint32(3));
        assert_eq!(previous, Some(Value::Uint32(1)));

        let keys: Vec<_> = map.iter().map(|(k, _)| k.to_owned()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(map.get("a"), Some(&Value::Uint32(3)));
    }

    #[test]
    fn map_round_trip() {
        let mut map = ValueMap::new();
        map.insert("xattrs", Value::Sequence(vec![Value::String("user.blob".into())]));
        map.insert("fid", Value::Binary(vec![1, 2, 3]));

        let mut buffer = vec![0; map.serialized_size()];
        map.copy_into(&mut buffer).unwrap();
        let (parsed, _) = ValueMap::parse(&buffer).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn validate_rejects_bad_regex() {
        let value = Value::Regex {
            pattern: "(".into(),
            options: RegexOptions::empty(),
        };
        assert!(matches!(value.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn type_names_round_trip() {
        for kind in [
            ValueType::Boolean,
            ValueType::String,
            ValueType::Map,
            ValueType::Uint64,
        ] {
            assert_eq!(ValueType::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ValueType::from_name("unknown"), None);
    }
}
