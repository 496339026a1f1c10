//! Predicates over fsentry properties.
//!
//! Filters abstract predicates over the properties of an fsentry, such as:
//!
//! > an fsentry's name matches `.*\.c`
//!
//! A filter is either a comparison (a field, an operator and a value), a
//! logical composition of other filters, or [`Filter::Null`] which matches
//! every entry. Conversely, the negation of the null filter matches nothing.
//!
//! Backends translate filters into their native query language; the
//! [`Filter::matches`] evaluator interprets them directly against in-memory
//! fsentries and is what the policy engine runs on.

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsentry::Fsentry;
use crate::statx::{Statx, StatxMask};
use crate::value::{RegexOptions, Value, ValueType};

/// A filter operator.
///
/// There are two families: comparison operators, which relate a field to a
/// value, and logical operators, which combine other filters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum FilterOperator {
    /// The field equals the value.
    Equal,
    /// The field is strictly lower than the value.
    StrictlyLower,
    /// The field is lower than or equal to the value.
    LowerOrEqual,
    /// The field is strictly greater than the value.
    StrictlyGreater,
    /// The field is greater than or equal to the value.
    GreaterOrEqual,
    /// The field matches the regex value.
    Regex,
    /// The field is one of the elements of the sequence value.
    In,
    /// The field is populated (the value is a boolean flag).
    Exists,
    /// At least one bit of the value is set in the field.
    BitsAnySet,
    /// Every bit of the value is set in the field.
    BitsAllSet,
    /// At least one bit of the value is clear in the field.
    BitsAnyClear,
    /// Every bit of the value is clear in the field.
    BitsAllClear,
    /// Every child filter matches.
    And,
    /// At least one child filter matches.
    Or,
    /// The (single) child filter does not match.
    Not,
}

impl FilterOperator {
    /// Whether this is a comparison operator.
    pub fn is_comparison(self) -> bool {
        !self.is_logical()
    }

    /// Whether this is a logical operator.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            FilterOperator::And | FilterOperator::Or | FilterOperator::Not
        )
    }
}

/// The fsentry property a comparison filter applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum FilterField {
    /// The entry's id.
    Id,
    /// The entry's parent id.
    ParentId,
    /// The entry's name.
    Name,
    /// The entry's symlink target.
    Symlink,
    /// A single bit of the entry's statx record.
    Statx(StatxMask),
    /// A namespace xattr, or the namespace xattr map itself when `None`.
    NamespaceXattr(Option<String>),
    /// An inode xattr, or the inode xattr map itself when `None`.
    InodeXattr(Option<String>),
}

/// A predicate over fsentry properties.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Filter {
    /// The null filter; matches every entry.
    Null,
    /// A single comparison.
    Comparison {
        /// The comparison operator.
        op: FilterOperator,
        /// The field to compare.
        field: FilterField,
        /// The value to compare the field to.
        value: Value,
    },
    /// A logical composition of other filters.
    Logical {
        /// The logical operator.
        op: FilterOperator,
        /// The composed filters.
        filters: Vec<Filter>,
    },
}

impl Filter {
    /// Create a comparison filter, validating the operator/value pairing.
    pub fn compare(op: FilterOperator, field: FilterField, value: Value) -> Result<Filter> {
        let filter = Filter::Comparison { op, field, value };
        filter.validate()?;
        Ok(filter)
    }

    /// Create a filter that matches when every one of `filters` matches.
    pub fn and(filters: Vec<Filter>) -> Filter {
        Filter::Logical {
            op: FilterOperator::And,
            filters,
        }
    }

    /// Create a filter that matches when at least one of `filters` matches.
    pub fn or(filters: Vec<Filter>) -> Filter {
        Filter::Logical {
            op: FilterOperator::Or,
            filters,
        }
    }

    /// Create a filter that matches when `filter` does not.
    pub fn not(filter: Filter) -> Filter {
        Filter::Logical {
            op: FilterOperator::Not,
            filters: vec![filter],
        }
    }

    /// Create a filter that matches when `field` is populated.
    pub fn exists(field: FilterField) -> Filter {
        Filter::Comparison {
            op: FilterOperator::Exists,
            field,
            value: Value::Boolean(true),
        }
    }

    /// Check this filter is well-formed.
    ///
    /// Fails with [`Error::InvalidArgument`] on an operator used with an
    /// incompatible value type, a statx field designating more than one statx
    /// bit, a `not` whose arity is not one, or an `and`/`or` with no child.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::Null => Ok(()),
            Filter::Comparison { op, field, value } => {
                if !op.is_comparison() {
                    return Err(Error::invalid(format!(
                        "logical operator {op:?} in a comparison filter"
                    )));
                }
                if let FilterField::Statx(mask) = field {
                    if mask.bits().count_ones() != 1 {
                        return Err(Error::invalid(
                            "statx filter fields must designate exactly one statx bit",
                        ));
                    }
                }
                value.validate()?;
                check_operand(*op, value.kind())
            }
            Filter::Logical { op, filters } => {
                match op {
                    FilterOperator::Not if filters.len() != 1 => {
                        return Err(Error::invalid("'not' takes exactly one filter"));
                    }
                    FilterOperator::And | FilterOperator::Or if filters.is_empty() => {
                        return Err(Error::invalid(format!("empty '{op:?}' filter")));
                    }
                    FilterOperator::And | FilterOperator::Or | FilterOperator::Not => {}
                    _ => {
                        return Err(Error::invalid(format!(
                            "comparison operator {op:?} in a logical filter"
                        )));
                    }
                }
                filters.iter().try_for_each(Filter::validate)
            }
        }
    }

    /// Evaluate this filter against an in-memory fsentry.
    ///
    /// A comparison whose field is not populated in the entry does not match.
    /// Logical compositions short-circuit.
    pub fn matches(&self, entry: &Fsentry) -> bool {
        match self {
            Filter::Null => true,
            Filter::Logical { op, filters } => match op {
                FilterOperator::And => filters.iter().all(|filter| filter.matches(entry)),
                FilterOperator::Or => filters.iter().any(|filter| filter.matches(entry)),
                FilterOperator::Not => filters
                    .first()
                    .is_none_or(|filter| !filter.matches(entry)),
                _ => false,
            },
            Filter::Comparison { op, field, value } => {
                let field_value = extract_field(entry, field);
                if *op == FilterOperator::Exists {
                    let Value::Boolean(flag) = value else {
                        return false;
                    };
                    return field_value.is_some() && *flag;
                }
                match field_value {
                    Some(field_value) => compare_values(*op, &field_value, value),
                    None => false,
                }
            }
        }
    }

    /// Rewrite unsigned integer comparisons for backends that only store
    /// signed integers.
    ///
    /// An order comparison against an unsigned value is split at zero, so
    /// that entries whose stored (signed) field is negative sort on the right
    /// side. For instance `x < 40u64` becomes `x >= 0 ∧ x < 40i64`, while
    /// `x < u` for `u > i64::MAX` becomes `x >= 0 ∨ x < (u as i64)`.
    /// Equality and bit tests reinterpret the value's bits as signed.
    pub fn lower_unsigned(&self) -> Filter {
        match self {
            Filter::Null => Filter::Null,
            Filter::Logical { op, filters } => Filter::Logical {
                op: *op,
                filters: filters.iter().map(Filter::lower_unsigned).collect(),
            },
            Filter::Comparison { op, field, value } => {
                let (signed, in_signed_range) = match value {
                    Value::Uint32(u) => (Value::Int32(*u as i32), *u <= i32::MAX as u32),
                    Value::Uint64(u) => (Value::Int64(*u as i64), *u <= i64::MAX as u64),
                    _ => return self.clone(),
                };

                match op {
                    FilterOperator::StrictlyLower | FilterOperator::LowerOrEqual => {
                        let comparison = Filter::Comparison {
                            op: *op,
                            field: field.clone(),
                            value: signed,
                        };
                        let positive = Filter::Comparison {
                            op: FilterOperator::GreaterOrEqual,
                            field: field.clone(),
                            value: zero_like(value),
                        };
                        if in_signed_range {
                            Filter::and(vec![comparison, positive])
                        } else {
                            Filter::or(vec![comparison, positive])
                        }
                    }
                    FilterOperator::StrictlyGreater | FilterOperator::GreaterOrEqual => {
                        let comparison = Filter::Comparison {
                            op: *op,
                            field: field.clone(),
                            value: signed,
                        };
                        let negative = Filter::Comparison {
                            op: FilterOperator::StrictlyLower,
                            field: field.clone(),
                            value: zero_like(value),
                        };
                        if in_signed_range {
                            Filter::or(vec![comparison, negative])
                        } else {
                            Filter::and(vec![comparison, negative])
                        }
                    }
                    _ => Filter::Comparison {
                        op: *op,
                        field: field.clone(),
                        value: signed,
                    },
                }
            }
        }
    }
}

fn zero_like(value: &Value) -> Value {
    match value {
        Value::Uint32(_) => Value::Int32(0),
        _ => Value::Int64(0),
    }
}

fn check_operand(op: FilterOperator, kind: ValueType) -> Result<()> {
    use FilterOperator::*;

    let compatible = match op {
        Equal | StrictlyLower | LowerOrEqual | StrictlyGreater | GreaterOrEqual => {
            kind != ValueType::Boolean
        }
        Regex => kind == ValueType::Regex,
        In => kind == ValueType::Sequence,
        Exists => kind == ValueType::Boolean,
        BitsAnySet | BitsAllSet | BitsAnyClear | BitsAllClear => matches!(
            kind,
            ValueType::Int32 | ValueType::Uint32 | ValueType::Int64 | ValueType::Uint64
        ),
        And | Or | Not => false,
    };

    if compatible {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "operator {op:?} is not compatible with {} values",
            kind.as_str()
        )))
    }
}

fn extract_field(entry: &Fsentry, field: &FilterField) -> Option<Value> {
    match field {
        FilterField::Id => Some(Value::Binary(entry.id()?.as_bytes().to_vec())),
        FilterField::ParentId => Some(Value::Binary(entry.parent_id()?.as_bytes().to_vec())),
        FilterField::Name => Some(Value::String(entry.name()?.to_owned())),
        FilterField::Symlink => Some(Value::String(entry.symlink()?.to_owned())),
        FilterField::Statx(mask) => extract_statx(entry.statx()?, *mask),
        FilterField::NamespaceXattr(None) => Some(Value::Map(entry.ns_xattrs()?.clone())),
        FilterField::NamespaceXattr(Some(key)) => entry.ns_xattrs()?.get(key).cloned(),
        FilterField::InodeXattr(None) => Some(Value::Map(entry.inode_xattrs()?.clone())),
        FilterField::InodeXattr(Some(key)) => entry.find_inode_xattr(key).cloned(),
    }
}

fn extract_statx(statx: &Statx, mask: StatxMask) -> Option<Value> {
    if !statx.mask.contains(mask) {
        return None;
    }
    Some(match mask {
        m if m == StatxMask::TYPE => Value::Uint32(u32::from(statx.mode & 0o170000)),
        m if m == StatxMask::MODE => Value::Uint32(u32::from(statx.mode & 0o007777)),
        m if m == StatxMask::NLINK => Value::Uint32(statx.nlink),
        m if m == StatxMask::UID => Value::Uint32(statx.uid),
        m if m == StatxMask::GID => Value::Uint32(statx.gid),
        m if m == StatxMask::ATIME_SEC => Value::Int64(statx.atime.sec),
        m if m == StatxMask::ATIME_NSEC => Value::Uint32(statx.atime.nsec),
        m if m == StatxMask::BTIME_SEC => Value::Int64(statx.btime.sec),
        m if m == StatxMask::BTIME_NSEC => Value::Uint32(statx.btime.nsec),
        m if m == StatxMask::CTIME_SEC => Value::Int64(statx.ctime.sec),
        m if m == StatxMask::CTIME_NSEC => Value::Uint32(statx.ctime.nsec),
        m if m == StatxMask::MTIME_SEC => Value::Int64(statx.mtime.sec),
        m if m == StatxMask::MTIME_NSEC => Value::Uint32(statx.mtime.nsec),
        m if m == StatxMask::INO => Value::Uint64(statx.ino),
        m if m == StatxMask::SIZE => Value::Uint64(statx.size),
        m if m == StatxMask::BLOCKS => Value::Uint64(statx.blocks),
        m if m == StatxMask::MNT_ID => Value::Uint64(statx.mnt_id),
        m if m == StatxMask::BLKSIZE => Value::Uint32(statx.blksize),
        m if m == StatxMask::ATTRIBUTES => Value::Uint64(statx.attributes.bits()),
        m if m == StatxMask::RDEV_MAJOR => Value::Uint32(statx.rdev_major),
        m if m == StatxMask::RDEV_MINOR => Value::Uint32(statx.rdev_minor),
        m if m == StatxMask::DEV_MAJOR => Value::Uint32(statx.dev_major),
        m if m == StatxMask::DEV_MINOR => Value::Uint32(statx.dev_minor),
        _ => return None,
    })
}

enum Integer {
    Signed(i64),
    Unsigned(u64),
}

fn as_integer(value: &Value) -> Option<Integer> {
    match value {
        Value::Int32(i) => Some(Integer::Signed(i64::from(*i))),
        Value::Int64(i) => Some(Integer::Signed(*i)),
        Value::Uint32(u) => Some(Integer::Unsigned(u64::from(*u))),
        Value::Uint64(u) => Some(Integer::Unsigned(*u)),
        _ => None,
    }
}

fn integer_bits(value: &Value) -> Option<u64> {
    match as_integer(value)? {
        Integer::Signed(i) => Some(i as u64),
        Integer::Unsigned(u) => Some(u),
    }
}

fn ordering_matches(op: FilterOperator, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        FilterOperator::Equal => ordering == Equal,
        FilterOperator::StrictlyLower => ordering == Less,
        FilterOperator::LowerOrEqual => ordering != Greater,
        FilterOperator::StrictlyGreater => ordering == Greater,
        FilterOperator::GreaterOrEqual => ordering != Less,
        _ => false,
    }
}

fn regex_matches(pattern: &str, options: RegexOptions, haystack: &str) -> bool {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(options.contains(RegexOptions::CASE_INSENSITIVE))
        .build()
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

/// Compare a field value extracted from an fsentry against a filter operand.
///
/// Integer comparisons are signed or unsigned depending on the operand
/// types; incompatible numeric signedness fails to match rather than
/// coercing. Strings and binary compare for equality only, except for regex
/// operands which are matched against string fields.
fn compare_values(op: FilterOperator, field: &Value, operand: &Value) -> bool {
    use FilterOperator::*;

    match op {
        BitsAnySet | BitsAllSet | BitsAnyClear | BitsAllClear => {
            let (Some(bits), Some(mask)) = (integer_bits(field), integer_bits(operand)) else {
                return false;
            };
            match op {
                BitsAnySet => bits & mask != 0,
                BitsAllSet => bits & mask == mask,
                BitsAnyClear => !bits & mask != 0,
                BitsAllClear => bits & mask == 0,
                _ => false,
            }
        }
        In => match operand {
            Value::Sequence(values) => values
                .iter()
                .any(|element| compare_values(Equal, field, element)),
            _ => false,
        },
        Regex => match (field, operand) {
            (Value::String(haystack), Value::Regex { pattern, options }) => {
                regex_matches(pattern, *options, haystack)
            }
            _ => false,
        },
        Equal | StrictlyLower | LowerOrEqual | StrictlyGreater | GreaterOrEqual => {
            match (as_integer(field), as_integer(operand)) {
                (Some(Integer::Signed(a)), Some(Integer::Signed(b))) => {
                    return ordering_matches(op, a.cmp(&b));
                }
                (Some(Integer::Unsigned(a)), Some(Integer::Unsigned(b))) => {
                    return ordering_matches(op, a.cmp(&b));
                }
                (Some(_), Some(_)) => return false,
                _ => {}
            }
            match (field, operand) {
                // Regex operands match strings even under the equality
                // operator; that is how globbing predicates are encoded.
                (Value::String(haystack), Value::Regex { pattern, options }) => {
                    op == Equal && regex_matches(pattern, *options, haystack)
                }
                (Value::String(a), Value::String(b)) => op == Equal && a == b,
                (Value::Binary(a), Value::Binary(b)) => op == Equal && a == b,
                (Value::Boolean(a), Value::Boolean(b)) => op == Equal && a == b,
                (Value::Sequence(a), Value::Sequence(b)) => op == Equal && a == b,
                (Value::Map(a), Value::Map(b)) => op == Equal && a == b,
                _ => false,
            }
        }
        Exists | And | Or | Not => false,
    }
}

/// Collect the statx bits a filter touches, for projection purposes.
pub fn statx_bits(filter: &Filter) -> StatxMask {
    fn walk(filter: &Filter, bits: &mut StatxMask) {
        match filter {
            Filter::Null => {}
            Filter::Comparison { field, .. } => {
                if let FilterField::Statx(mask) = field {
                    *bits |= *mask;
                }
            }
            Filter::Logical { filters, .. } => {
                for filter in filters {
                    walk(filter, bits);
                }
            }
        }
    }

    let mut bits = StatxMask::empty();
    walk(filter, &mut bits);
    bits
}

#[cfg(test)]
mod test {
    use super::{Filter, FilterField, FilterOperator, statx_bits};
    use crate::error::Error;
    use crate::fsentry::Fsentry;
    use crate::id::Id;
    use crate::statx::{Statx, StatxMask};
    use crate::value::{RegexOptions, Value};

    fn entry(size: u64, uid: u32) -> Fsentry {
        let statx = Statx {
            mask: StatxMask::SIZE | StatxMask::UID,
            size,
            uid,
            ..Default::default()
        };
        Fsentry::builder()
            .id(Id::new(vec![1]))
            .name("entry.c")
            .statx(statx)
            .build()
            .unwrap()
    }

    fn size_filter(op: FilterOperator, size: u64) -> Filter {
        Filter::compare(op, FilterField::Statx(StatxMask::SIZE), Value::Uint64(size)).unwrap()
    }

    fn uid_filter(uid: u32) -> Filter {
        Filter::compare(
            FilterOperator::Equal,
            FilterField::Statx(StatxMask::UID),
            Value::Uint32(uid),
        )
        .unwrap()
    }

    #[test]
    fn regex_operand_with_integer_is_invalid() {
        let result = Filter::compare(
            FilterOperator::Regex,
            FilterField::Name,
            Value::Int32(0),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn empty_and_is_invalid() {
        let filter = Filter::Logical {
            op: FilterOperator::And,
            filters: Vec::new(),
        };
        assert!(filter.validate().is_err());
    }

    #[test]
    fn unary_not_is_valid() {
        let filter = Filter::not(uid_filter(0));
        assert!(filter.validate().is_ok());

        let binary_not = Filter::Logical {
            op: FilterOperator::Not,
            filters: vec![Filter::Null, Filter::Null],
        };
        assert!(binary_not.validate().is_err());
    }

    #[test]
    fn composite_statx_field_is_invalid() {
        let result = Filter::compare(
            FilterOperator::GreaterOrEqual,
            FilterField::Statx(StatxMask::ATIME),
            Value::Int64(0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn null_matches_everything() {
        assert!(Filter::Null.matches(&entry(0, 0)));
        assert!(!Filter::not(Filter::Null).matches(&entry(0, 0)));
    }

    #[test]
    fn or_evaluation() {
        let filter = Filter::or(vec![
            size_filter(FilterOperator::StrictlyGreater, 1024),
            uid_filter(1000),
        ]);

        assert!(filter.matches(&entry(1024, 1000)));
        assert!(!filter.matches(&entry(1024, 500)));
        assert!(filter.matches(&entry(4096, 500)));
    }

    #[test]
    fn logical_identities() {
        let entry = entry(1024, 1000);
        for filter in [
            size_filter(FilterOperator::LowerOrEqual, 1024),
            uid_filter(42),
            Filter::Null,
        ] {
            assert_eq!(
                Filter::not(filter.clone()).matches(&entry),
                !filter.matches(&entry)
            );
            assert_eq!(
                Filter::and(vec![filter.clone(), Filter::Null]).matches(&entry),
                filter.matches(&entry)
            );
        }
    }

    #[test]
    fn missing_field_does_not_match() {
        let no_statx = Fsentry::builder().id(Id::new(vec![1])).build().unwrap();
        assert!(!size_filter(FilterOperator::GreaterOrEqual, 0).matches(&no_statx));
        assert!(!Filter::exists(FilterField::Statx(StatxMask::SIZE)).matches(&no_statx));
        assert!(Filter::exists(FilterField::Statx(StatxMask::SIZE)).matches(&entry(0, 0)));
    }

    #[test]
    fn signedness_does_not_coerce() {
        // uid is unsigned; a signed operand never matches.
        let filter = Filter::compare(
            FilterOperator::Equal,
            FilterField::Statx(StatxMask::UID),
            Value::Int32(1000),
        )
        .unwrap();
        assert!(!filter.matches(&entry(0, 1000)));
    }

    #[test]
    fn name_matches_regex() {
        let filter = Filter::compare(
            FilterOperator::Regex,
            FilterField::Name,
            Value::Regex {
                pattern: r".*\.c$".into(),
                options: RegexOptions::empty(),
            },
        )
        .unwrap();
        assert!(filter.matches(&entry(0, 0)));

        let case = Filter::compare(
            FilterOperator::Regex,
            FilterField::Name,
            Value::Regex {
                pattern: "ENTRY".into(),
                options: RegexOptions::CASE_INSENSITIVE,
            },
        )
        .unwrap();
        assert!(case.matches(&entry(0, 0)));
    }

    #[test]
    fn bits_operators() {
        let statx = Statx {
            mask: StatxMask::MODE,
            mode: 0o644,
            ..Default::default()
        };
        let entry = Fsentry::builder().statx(statx).build().unwrap();
        let mode_bits = |op| {
            Filter::compare(op, FilterField::Statx(StatxMask::MODE), Value::Uint32(0o044)).unwrap()
        };

        assert!(mode_bits(FilterOperator::BitsAllSet).matches(&entry));
        assert!(mode_bits(FilterOperator::BitsAnySet).matches(&entry));
        assert!(!mode_bits(FilterOperator::BitsAnyClear).matches(&entry));
        assert!(!mode_bits(FilterOperator::BitsAllClear).matches(&entry));
    }

    #[test]
    fn lower_unsigned_splits_at_zero() {
        let small = size_filter(FilterOperator::StrictlyLower, 40);
        match small.lower_unsigned() {
            Filter::Logical { op, filters } => {
                assert_eq!(op, FilterOperator::And);
                assert_eq!(filters.len(), 2);
                assert!(matches!(
                    &filters[0],
                    Filter::Comparison {
                        op: FilterOperator::StrictlyLower,
                        value: Value::Int64(40),
                        ..
                    }
                ));
            }
            other => panic!("expected a logical filter, got {other:?}"),
        }

        let huge = size_filter(FilterOperator::StrictlyLower, u64::MAX);
        match huge.lower_unsigned() {
            Filter::Logical { op, .. } => assert_eq!(op, FilterOperator::Or),
            other => panic!("expected a logical filter, got {other:?}"),
        }
    }

    #[test]
    fn statx_bits_collects_fields() {
        let filter = Filter::and(vec![
            size_filter(FilterOperator::GreaterOrEqual, 1),
            Filter::not(uid_filter(0)),
        ]);
        assert_eq!(statx_bits(&filter), StatxMask::SIZE | StatxMask::UID);
    }
}
