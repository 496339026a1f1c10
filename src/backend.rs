//! The polymorphic backend contract.
//!
//! A backend is anything that can store or serve a filesystem's metadata: a
//! document store holding a mirror, a POSIX or Lustre walker, a changelog
//! reader. Concrete implementations live in their own crates; this module
//! defines the [`Backend`] trait they implement and the option, filter and
//! report plumbing shared by every one of them.
//!
//! Every operation is optional: the default method bodies return
//! [`Error::NotSupported`], and callers are expected to report that
//! explicitly rather than assume support.

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterField};
use crate::fsentry::{Fsentry, FsentryProperty};
use crate::fsevent::Fsevent;
use crate::id::Id;
use crate::statx::StatxMask;
use crate::value::{Value, ValueMap};

/// An iterator of fsentries, as produced by [`Backend::filter`].
pub type FsentryIterator<'a> = Box<dyn Iterator<Item = Result<Fsentry>> + Send + 'a>;

/// An iterator of report rows, as produced by [`Backend::report`].
pub type ReportIterator<'a> = Box<dyn Iterator<Item = Result<ValueMap>> + Send + 'a>;

/// The fsentry fields a filter query should fill.
///
/// Backends may fill more than requested when that is cheaper; fsentries may
/// still miss requested fields when the data is absent from the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterProjection {
    /// Fsentry fields to fill.
    pub fsentry_mask: FsentryProperty,
    /// Statx fields to fill.
    pub statx_mask: StatxMask,
    /// Namespace xattrs to fill; empty means every one.
    pub ns_xattrs: Vec<String>,
    /// Inode xattrs to fill; empty means every one.
    pub inode_xattrs: Vec<String>,
}

/// One sorting key for a filter query.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterSort {
    /// The field to sort by.
    pub field: FilterField,
    /// Ascending or descending order.
    pub ascending: bool,
}

/// Options applying to a filter or report query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterOptions {
    /// The number of entries to skip.
    pub skip: usize,
    /// The maximum number of entries to return (0 means unlimited).
    pub limit: usize,
    /// Skip entries that fail to convert instead of reporting the error.
    pub skip_error: bool,
    /// Stop after the first result.
    pub one: bool,
    /// Sorting keys, outermost first.
    pub sort: Vec<FilterSort>,
}

/// What a filter or report query should output.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterOutput {
    /// Fsentries, with the given fields filled.
    Projection(FilterProjection),
    /// Values accumulated by the given fields.
    Values(Vec<AccumulatorField>),
}

impl Default for FilterOutput {
    fn default() -> Self {
        FilterOutput::Projection(FilterProjection::default())
    }
}

/// How a report accumulates a field across a group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldAccumulator {
    /// The average of the field.
    Avg,
    /// The number of entries.
    Count,
    /// The maximum of the field.
    Max,
    /// The minimum of the field.
    Min,
    /// The sum of the field.
    Sum,
}

/// A field accumulated by a report.
#[derive(Clone, Debug, PartialEq)]
pub struct AccumulatorField {
    /// The accumulator to apply.
    pub accumulator: FieldAccumulator,
    /// The field to accumulate.
    pub field: FilterField,
}

/// A field a report groups by, with optional range buckets.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeField {
    /// The field to group by.
    pub field: FilterField,
    /// Bucket boundaries; empty means one group per distinct value.
    pub boundaries: Vec<i64>,
}

/// The grouping behaviour of a report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupFields {
    /// Fields identifying a group.
    pub id_fields: Vec<RangeField>,
    /// Fields accumulated inside each group.
    pub acc_fields: Vec<AccumulatorField>,
}

bitflags::bitflags! {
    /// Which piece of information [`Backend::get_info`] should report.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct InfoFlags: u32 {
        /// The backend's capabilities.
        const CAPABILITIES = 1 << 0;
        /// The average object size.
        const AVG_OBJ_SIZE = 1 << 1;
        /// The number of entries.
        const COUNT = 1 << 2;
        /// The time of the first synchronisation.
        const FIRST_SYNC = 1 << 3;
        /// The total size.
        const SIZE = 1 << 4;
        /// The time of the last synchronisation.
        const LAST_SYNC = 1 << 5;
    }
}

/// Compute the first option id of the backend identified by `backend_id`.
///
/// Options are routed by their high byte: `(backend_id << 8) | option_id`.
pub const fn option_first(backend_id: u8) -> u32 {
    (backend_id as u32) << 8
}

/// Extract the backend id an option id refers to.
pub const fn option_backend_id(option: u32) -> u32 {
    option >> 8
}

/// Generic options, implementable irrespective of a backend's type.
pub mod generic_option {
    /// Deprecated options are redefined to this value.
    pub const DEPRECATED: u32 = super::option_first(0);
    /// Garbage-collection mode: when set, only entries without any namespace
    /// link are returned by `filter`. Type: bool.
    pub const GC: u32 = super::option_first(0) + 1;
}

/// Anything that can store or serve a filesystem's metadata.
///
/// Implementations override the operations they support; the rest keep the
/// defaults and report [`Error::NotSupported`]. Resource cleanup belongs in
/// `Drop`.
pub trait Backend: Send {
    /// The backend's unique id. See [`crate::id::BackendId`].
    fn id(&self) -> u8;

    /// The backend's name, mostly for logging purposes.
    fn name(&self) -> &str;

    /// Read an option value into `data`, returning the number of bytes
    /// written.
    ///
    /// Prefer [`get_option`](crate::backend::get_option), which routes the
    /// option through the option-id namespace first.
    fn get_option(&self, option: u32, data: &mut [u8]) -> Result<usize> {
        let _ = (option, data);
        Err(Error::NotSupported)
    }

    /// Set an option from the bytes in `data`.
    ///
    /// Prefer [`set_option`](crate::backend::set_option), which routes the
    /// option through the option-id namespace first.
    fn set_option(&mut self, option: u32, data: &[u8]) -> Result<()> {
        let _ = (option, data);
        Err(Error::NotSupported)
    }

    /// Apply every fsevent of an iterator, in order.
    ///
    /// Returns the number of events applied, stopping at the first error.
    fn update(&mut self, fsevents: &mut dyn Iterator<Item = Result<Fsevent>>) -> Result<usize> {
        let _ = fsevents;
        Err(Error::NotSupported)
    }

    /// Record out-of-band metadata about the mirror (for instance the source
    /// backends used to populate it).
    fn insert_metadata(&mut self, metadata: &ValueMap) -> Result<()> {
        let _ = metadata;
        Err(Error::NotSupported)
    }

    /// Return a backend restricted to the subtree rooted at `id` or `path`.
    fn branch(&self, id: Option<&Id>, path: Option<&str>) -> Result<Box<dyn Backend>> {
        let _ = (id, path);
        Err(Error::NotSupported)
    }

    /// Fetch the root fsentry, filled according to `projection`.
    fn root(&self, projection: &FilterProjection) -> Result<Fsentry> {
        let _ = projection;
        Err(Error::NotSupported)
    }

    /// Iterate over the fsentries matching `filter`.
    fn filter(
        &self,
        filter: &Filter,
        options: &FilterOptions,
        output: &FilterOutput,
    ) -> Result<FsentryIterator<'_>> {
        let _ = (filter, options, output);
        Err(Error::NotSupported)
    }

    /// Group and accumulate the entries matching `filter`.
    fn report(
        &self,
        filter: &Filter,
        group: &GroupFields,
        options: &FilterOptions,
        output: &FilterOutput,
    ) -> Result<ReportIterator<'_>> {
        let _ = (filter, group, options, output);
        Err(Error::NotSupported)
    }

    /// Fetch backend-specific attributes.
    fn get_attribute(&self, flags: u64, arg: Option<&Value>) -> Result<ValueMap> {
        let _ = (flags, arg);
        Err(Error::NotSupported)
    }

    /// Query one piece of information about the backend.
    fn get_info(&self, flags: InfoFlags) -> Result<ValueMap> {
        let _ = flags;
        Err(Error::NotSupported)
    }
}

/// Get the value of a backend's option, routing it through the option-id
/// namespace.
///
/// Generic options (id space 0) are handled here; an option belonging to
/// another backend's space fails with [`Error::InvalidArgument`]; an option
/// in this backend's own space that the backend does not recognize fails
/// with [`Error::ProtocolNotSupported`].
pub fn get_option(backend: &dyn Backend, option: u32, data: &mut [u8]) -> Result<usize> {
    if option_backend_id(option) == 0 {
        return generic_get_option(backend, option, data);
    }
    if option_backend_id(option) != u32::from(backend.id()) {
        return Err(Error::invalid(format!(
            "option {option:#x} belongs to backend {}",
            option_backend_id(option)
        )));
    }
    backend.get_option(option, data)
}

/// Set the value of a backend's option, routing it through the option-id
/// namespace. See [`get_option`].
pub fn set_option(backend: &mut dyn Backend, option: u32, data: &[u8]) -> Result<()> {
    if option_backend_id(option) == 0 {
        return generic_set_option(backend, option, data);
    }
    if option_backend_id(option) != u32::from(backend.id()) {
        return Err(Error::invalid(format!(
            "option {option:#x} belongs to backend {}",
            option_backend_id(option)
        )));
    }
    backend.set_option(option, data)
}

fn generic_get_option(backend: &dyn Backend, option: u32, data: &mut [u8]) -> Result<usize> {
    match option {
        generic_option::DEPRECATED => Err(Error::NotSupported),
        generic_option::GC => backend.get_option(option, data),
        _ => Err(Error::ProtocolNotSupported),
    }
}

fn generic_set_option(backend: &mut dyn Backend, option: u32, data: &[u8]) -> Result<()> {
    match option {
        generic_option::DEPRECATED => Err(Error::NotSupported),
        generic_option::GC => backend.set_option(option, data),
        _ => Err(Error::ProtocolNotSupported),
    }
}
