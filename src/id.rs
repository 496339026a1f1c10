//! Unique fsentry identifiers.
//!
//! An [`Id`] is an opaque byte string that identifies an fsentry throughout a
//! filesystem's life. The core never interprets it, but two structured forms
//! exist: ids built from OS file handles (cf. `name_to_handle_at(2)`) and ids
//! built from Lustre fids. Both convert back to their structured form
//! byte-for-byte.
//!
//! As a convention, an id of size 0 designates the parent of a filesystem
//! root, something that does not exist.

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// Backend identifiers.
///
/// Each backend is identified by a unique 16-bit value. Values 0 through 127
/// are reserved for the upstream distribution; 128 through 255 are free for
/// third parties. Backend ids also partition the option-id namespace, see
/// [`crate::backend`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum BackendId {
    /// Not linked to any particular backend; used for generic options.
    Generic = 0,
    Posix,
    PosixMpi,
    Mongo,
    Lustre,
    LustreMpi,
    Hestia,
    MpiFile,
    Retention,
    Mfu,
}

impl BackendId {
    /// The largest backend id reserved for the upstream distribution.
    pub const RESERVED_MAX: u16 = 127;
}

impl From<BackendId> for u16 {
    fn from(id: BackendId) -> u16 {
        id as u16
    }
}

/// An OS file handle, split into its public fields.
///
/// The `data` field corresponds to `f_handle` and `handle_type` to the field
/// of the same name in the C `struct file_handle`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileHandle {
    /// The handle type, as reported by the OS.
    pub handle_type: libc::c_int,
    /// The opaque handle bytes.
    pub data: Vec<u8>,
}

/// A Lustre fid: the three-word identifier Lustre gives every object.
#[derive(
    Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq,
)]
#[repr(C)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct LuFid {
    /// Sequence number.
    pub seq: u64,
    /// Object id inside the sequence.
    pub oid: u32,
    /// Object version.
    pub ver: u32,
}

/// The size of an id built by [`Id::from_lu_fid`].
///
/// Lustre file handles hold two fids, the entry's own and (usually zeroed)
/// its parent's; the id keeps both plus the backend prefix.
pub const LUSTRE_ID_SIZE: usize = size_of::<u16>() + 2 * size_of::<LuFid>();

/// A unique identifier for an fsentry.
///
/// Ids are equal iff their byte ranges are byte-identical.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Id {
    data: Box<[u8]>,
}

impl Id {
    /// Create an id from arbitrary bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Id {
            data: data.into().into_boxed_slice(),
        }
    }

    /// The id of a filesystem root's parent (the empty id).
    pub fn root_parent() -> Self {
        Id::default()
    }

    /// The raw bytes of this id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The number of bytes in this id.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether this id designates the parent of a filesystem root.
    pub fn is_root_parent(&self) -> bool {
        self.data.is_empty()
    }

    /// Build an id from an OS file handle and the id of the backend that
    /// produced it.
    ///
    /// The layout is `backend_id ‖ handle_type ‖ handle bytes`, using the
    /// host's native integer representation so that [`Id::to_file_handle`] is
    /// the exact inverse.
    pub fn from_file_handle(handle: &FileHandle, backend_id: u16) -> Self {
        let mut data =
            Vec::with_capacity(size_of::<u16>() + size_of::<libc::c_int>() + handle.data.len());
        data.extend_from_slice(&backend_id.to_ne_bytes());
        data.extend_from_slice(&handle.handle_type.to_ne_bytes());
        data.extend_from_slice(&handle.data);
        Id::new(data)
    }

    /// Unpack this id into an OS file handle.
    ///
    /// Fails with [`Error::InvalidArgument`] when the id is too short to hold
    /// the backend prefix and a handle type.
    pub fn to_file_handle(&self) -> Result<FileHandle> {
        const HEADER: usize = size_of::<u16>() + size_of::<libc::c_int>();
        if self.data.len() < HEADER {
            return Err(Error::invalid("id cannot be unpacked into a file handle"));
        }

        let mut handle_type = [0; size_of::<libc::c_int>()];
        handle_type.copy_from_slice(&self.data[size_of::<u16>()..HEADER]);
        Ok(FileHandle {
            handle_type: libc::c_int::from_ne_bytes(handle_type),
            data: self.data[HEADER..].to_vec(),
        })
    }

    /// The backend prefix of this id.
    pub fn backend_id(&self) -> Result<u16> {
        if self.data.len() < size_of::<u16>() {
            return Err(Error::invalid("id is too short to carry a backend id"));
        }
        let mut prefix = [0; size_of::<u16>()];
        prefix.copy_from_slice(&self.data[..size_of::<u16>()]);
        Ok(u16::from_ne_bytes(prefix))
    }

    /// Build an id from a Lustre fid.
    ///
    /// The fid is followed by 16 zero bytes, reserved for the parent fid that
    /// Lustre file handles carry.
    pub fn from_lu_fid(fid: &LuFid) -> Self {
        let mut data = Vec::with_capacity(LUSTRE_ID_SIZE);
        data.extend_from_slice(&u16::from(BackendId::Lustre).to_ne_bytes());
        data.extend_from_slice(fid.as_bytes());
        data.extend_from_slice(&[0; size_of::<LuFid>()]);
        Id::new(data)
    }

    /// Read back the Lustre fid this id was built from.
    ///
    /// Fails with [`Error::InvalidArgument`] when the id does not have the
    /// layout produced by [`Id::from_lu_fid`].
    pub fn as_lu_fid(&self) -> Result<LuFid> {
        if self.data.len() != LUSTRE_ID_SIZE
            || self.backend_id()? != u16::from(BackendId::Lustre)
        {
            return Err(Error::invalid("id does not hold a Lustre fid"));
        }
        let start = size_of::<u16>();
        LuFid::read_from_bytes(&self.data[start..start + size_of::<LuFid>()])
            .map_err(|_| Error::invalid("id does not hold a Lustre fid"))
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id(0x")?;
        for byte in self.data.iter() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl From<&[u8]> for Id {
    fn from(data: &[u8]) -> Self {
        Id::new(data.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::{BackendId, FileHandle, Id, LUSTRE_ID_SIZE, LuFid};

    #[test]
    fn file_handle_round_trip() {
        let handle = FileHandle {
            handle_type: 0x0123_4567,
            data: vec![0x89, 0xab, 0xcd, 0xef],
        };
        let id = Id::from_file_handle(&handle, BackendId::Posix.into());
        assert_eq!(id.size(), 2 + 4 + 4);
        assert_eq!(id.backend_id().unwrap(), u16::from(BackendId::Posix));
        assert_eq!(id.to_file_handle().unwrap(), handle);
    }

    #[test]
    fn file_handle_round_trip_empty_handle() {
        let handle = FileHandle {
            handle_type: 0,
            data: Vec::new(),
        };
        let id = Id::from_file_handle(&handle, 200);
        assert_eq!(id.to_file_handle().unwrap(), handle);
        assert_eq!(id.backend_id().unwrap(), 200);
    }

    #[test]
    fn short_id_is_not_a_file_handle() {
        assert!(Id::new(vec![1, 2, 3]).to_file_handle().is_err());
    }

    #[test]
    fn lu_fid_round_trip() {
        let fid = LuFid {
            seq: 0x0123_4567_89ab_cdef,
            oid: 0xfedc_ba98,
            ver: 0x7654_3210,
        };
        let id = Id::from_lu_fid(&fid);
        assert_eq!(id.size(), LUSTRE_ID_SIZE);
        assert_eq!(id.as_lu_fid().unwrap(), fid);
        // The parent fid slot stays zeroed.
        assert!(id.as_bytes()[2 + 16..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn non_lustre_id_is_not_a_fid() {
        let handle = FileHandle {
            handle_type: 1,
            data: vec![0; 28],
        };
        let id = Id::from_file_handle(&handle, BackendId::Posix.into());
        assert_eq!(id.size(), LUSTRE_ID_SIZE);
        assert!(id.as_lu_fid().is_err());
    }

    #[test]
    fn root_parent_is_empty() {
        let root_parent = Id::root_parent();
        assert!(root_parent.is_root_parent());
        assert_eq!(root_parent.size(), 0);
        assert_eq!(root_parent, Id::new(Vec::new()));
    }

    #[test]
    fn ids_compare_by_bytes() {
        assert_eq!(Id::new(vec![1, 2]), Id::from(&[1u8, 2][..]));
        assert_ne!(Id::new(vec![1, 2]), Id::new(vec![1, 2, 0]));
    }
}
