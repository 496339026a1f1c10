//! In-memory records for filesystem entries.
//!
//! An [`Fsentry`] is the core's view of a filesystem entry (file, directory,
//! symlink, device). It is built either by a walker scanning a live
//! filesystem or by a mirror's read path, and is immutable once created.
//!
//! Not every field is always populated: a mask records which ones are, and
//! the accessors return `None` for the others. There may be several
//! fsentries with the same id but different parents or names, both because
//! of hardlinks and because of the eventual consistency of mirrors.

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::Id;
use crate::statx::Statx;
use crate::value::{Value, ValueMap};

bitflags::bitflags! {
    /// Bits designating the fields of an [`Fsentry`].
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct FsentryProperty: u32 {
        /// The entry's id.
        const ID = 0x0001;
        /// The entry's parent id.
        const PARENT_ID = 0x0002;
        /// The entry's name.
        const NAME = 0x0004;
        /// The entry's inode attributes.
        const STATX = 0x0008;
        /// The entry's symlink target.
        const SYMLINK = 0x0010;
        /// The entry's namespace extended attributes.
        const NAMESPACE_XATTRS = 0x0020;
        /// The entry's inode extended attributes.
        const INODE_XATTRS = 0x0040;

        /// Every field.
        const ALL = 0x007f;
    }
}

/// A filesystem entry.
///
/// Built with [`Fsentry::builder`]; every field is optional, and the mask of
/// populated fields is computed at build time.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Fsentry {
    mask: FsentryProperty,
    id: Id,
    parent_id: Id,
    name: String,
    statx: Statx,
    ns_xattrs: ValueMap,
    inode_xattrs: ValueMap,
    symlink: String,
}

impl Fsentry {
    /// Start building an fsentry.
    pub fn builder() -> FsentryBuilder {
        FsentryBuilder::default()
    }

    /// The mask of populated fields.
    pub fn mask(&self) -> FsentryProperty {
        self.mask
    }

    /// The entry's id, if populated.
    pub fn id(&self) -> Option<&Id> {
        self.mask.contains(FsentryProperty::ID).then_some(&self.id)
    }

    /// The id of the entry's parent, if populated.
    pub fn parent_id(&self) -> Option<&Id> {
        self.mask
            .contains(FsentryProperty::PARENT_ID)
            .then_some(&self.parent_id)
    }

    /// The entry's name for this link, if populated.
    pub fn name(&self) -> Option<&str> {
        self.mask
            .contains(FsentryProperty::NAME)
            .then_some(self.name.as_str())
    }

    /// The entry's inode attributes, if populated.
    pub fn statx(&self) -> Option<&Statx> {
        self.mask
            .contains(FsentryProperty::STATX)
            .then_some(&self.statx)
    }

    /// The entry's namespace extended attributes, if populated.
    pub fn ns_xattrs(&self) -> Option<&ValueMap> {
        self.mask
            .contains(FsentryProperty::NAMESPACE_XATTRS)
            .then_some(&self.ns_xattrs)
    }

    /// The entry's inode extended attributes, if populated.
    pub fn inode_xattrs(&self) -> Option<&ValueMap> {
        self.mask
            .contains(FsentryProperty::INODE_XATTRS)
            .then_some(&self.inode_xattrs)
    }

    /// The symlink target, if populated.
    pub fn symlink(&self) -> Option<&str> {
        self.mask
            .contains(FsentryProperty::SYMLINK)
            .then_some(self.symlink.as_str())
    }

    /// Look up a value in the entry's inode xattrs.
    ///
    /// `key` may use dot notation: "user.blob" first tries the literal key,
    /// then descends into the "user" submap looking for "blob".
    pub fn find_inode_xattr(&self, key: &str) -> Option<&Value> {
        let mut map = self.inode_xattrs()?;
        if let Some(value) = map.get(key) {
            return Some(value);
        }

        let mut remainder = key;
        while let Some((prefix, rest)) = remainder.split_once('.') {
            map = map.get(prefix)?.as_map()?;
            if let Some(value) = map.get(rest) {
                return Some(value);
            }
            remainder = rest;
        }
        None
    }

    /// The entry's path, from its namespace "path" xattr.
    pub fn path(&self) -> Option<&str> {
        self.ns_xattrs()?.get("path")?.as_str()
    }

    /// The entry's path relative to the mount point the mirror was synced
    /// from.
    ///
    /// Paths are mirrored relative to the sync source's mount point, with the
    /// mount point itself kept as "/"; acting on the mirrored path directly
    /// would point outside the tree. The mount root maps to ".".
    pub fn relative_path(&self) -> Option<&str> {
        let path = self.path()?;
        match path.strip_prefix('/') {
            Some("") => Some("."),
            Some(relative) => Some(relative),
            None => Some(path),
        }
    }
}

/// Builder for [`Fsentry`].
#[derive(Debug, Default)]
pub struct FsentryBuilder {
    id: Option<Id>,
    parent_id: Option<Id>,
    name: Option<String>,
    statx: Option<Statx>,
    ns_xattrs: Option<ValueMap>,
    inode_xattrs: Option<ValueMap>,
    symlink: Option<String>,
}

impl FsentryBuilder {
    /// Set the entry's id.
    pub fn id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the id of the entry's parent.
    pub fn parent_id(mut self, parent_id: Id) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the entry's name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the entry's inode attributes.
    pub fn statx(mut self, statx: Statx) -> Self {
        self.statx = Some(statx);
        self
    }

    /// Set the entry's namespace extended attributes.
    pub fn ns_xattrs(mut self, ns_xattrs: ValueMap) -> Self {
        self.ns_xattrs = Some(ns_xattrs);
        self
    }

    /// Set the entry's inode extended attributes.
    pub fn inode_xattrs(mut self, inode_xattrs: ValueMap) -> Self {
        self.inode_xattrs = Some(inode_xattrs);
        self
    }

    /// Set the symlink target.
    pub fn symlink(mut self, symlink: impl Into<String>) -> Self {
        self.symlink = Some(symlink.into());
        self
    }

    /// Build the fsentry.
    ///
    /// Fails with [`Error::InvalidArgument`] when a symlink target is given
    /// but the statx type says the entry is not a symbolic link.
    pub fn build(self) -> Result<Fsentry> {
        if self.symlink.is_some()
            && self.statx.as_ref().is_some_and(|statx| !statx.is_symlink())
        {
            return Err(Error::invalid("symlink target on a non-symlink entry"));
        }

        let mut mask = FsentryProperty::empty();
        let mut entry = Fsentry::default();

        if let Some(id) = self.id {
            mask |= FsentryProperty::ID;
            entry.id = id;
        }
        if let Some(parent_id) = self.parent_id {
            mask |= FsentryProperty::PARENT_ID;
            entry.parent_id = parent_id;
        }
        if let Some(name) = self.name {
            mask |= FsentryProperty::NAME;
            entry.name = name;
        }
        if let Some(statx) = self.statx {
            mask |= FsentryProperty::STATX;
            entry.statx = statx;
        }
        if let Some(ns_xattrs) = self.ns_xattrs {
            mask |= FsentryProperty::NAMESPACE_XATTRS;
            entry.ns_xattrs = ns_xattrs;
        }
        if let Some(inode_xattrs) = self.inode_xattrs {
            mask |= FsentryProperty::INODE_XATTRS;
            entry.inode_xattrs = inode_xattrs;
        }
        if let Some(symlink) = self.symlink {
            mask |= FsentryProperty::SYMLINK;
            entry.symlink = symlink;
        }

        entry.mask = mask;
        Ok(entry)
    }
}

#[cfg(test)]
mod test {
    use super::{Fsentry, FsentryProperty};
    use crate::id::Id;
    use crate::statx::{Statx, StatxMask};
    use crate::value::{Value, ValueMap};

    #[test]
    fn mask_reflects_populated_fields() {
        let entry = Fsentry::builder()
            .id(Id::new(vec![1]))
            .name("file")
            .build()
            .unwrap();

        assert_eq!(entry.mask(), FsentryProperty::ID | FsentryProperty::NAME);
        assert_eq!(entry.id(), Some(&Id::new(vec![1])));
        assert_eq!(entry.name(), Some("file"));
        assert_eq!(entry.parent_id(), None);
        assert_eq!(entry.statx(), None);
    }

    #[test]
    fn symlink_requires_symlink_type() {
        let statx = Statx {
            mask: StatxMask::TYPE,
            mode: 0o100644,
            ..Default::default()
        };
        let result = Fsentry::builder()
            .id(Id::new(vec![1]))
            .statx(statx)
            .symlink("target")
            .build();
        assert!(result.is_err());

        let statx = Statx {
            mask: StatxMask::TYPE,
            mode: 0o120777,
            ..Default::default()
        };
        let entry = Fsentry::builder()
            .id(Id::new(vec![1]))
            .statx(statx)
            .symlink("target")
            .build()
            .unwrap();
        assert_eq!(entry.symlink(), Some("target"));
    }

    #[test]
    fn inode_xattr_dot_notation() {
        let mut users = ValueMap::new();
        users.insert("blob", Value::String("data".into()));
        let mut xattrs = ValueMap::new();
        xattrs.insert("users", Value::Map(users));
        xattrs.insert("plain.key", Value::Uint32(7));

        let entry = Fsentry::builder()
            .id(Id::new(vec![1]))
            .inode_xattrs(xattrs)
            .build()
            .unwrap();

        assert_eq!(
            entry.find_inode_xattr("users.blob"),
            Some(&Value::String("data".into()))
        );
        // A literal key wins over dot-notation descent.
        assert_eq!(entry.find_inode_xattr("plain.key"), Some(&Value::Uint32(7)));
        assert_eq!(entry.find_inode_xattr("users.missing"), None);
    }

    #[test]
    fn relative_path() {
        let mut ns = ValueMap::new();
        ns.insert("path", Value::String("/a/b".into()));
        let entry = Fsentry::builder().ns_xattrs(ns).build().unwrap();
        assert_eq!(entry.path(), Some("/a/b"));
        assert_eq!(entry.relative_path(), Some("a/b"));

        let mut ns = ValueMap::new();
        ns.insert("path", Value::String("/".into()));
        let root = Fsentry::builder().ns_xattrs(ns).build().unwrap();
        assert_eq!(root.relative_path(), Some("."));
    }
}
