//! Filesystem events.
//!
//! An [`Fsevent`] describes one mutation to apply to a mirror: create or
//! update an inode ([`Fsevent::Upsert`]), add or remove a namespace link
//! ([`Fsevent::Link`], [`Fsevent::Unlink`]), delete an inode and every link
//! pointing at it ([`Fsevent::Delete`]), or update extended attributes
//! ([`Fsevent::Xattr`]).
//!
//! Producers that cannot fill an event completely (changelog readers mostly)
//! attach an enrichment request under the reserved `rbh-fsevents` xattr key;
//! an enricher later resolves it against the live filesystem. See
//! [`Fsevent::enrich_map`].

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::Id;
use crate::statx::Statx;
use crate::value::{Value, ValueMap};

/// The xattr key under which enrichment requests travel.
pub const ENRICH_KEY: &str = "rbh-fsevents";

/// The enrich-map slot listing the xattr names to fetch.
pub const ENRICH_XATTRS: &str = "xattrs";

/// The enrich-map slot requesting Lustre-specific attributes.
pub const ENRICH_LUSTRE: &str = "lustre";

/// The xattr key carrying an entry's fid.
pub const XATTR_FID: &str = "fid";

/// What an xattr event applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum XattrTarget {
    /// The inode xattrs shared by every hardlink of the entry.
    Inode,
    /// The namespace xattrs of one specific link.
    Ns {
        /// The parent of the targeted link.
        parent_id: Id,
        /// The name of the targeted link.
        name: String,
    },
}

/// A typed mutation describing a change to apply to the mirror.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Fsevent {
    /// Create or update an inode.
    ///
    /// If the inode does not exist in the mirror it is created, otherwise it
    /// is updated.
    Upsert {
        /// The entry's id.
        id: Id,
        /// Inode xattrs to set, and possibly an enrichment request.
        xattrs: ValueMap,
        /// The inode attributes, when known.
        statx: Option<Statx>,
        /// The symlink target, only when the entry is a symbolic link.
        symlink: Option<String>,
    },
    /// Associate a `(parent, name)` couple to an inode.
    ///
    /// If the inode does not already exist it is created. If the link already
    /// exists, any namespace xattr previously associated with it is lost.
    Link {
        /// The entry's id.
        id: Id,
        /// Namespace xattrs to set on the new link.
        xattrs: ValueMap,
        /// The parent of the link.
        parent_id: Id,
        /// The name of the link.
        name: String,
    },
    /// Remove a link from the mirror.
    Unlink {
        /// The entry's id.
        id: Id,
        /// The parent of the link.
        parent_id: Id,
        /// The name of the link.
        name: String,
    },
    /// Remove an inode and every link pointing at it from the mirror.
    Delete {
        /// The entry's id.
        id: Id,
    },
    /// Update an inode's or one link's extended attributes.
    Xattr {
        /// The entry's id.
        id: Id,
        /// The xattrs to set, and possibly an enrichment request.
        xattrs: ValueMap,
        /// Whether the inode xattrs or one link's namespace xattrs are
        /// targeted.
        target: XattrTarget,
    },
}

impl Fsevent {
    /// Create an upsert event.
    ///
    /// Fails with [`Error::InvalidArgument`] when a symlink target is given
    /// but `statx` says the entry is not a symbolic link.
    pub fn upsert(
        id: Id,
        xattrs: ValueMap,
        statx: Option<Statx>,
        symlink: Option<String>,
    ) -> Result<Fsevent> {
        if symlink.is_some() && statx.as_ref().is_some_and(|statx| !statx.is_symlink()) {
            return Err(Error::invalid("symlink target on a non-symlink upsert"));
        }
        Ok(Fsevent::Upsert {
            id,
            xattrs,
            statx,
            symlink,
        })
    }

    /// Create a link event.
    pub fn link(id: Id, xattrs: ValueMap, parent_id: Id, name: impl Into<String>) -> Fsevent {
        Fsevent::Link {
            id,
            xattrs,
            parent_id,
            name: name.into(),
        }
    }

    /// Create an unlink event.
    pub fn unlink(id: Id, parent_id: Id, name: impl Into<String>) -> Fsevent {
        Fsevent::Unlink {
            id,
            parent_id,
            name: name.into(),
        }
    }

    /// Create a delete event.
    pub fn delete(id: Id) -> Fsevent {
        Fsevent::Delete { id }
    }

    /// Create an inode xattr event, common to all hardlinks of the entry.
    pub fn inode_xattr(id: Id, xattrs: ValueMap) -> Fsevent {
        Fsevent::Xattr {
            id,
            xattrs,
            target: XattrTarget::Inode,
        }
    }

    /// Create a namespace xattr event targeting one specific link.
    pub fn ns_xattr(id: Id, xattrs: ValueMap, parent_id: Id, name: impl Into<String>) -> Fsevent {
        Fsevent::Xattr {
            id,
            xattrs,
            target: XattrTarget::Ns {
                parent_id,
                name: name.into(),
            },
        }
    }

    /// Create an xattr event from optional link coordinates.
    ///
    /// Either both `parent_id` and `name` are given (the event targets the
    /// namespace xattrs of that link) or neither is (the event targets the
    /// inode xattrs); a half-specified target is rejected with
    /// [`Error::InvalidArgument`].
    pub fn xattr(
        id: Id,
        xattrs: ValueMap,
        parent_id: Option<Id>,
        name: Option<String>,
    ) -> Result<Fsevent> {
        let target = match (parent_id, name) {
            (None, None) => XattrTarget::Inode,
            (Some(parent_id), Some(name)) => XattrTarget::Ns { parent_id, name },
            _ => {
                return Err(Error::invalid(
                    "xattr events need both a parent id and a name, or neither",
                ));
            }
        };
        Ok(Fsevent::Xattr { id, xattrs, target })
    }

    /// The id of the entry this event applies to.
    pub fn id(&self) -> &Id {
        match self {
            Fsevent::Upsert { id, .. }
            | Fsevent::Link { id, .. }
            | Fsevent::Unlink { id, .. }
            | Fsevent::Delete { id }
            | Fsevent::Xattr { id, .. } => id,
        }
    }

    /// The xattrs this event carries, if the variant has any.
    pub fn xattrs(&self) -> Option<&ValueMap> {
        match self {
            Fsevent::Upsert { xattrs, .. }
            | Fsevent::Link { xattrs, .. }
            | Fsevent::Xattr { xattrs, .. } => Some(xattrs),
            Fsevent::Unlink { .. } | Fsevent::Delete { .. } => None,
        }
    }

    /// The xattrs this event carries, mutably.
    pub fn xattrs_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Fsevent::Upsert { xattrs, .. }
            | Fsevent::Link { xattrs, .. }
            | Fsevent::Xattr { xattrs, .. } => Some(xattrs),
            Fsevent::Unlink { .. } | Fsevent::Delete { .. } => None,
        }
    }

    /// The enrichment request attached to this event, if any.
    pub fn enrich_map(&self) -> Option<&ValueMap> {
        self.xattrs()?.get(ENRICH_KEY)?.as_map()
    }

    /// Look up one slot of the enrichment request.
    pub fn enrich_element(&self, key: &str) -> Option<&Value> {
        self.enrich_map()?.get(key)
    }

    /// Whether the enrichment request asks for the xattr named `key`.
    pub fn partial_xattr(&self, key: &str) -> Option<&Value> {
        self.enrich_element(ENRICH_XATTRS)?
            .as_sequence()?
            .iter()
            .find(|value| value.as_str() == Some(key))
    }

    /// Whether this event still needs enrichment before it can be applied to
    /// a mirror.
    pub fn is_partial(&self) -> bool {
        self.enrich_map().is_some()
    }

    /// The path xattr of this event, if it carries one.
    pub fn path(&self) -> Option<&str> {
        self.xattrs()?.get("path")?.as_str()
    }

    /// Look up a concrete xattr carried by this event.
    pub fn find_xattr(&self, key: &str) -> Option<&Value> {
        self.xattrs()?.get(key)
    }
}

#[cfg(test)]
mod test {
    use super::{ENRICH_KEY, ENRICH_XATTRS, Fsevent, XattrTarget};
    use crate::id::Id;
    use crate::statx::{Statx, StatxMask};
    use crate::value::{Value, ValueMap};

    fn enrich_request(names: &[&str]) -> ValueMap {
        let mut enrich = ValueMap::new();
        enrich.insert(
            ENRICH_XATTRS,
            Value::Sequence(
                names
                    .iter()
                    .map(|name| Value::String((*name).into()))
                    .collect(),
            ),
        );
        let mut xattrs = ValueMap::new();
        xattrs.insert(ENRICH_KEY, Value::Map(enrich));
        xattrs
    }

    #[test]
    fn xattr_target_is_both_or_neither() {
        let id = Id::new(vec![1]);
        let parent = Id::new(vec![2]);

        let inode = Fsevent::xattr(id.clone(), ValueMap::new(), None, None).unwrap();
        assert!(matches!(
            inode,
            Fsevent::Xattr {
                target: XattrTarget::Inode,
                ..
            }
        ));

        let ns = Fsevent::xattr(
            id.clone(),
            ValueMap::new(),
            Some(parent.clone()),
            Some("name".into()),
        )
        .unwrap();
        assert!(matches!(
            ns,
            Fsevent::Xattr {
                target: XattrTarget::Ns { .. },
                ..
            }
        ));

        assert!(Fsevent::xattr(id.clone(), ValueMap::new(), Some(parent), None).is_err());
        assert!(Fsevent::xattr(id, ValueMap::new(), None, Some("name".into())).is_err());
    }

    #[test]
    fn upsert_symlink_needs_symlink_type() {
        let statx = Statx {
            mask: StatxMask::TYPE,
            mode: 0o100644,
            ..Default::default()
        };
        assert!(
            Fsevent::upsert(
                Id::new(vec![1]),
                ValueMap::new(),
                Some(statx),
                Some("target".into()),
            )
            .is_err()
        );

        // Without a statx type, the symlink is accepted as is; the enricher
        // will fill the type in later.
        assert!(
            Fsevent::upsert(
                Id::new(vec![1]),
                ValueMap::new(),
                None,
                Some("target".into()),
            )
            .is_ok()
        );
    }

    #[test]
    fn partial_xattr_lookup() {
        let event = Fsevent::inode_xattr(Id::new(vec![1]), enrich_request(&["user.blob"]));
        assert!(event.is_partial());
        assert!(event.partial_xattr("user.blob").is_some());
        assert!(event.partial_xattr("other").is_none());

        let plain = Fsevent::inode_xattr(Id::new(vec![1]), ValueMap::new());
        assert!(!plain.is_partial());
    }

    #[test]
    fn id_covers_every_variant() {
        let id = Id::new(vec![7]);
        for event in [
            Fsevent::upsert(id.clone(), ValueMap::new(), None, None).unwrap(),
            Fsevent::link(id.clone(), ValueMap::new(), Id::root_parent(), "n"),
            Fsevent::unlink(id.clone(), Id::root_parent(), "n"),
            Fsevent::delete(id.clone()),
            Fsevent::inode_xattr(id.clone(), ValueMap::new()),
        ] {
            assert_eq!(event.id(), &id);
        }
    }
}
