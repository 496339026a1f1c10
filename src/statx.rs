//! Inode attributes, statx style.
//!
//! [`Statx`] is a flat record of the usual POSIX attributes, with timestamps
//! split into second/nanosecond halves and device numbers split into
//! major/minor, each half independently maskable. The mask bit positions
//! match the host's `statx(2)` definition for the first 13 bits; the extra
//! robinhood-specific bits live in the upper half of the word.

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Which fields of a [`Statx`] are filled.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
    pub struct StatxMask: u32 {
        /// The file type part of `mode`.
        const TYPE = 0x0000_0001;
        /// The permission part of `mode`.
        const MODE = 0x0000_0002;
        /// `nlink`.
        const NLINK = 0x0000_0004;
        /// `uid`.
        const UID = 0x0000_0008;
        /// `gid`.
        const GID = 0x0000_0010;
        /// `atime.sec`.
        const ATIME_SEC = 0x0000_0020;
        /// `mtime.sec`.
        const MTIME_SEC = 0x0000_0040;
        /// `ctime.sec`.
        const CTIME_SEC = 0x0000_0080;
        /// `ino`.
        const INO = 0x0000_0100;
        /// `size`.
        const SIZE = 0x0000_0200;
        /// `blocks`.
        const BLOCKS = 0x0000_0400;
        /// `btime.sec`.
        const BTIME_SEC = 0x0000_0800;
        /// `mnt_id`.
        const MNT_ID = 0x0000_1000;
        /// `dev_minor`.
        const DEV_MINOR = 0x0020_0000;
        /// `dev_major`.
        const DEV_MAJOR = 0x0040_0000;
        /// `rdev_minor`.
        const RDEV_MINOR = 0x0080_0000;
        /// `rdev_major`.
        const RDEV_MAJOR = 0x0100_0000;
        /// `mtime.nsec`.
        const MTIME_NSEC = 0x0200_0000;
        /// `ctime.nsec`.
        const CTIME_NSEC = 0x0400_0000;
        /// `btime.nsec`.
        const BTIME_NSEC = 0x0800_0000;
        /// `atime.nsec`.
        const ATIME_NSEC = 0x1000_0000;
        /// `attributes` and `attributes_mask`.
        const ATTRIBUTES = 0x2000_0000;
        /// `blksize`.
        const BLKSIZE = 0x4000_0000;

        /// Both halves of `atime`.
        const ATIME = Self::ATIME_SEC.bits() | Self::ATIME_NSEC.bits();
        /// Both halves of `btime`.
        const BTIME = Self::BTIME_SEC.bits() | Self::BTIME_NSEC.bits();
        /// Both halves of `ctime`.
        const CTIME = Self::CTIME_SEC.bits() | Self::CTIME_NSEC.bits();
        /// Both halves of `mtime`.
        const MTIME = Self::MTIME_SEC.bits() | Self::MTIME_NSEC.bits();
        /// Both halves of `rdev`.
        const RDEV = Self::RDEV_MAJOR.bits() | Self::RDEV_MINOR.bits();
        /// Both halves of `dev`.
        const DEV = Self::DEV_MAJOR.bits() | Self::DEV_MINOR.bits();

        /// What `stat(2)` reports.
        const BASIC_STATS = 0x57e0_07ff;
        /// Every defined bit.
        const ALL = 0x7fe0_1fff;
    }
}

impl StatxMask {
    /// Map a field name ("size", "atime", "rdev", ...) to its mask bits.
    ///
    /// Timestamp and device names map to both halves of the field.
    pub fn from_name(name: &str) -> Option<StatxMask> {
        Some(match name {
            "type" => StatxMask::TYPE,
            "mode" => StatxMask::MODE,
            "nlink" => StatxMask::NLINK,
            "uid" => StatxMask::UID,
            "gid" => StatxMask::GID,
            "atime" => StatxMask::ATIME,
            "mtime" => StatxMask::MTIME,
            "ctime" => StatxMask::CTIME,
            "btime" => StatxMask::BTIME,
            "ino" => StatxMask::INO,
            "size" => StatxMask::SIZE,
            "blocks" => StatxMask::BLOCKS,
            "mnt_id" => StatxMask::MNT_ID,
            "blksize" => StatxMask::BLKSIZE,
            "attributes" => StatxMask::ATTRIBUTES,
            "rdev" => StatxMask::RDEV,
            "dev" => StatxMask::DEV,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// File attribute bits, as reported in `Statx::attributes`.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
    pub struct StatxAttributes: u64 {
        /// The file is compressed by the filesystem.
        const COMPRESSED = 0x0000_0004;
        /// The file cannot be modified.
        const IMMUTABLE = 0x0000_0010;
        /// The file can only be opened in append mode.
        const APPEND = 0x0000_0020;
        /// The file is not a candidate for backup.
        const NODUMP = 0x0000_0040;
        /// The file requires a key to be encrypted by the filesystem.
        const ENCRYPTED = 0x0000_0800;
        /// The directory is an automount trigger.
        const AUTOMOUNT = 0x0000_1000;
        /// The directory is the root of a mount.
        const MOUNT_ROOT = 0x0000_2000;
        /// The file has fs-verity enabled.
        const VERITY = 0x0010_0000;
        /// The file is in the DAX (cpu direct access) state.
        const DAX = 0x0020_0000;
    }
}

/// A timestamp split into its second and nanosecond halves.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct StatxTimestamp {
    /// Seconds since the epoch.
    pub sec: i64,
    /// Nanoseconds past the second.
    pub nsec: u32,
}

const TYPE_BITS: u16 = 0o170000;
const MODE_BITS: u16 = 0o007777;
const TYPE_SYMLINK: u16 = 0o120000;

/// Inode attributes for an fsentry.
///
/// `mask` says which fields hold meaningful data; the others keep their
/// default value and must not be interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Statx {
    /// Which fields below are filled.
    pub mask: StatxMask,
    /// Preferred I/O block size.
    pub blksize: u32,
    /// File attribute bits.
    pub attributes: StatxAttributes,
    /// Which bits of `attributes` are meaningful on this filesystem.
    pub attributes_mask: StatxAttributes,
    /// Number of hard links.
    pub nlink: u32,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// File type and permissions.
    pub mode: u16,
    /// Inode number.
    pub ino: u64,
    /// Size in bytes.
    pub size: u64,
    /// Allocated size in 512-byte blocks.
    pub blocks: u64,
    /// Time of last access.
    pub atime: StatxTimestamp,
    /// Time of creation.
    pub btime: StatxTimestamp,
    /// Time of last status change.
    pub ctime: StatxTimestamp,
    /// Time of last modification.
    pub mtime: StatxTimestamp,
    /// Major number of the device this entry represents.
    pub rdev_major: u32,
    /// Minor number of the device this entry represents.
    pub rdev_minor: u32,
    /// Major number of the device holding this entry.
    pub dev_major: u32,
    /// Minor number of the device holding this entry.
    pub dev_minor: u32,
    /// Mount id.
    pub mnt_id: u64,
}

impl Statx {
    /// Whether the (masked) file type says this entry is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.mask.contains(StatxMask::TYPE) && self.mode & TYPE_BITS == TYPE_SYMLINK
    }

    /// Overlay the fields present in `overlay` onto `self`.
    ///
    /// Only the fields set in `overlay.mask` are copied; the overlay wins
    /// per field. The resulting mask is the union of both masks.
    pub fn merge(&mut self, overlay: &Statx) {
        let mask = overlay.mask;

        if mask.contains(StatxMask::TYPE) {
            self.mode = (self.mode & !TYPE_BITS) | (overlay.mode & TYPE_BITS);
        }
        if mask.contains(StatxMask::MODE) {
            self.mode = (self.mode & !MODE_BITS) | (overlay.mode & MODE_BITS);
        }
        if mask.contains(StatxMask::NLINK) {
            self.nlink = overlay.nlink;
        }
        if mask.contains(StatxMask::UID) {
            self.uid = overlay.uid;
        }
        if mask.contains(StatxMask::GID) {
            self.gid = overlay.gid;
        }
        if mask.contains(StatxMask::ATIME_SEC) {
            self.atime.sec = overlay.atime.sec;
        }
        if mask.contains(StatxMask::ATIME_NSEC) {
            self.atime.nsec = overlay.atime.nsec;
        }
        if mask.contains(StatxMask::BTIME_SEC) {
            self.btime.sec = overlay.btime.sec;
        }
        if mask.contains(StatxMask::BTIME_NSEC) {
            self.btime.nsec = overlay.btime.nsec;
        }
        if mask.contains(StatxMask::CTIME_SEC) {
            self.ctime.sec = overlay.ctime.sec;
        }
        if mask.contains(StatxMask::CTIME_NSEC) {
            self.ctime.nsec = overlay.ctime.nsec;
        }
        if mask.contains(StatxMask::MTIME_SEC) {
            self.mtime.sec = overlay.mtime.sec;
        }
        if mask.contains(StatxMask::MTIME_NSEC) {
            self.mtime.nsec = overlay.mtime.nsec;
        }
        if mask.contains(StatxMask::INO) {
            self.ino = overlay.ino;
        }
        if mask.contains(StatxMask::SIZE) {
            self.size = overlay.size;
        }
        if mask.contains(StatxMask::BLOCKS) {
            self.blocks = overlay.blocks;
        }
        if mask.contains(StatxMask::MNT_ID) {
            self.mnt_id = overlay.mnt_id;
        }
        if mask.contains(StatxMask::BLKSIZE) {
            self.blksize = overlay.blksize;
        }
        if mask.contains(StatxMask::ATTRIBUTES) {
            self.attributes = overlay.attributes;
            self.attributes_mask = overlay.attributes_mask;
        }
        if mask.contains(StatxMask::RDEV_MAJOR) {
            self.rdev_major = overlay.rdev_major;
        }
        if mask.contains(StatxMask::RDEV_MINOR) {
            self.rdev_minor = overlay.rdev_minor;
        }
        if mask.contains(StatxMask::DEV_MAJOR) {
            self.dev_major = overlay.dev_major;
        }
        if mask.contains(StatxMask::DEV_MINOR) {
            self.dev_minor = overlay.dev_minor;
        }

        self.mask |= mask;
    }
}
