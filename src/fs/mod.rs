use anyhow::Result;
use std::ffi::OsString;
use std::io;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::scrub::types::{ScrubRequest, ScrubTarget, ScrubType};

pub mod linux;
pub mod mock;

//------------------------------------------

/// Failure modes of a single kernel scrub or repair call.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("metadata not present")]
    NotFound,

    #[error("filesystem busy")]
    Busy,

    #[error("filesystem is shut down")]
    Shutdown,

    #[error("operation not supported")]
    NotSupported,

    #[error("invalid argument")]
    Invalid,

    #[error("read-only filesystem")]
    ReadOnly,

    #[error("no space left on device")]
    NoSpace,

    #[error("out of memory")]
    NoMemory,

    #[error("input/output error")]
    Io,

    #[error("unexpected error {0}")]
    Other(i32),
}

impl KernelError {
    pub fn from_errno(errno: i32) -> KernelError {
        use KernelError::*;

        match errno {
            libc::ENOENT => NotFound,
            libc::EBUSY | libc::EDEADLK => Busy,
            libc::ESHUTDOWN => Shutdown,
            libc::EOPNOTSUPP | libc::ENOTTY => NotSupported,
            libc::EINVAL => Invalid,
            libc::EROFS => ReadOnly,
            libc::ENOSPC => NoSpace,
            libc::ENOMEM => NoMemory,
            libc::EIO => Io,
            e => Other(e),
        }
    }

    pub fn from_io(e: &io::Error) -> KernelError {
        match e.raw_os_error() {
            Some(errno) => KernelError::from_errno(errno),
            None => KernelError::Io,
        }
    }
}

//------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceId {
    Data,
    Log,
    Realtime,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsGeometry {
    pub block_size: u32,
    pub sector_size: u32,
    pub inode_size: u32,
    pub ag_blocks: u32,
    pub ag_count: u32,
    pub data_blocks: u64,
    pub rt_blocks: u64,
    pub rt_extent_size: u32,
    pub log_blocks: u32,
    pub external_log: bool,

    /// Number of low bits of an inode number holding the AG-relative
    /// inode number.
    pub agino_log: u32,
}

impl FsGeometry {
    pub fn has_realtime(&self) -> bool {
        self.rt_blocks > 0
    }

    pub fn ag_bytes(&self) -> u64 {
        self.ag_blocks as u64 * self.block_size as u64
    }

    /// Byte range of an AG on the data device.  The last AG may be short.
    pub fn ag_range(&self, agno: u32) -> Range<u64> {
        let start = agno as u64 * self.ag_bytes();
        let end = std::cmp::min(start + self.ag_bytes(), self.data_blocks * self.block_size as u64);
        start..end
    }

    pub fn ino_to_agno(&self, ino: u64) -> u32 {
        (ino >> self.agino_log) as u32
    }

    pub fn ino_to_agino(&self, ino: u64) -> u32 {
        (ino & ((1u64 << self.agino_log) - 1)) as u32
    }

    pub fn agino_to_ino(&self, agno: u32, agino: u32) -> u64 {
        ((agno as u64) << self.agino_log) | agino as u64
    }
}

//------------------------------------------

pub const INODES_PER_CHUNK: u64 = 64;

/// A 64-inode allocation group record from the inode btree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InodeGroup {
    pub start_ino: u64,
    pub alloc_mask: u64,
}

impl InodeGroup {
    pub fn is_allocated(&self, i: u64) -> bool {
        self.alloc_mask & (1u64 << i) != 0
    }

    pub fn alloc_count(&self) -> u32 {
        self.alloc_mask.count_ones()
    }
}

/// The attributes of a single inode we care about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InodeStat {
    pub ino: u64,
    pub gen: u32,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
}

impl InodeStat {
    /// Stand-in for an inode the bulk fetch couldn't return.  A zero
    /// mode makes every file-type specific check run.
    pub fn placeholder(ino: u64) -> Self {
        InodeStat {
            ino,
            ..Default::default()
        }
    }

    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT
    }

    pub fn is_placeholder(&self) -> bool {
        self.mode == 0
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR
    }

    pub fn is_reg(&self) -> bool {
        self.file_type() == libc::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK
    }

    pub fn handle(&self) -> FileHandle {
        FileHandle {
            ino: self.ino,
            gen: self.gen,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileHandle {
    pub ino: u64,
    pub gen: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub ino: u64,
}

/// A file opened by handle.  Holding one pins the inode in memory.
pub trait OpenFile: Send {
    fn read_dir(&mut self) -> io::Result<Vec<DirEntry>>;
}

//------------------------------------------

// fsmap record flags
pub const FMR_OF_PREALLOC: u32 = 0x1;
pub const FMR_OF_ATTR_FORK: u32 = 0x2;
pub const FMR_OF_EXTENT_MAP: u32 = 0x4;
pub const FMR_OF_SHARED: u32 = 0x8;
pub const FMR_OF_SPECIAL_OWNER: u32 = 0x10;
pub const FMR_OF_LAST: u32 = 0x20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecialOwner {
    Free,
    Unknown,
    Fs,
    Log,
    Ag,
    InodeBtree,
    Inodes,
    Refcount,
    Cow,
    Defective,
}

impl SpecialOwner {
    pub fn descr(&self) -> &'static str {
        use SpecialOwner::*;

        match self {
            Free => "free space",
            Unknown => "unknown",
            Fs => "static fs metadata",
            Log => "journalling log",
            Ag => "per-AG metadata",
            InodeBtree => "inode btree blocks",
            Inodes => "inodes",
            Refcount => "reference count information",
            Cow => "copy on write staging",
            Defective => "bad blocks",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsmapOwner {
    Inode(u64),
    Special(SpecialOwner),
}

/// One physical extent from the filesystem's space map.  Offsets and
/// lengths are in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsmapRecord {
    pub device: DeviceId,
    pub physical: u64,
    pub length: u64,
    pub owner: FsmapOwner,
    pub offset: u64,
    pub flags: u32,
}

impl FsmapRecord {
    pub fn end(&self) -> u64 {
        self.physical + self.length
    }

    pub fn is_special(&self) -> bool {
        matches!(self.owner, FsmapOwner::Special(_))
    }
}

//------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsCounts {
    pub used_inodes: u64,
    pub free_inodes: u64,
    pub free_blocks: u64,
    pub free_rt_extents: u64,
}

/// A device backing the filesystem, opened for verification reads.
pub trait Disk: Send + Sync {
    fn size(&self) -> u64;

    /// Smallest unit we can read, and so the granularity at which media
    /// errors are reported.
    fn min_io(&self) -> u64;

    /// Number of reads worth issuing in parallel.
    fn heads(&self) -> usize {
        1
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
}

pub type FsmapVisitor<'a> = dyn FnMut(&FsmapRecord) -> Result<()> + 'a;
pub type PathVisitor<'a> = dyn FnMut(&Path, u64) -> Result<()> + 'a;

/// Everything the scrubber needs from a mounted filesystem.
pub trait Filesystem: Send + Sync {
    fn mount_point(&self) -> &Path;

    fn geometry(&self) -> io::Result<FsGeometry>;

    fn is_read_only(&self) -> bool;

    /// Issue one check or repair call.  Returns the kernel's output
    /// flags.
    fn scrub_metadata(&self, req: &ScrubRequest) -> std::result::Result<u32, KernelError>;

    /// Issue several calls against one object in a single round trip.
    /// Each entry's result is filled in as it completes.
    fn scrub_vectored(
        &self,
        _target: &ScrubTarget,
        _entries: &mut [VectoredEntry],
    ) -> std::result::Result<(), KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Inode btree records for one AG, starting at start_ino.
    fn inumbers(&self, agno: u32, start_ino: u64, max: usize) -> io::Result<Vec<InodeGroup>>;

    /// Inode attributes for up to count inodes starting at start_ino.
    fn bulkstat(&self, start_ino: u64, count: usize) -> io::Result<Vec<InodeStat>>;

    fn open_by_handle(&self, handle: &FileHandle) -> io::Result<Box<dyn OpenFile>>;

    /// Visit the space map of a device over a byte range, in physical
    /// order.
    fn getfsmap(&self, dev: DeviceId, range: Range<u64>, visit: &mut FsmapVisitor) -> Result<()>;

    fn disk(&self, dev: DeviceId) -> Option<Arc<dyn Disk>>;

    fn trim(&self, start: u64, len: u64, minlen: u64) -> io::Result<()>;

    /// Visit every path in the directory tree with its inode number.
    fn walk_tree(&self, visit: &mut PathVisitor) -> Result<()>;

    fn counts(&self) -> io::Result<FsCounts>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectoredEntry {
    pub scrub_type: ScrubType,
    pub flags: u32,
    pub result: Option<std::result::Result<u32, KernelError>>,
}

impl VectoredEntry {
    pub fn new(scrub_type: ScrubType, flags: u32) -> Self {
        VectoredEntry {
            scrub_type,
            flags,
            result: None,
        }
    }
}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(KernelError::from_errno(libc::ENOENT), KernelError::NotFound);
        assert_eq!(KernelError::from_errno(libc::EDEADLK), KernelError::Busy);
        assert_eq!(KernelError::from_errno(libc::ENOTTY), KernelError::NotSupported);
        assert_eq!(KernelError::from_errno(libc::EXDEV), KernelError::Other(libc::EXDEV));
    }

    #[test]
    fn inode_number_split() {
        let geo = FsGeometry {
            agino_log: 20,
            ..Default::default()
        };
        let ino = geo.agino_to_ino(3, 1234);
        assert_eq!(geo.ino_to_agno(ino), 3);
        assert_eq!(geo.ino_to_agino(ino), 1234);
    }

    #[test]
    fn last_ag_is_clamped() {
        let geo = FsGeometry {
            block_size: 4096,
            ag_blocks: 100,
            ag_count: 3,
            data_blocks: 250,
            ..Default::default()
        };
        assert_eq!(geo.ag_range(1), 409600..819200);
        assert_eq!(geo.ag_range(2), 819200..1024000);
    }
}

//------------------------------------------
