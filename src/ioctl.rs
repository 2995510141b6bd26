// Request code encoding from include/uapi/asm-generic/ioctl.h, plus the
// argument layouts of the XFS and VFS calls the scrubber makes.

#[cfg(test)]
mod tests;

//------------------------------------------

#[cfg(target_env = "musl")]
pub type RequestType = libc::c_int;
#[cfg(not(target_env = "musl"))]
pub type RequestType = libc::c_ulong;

#[cfg(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
))]
mod defs {
    use super::RequestType;
    pub const IOC_NONE: RequestType = 1;
    pub const IOC_READ: RequestType = 2;
    pub const IOC_WRITE: RequestType = 4;
    pub const IOC_DIRBITS: RequestType = 3;
    pub const IOC_SIZEBITS: RequestType = 13;
}

#[cfg(not(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
)))]
mod defs {
    use super::RequestType;
    pub const IOC_NONE: RequestType = 0;
    pub const IOC_WRITE: RequestType = 1;
    pub const IOC_READ: RequestType = 2;
    pub const IOC_DIRBITS: RequestType = 2;
    pub const IOC_SIZEBITS: RequestType = 14;
}

pub use defs::*;

pub const IOC_NRBITS: RequestType = 8;
pub const IOC_TYPEBITS: RequestType = 8;

pub const IOC_NRMASK: RequestType = (1 << IOC_NRBITS) - 1;
pub const IOC_TYPEMASK: RequestType = (1 << IOC_TYPEBITS) - 1;
pub const IOC_SIZEMASK: RequestType = (1 << IOC_SIZEBITS) - 1;
pub const IOC_DIRMASK: RequestType = (1 << IOC_DIRBITS) - 1;

pub const IOC_NRSHIFT: RequestType = 0;
pub const IOC_TYPESHIFT: RequestType = IOC_NRSHIFT + IOC_NRBITS;
pub const IOC_SIZESHIFT: RequestType = IOC_TYPESHIFT + IOC_TYPEBITS;
pub const IOC_DIRSHIFT: RequestType = IOC_SIZESHIFT + IOC_SIZEBITS;

#[macro_export]
macro_rules! ioc {
    ($dir: expr, $typ: expr, $nr: expr, $size: expr) => {
        (($dir as RequestType & IOC_DIRMASK) << IOC_DIRSHIFT)
            | (($typ as RequestType & IOC_TYPEMASK) << IOC_TYPESHIFT)
            | (($nr as RequestType & IOC_NRMASK) << IOC_NRSHIFT)
            | (($size as RequestType & IOC_SIZEMASK) << IOC_SIZESHIFT)
    };
}

#[macro_export]
macro_rules! request_code_none {
    ($typ: expr, $nr: expr) => {
        $crate::ioc!(IOC_NONE, $typ, $nr, 0)
    };
}

#[macro_export]
macro_rules! request_code_read {
    ($typ: expr, $nr: expr, $size_type: ty) => {
        $crate::ioc!(IOC_READ, $typ, $nr, ::std::mem::size_of::<$size_type>())
    };
}

#[macro_export]
macro_rules! request_code_readwrite {
    ($typ: expr, $nr: expr, $size_type: ty) => {
        $crate::ioc!(
            IOC_READ | IOC_WRITE,
            $typ,
            $nr,
            ::std::mem::size_of::<$size_type>()
        )
    };
}

//------------------------------------------

const XFS_IOC_MAGIC: u8 = b'X';
const BLK_IOC_MAGIC: u8 = 0x12;

/// struct xfs_scrub_metadata
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XfsScrubMetadata {
    pub sm_type: u32,
    pub sm_flags: u32,
    pub sm_ino: u64,
    pub sm_gen: u32,
    pub sm_agno: u32,
    pub sm_reserved: [u64; 5],
}

/// struct xfs_fsop_geom (v5)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XfsFsopGeom {
    pub blocksize: u32,
    pub rtextsize: u32,
    pub agblocks: u32,
    pub agcount: u32,
    pub logblocks: u32,
    pub sectsize: u32,
    pub inodesize: u32,
    pub imaxpct: u32,
    pub datablocks: u64,
    pub rtblocks: u64,
    pub rtextents: u64,
    pub logstart: u64,
    pub uuid: [u8; 16],
    pub sunit: u32,
    pub swidth: u32,
    pub version: u32,
    pub flags: u32,
    pub logsectsize: u32,
    pub rtsectsize: u32,
    pub dirblocksize: u32,
    pub logsunit: u32,
    pub sick: u32,
    pub checked: u32,
    pub reserved: [u64; 17],
}

/// struct xfs_fsop_counts
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XfsFsopCounts {
    pub freedata: u64,
    pub freertx: u64,
    pub freeino: u64,
    pub allocino: u64,
}

/// struct xfs_bulk_ireq, the header of both bulk inode requests.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XfsBulkIreq {
    pub ino: u64,
    pub flags: u32,
    pub icount: u32,
    pub ocount: u32,
    pub agno: u32,
    pub reserved: [u64; 5],
}

pub const XFS_BULK_IREQ_AGNO: u32 = 1 << 0;

/// struct xfs_inumbers
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XfsInumbers {
    pub xi_startino: u64,
    pub xi_allocmask: u64,
    pub xi_alloccount: u8,
    pub xi_version: u8,
    pub xi_padding: [u8; 6],
}

/// struct xfs_bulkstat
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XfsBulkstat {
    pub bs_ino: u64,
    pub bs_size: u64,
    pub bs_blocks: u64,
    pub bs_xflags: u64,
    pub bs_atime: i64,
    pub bs_mtime: i64,
    pub bs_ctime: i64,
    pub bs_btime: i64,
    pub bs_gen: u32,
    pub bs_uid: u32,
    pub bs_gid: u32,
    pub bs_projectid: u32,
    pub bs_atime_nsec: u32,
    pub bs_mtime_nsec: u32,
    pub bs_ctime_nsec: u32,
    pub bs_btime_nsec: u32,
    pub bs_blksize: u32,
    pub bs_rdev: u32,
    pub bs_cowextsize_blks: u32,
    pub bs_extsize_blks: u32,
    pub bs_nlink: u32,
    pub bs_extents: u32,
    pub bs_aextents: u32,
    pub bs_version: u16,
    pub bs_forkoff: u16,
    pub bs_sick: u16,
    pub bs_checked: u16,
    pub bs_mode: u16,
    pub bs_pad2: u16,
    pub bs_extents64: u64,
    pub bs_pad: [u64; 6],
}

/// struct fsmap
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Fsmap {
    pub fmr_device: u32,
    pub fmr_flags: u32,
    pub fmr_physical: u64,
    pub fmr_owner: u64,
    pub fmr_offset: u64,
    pub fmr_length: u64,
    pub fmr_reserved: [u64; 3],
}

/// struct fsmap_head, without the trailing record array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FsmapHead {
    pub fmh_iflags: u32,
    pub fmh_oflags: u32,
    pub fmh_count: u32,
    pub fmh_entries: u32,
    pub fmh_reserved: [u64; 6],
    pub fmh_keys: [Fsmap; 2],
}

/// struct fstrim_range
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FstrimRange {
    pub start: u64,
    pub len: u64,
    pub minlen: u64,
}

pub const FS_IOC_GETFSMAP: RequestType = crate::request_code_readwrite!(XFS_IOC_MAGIC, 59, FsmapHead);
pub const XFS_IOC_SCRUB_METADATA: RequestType =
    crate::request_code_readwrite!(XFS_IOC_MAGIC, 60, XfsScrubMetadata);
pub const XFS_IOC_FSCOUNTS: RequestType = crate::request_code_read!(XFS_IOC_MAGIC, 113, XfsFsopCounts);
pub const FITRIM: RequestType = crate::request_code_readwrite!(XFS_IOC_MAGIC, 121, FstrimRange);
pub const XFS_IOC_FSGEOMETRY: RequestType = crate::request_code_read!(XFS_IOC_MAGIC, 126, XfsFsopGeom);
pub const XFS_IOC_BULKSTAT: RequestType = crate::request_code_read!(XFS_IOC_MAGIC, 127, XfsBulkIreq);
pub const XFS_IOC_INUMBERS: RequestType = crate::request_code_read!(XFS_IOC_MAGIC, 128, XfsBulkIreq);

pub const BLKSSZGET: RequestType = crate::request_code_none!(BLK_IOC_MAGIC, 104);
pub const BLKGETSIZE64: RequestType = crate::request_code_read!(BLK_IOC_MAGIC, 114, usize);

//------------------------------------------
