use crate::ioctl::*;
use std::mem::size_of;

//------------------------------------------

#[cfg(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
))]
mod expected {
    use super::RequestType;
    pub const FS_IOC_GETFSMAP: RequestType = 0xC0C0583B;
    pub const XFS_IOC_SCRUB_METADATA: RequestType = 0xC040583C;
    pub const XFS_IOC_FSCOUNTS: RequestType = 0x40205871;
    pub const FITRIM: RequestType = 0xC0185879;
    pub const XFS_IOC_FSGEOMETRY: RequestType = 0x4100587E;
    pub const XFS_IOC_BULKSTAT: RequestType = 0x4040587F;
    pub const XFS_IOC_INUMBERS: RequestType = 0x40405880;
    pub const BLKSSZGET: RequestType = 0x20001268;
}

#[cfg(not(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
)))]
mod expected {
    use super::RequestType;
    pub const FS_IOC_GETFSMAP: RequestType = 0xC0C0583B;
    pub const XFS_IOC_SCRUB_METADATA: RequestType = 0xC040583C;
    pub const XFS_IOC_FSCOUNTS: RequestType = 0x80205871;
    pub const FITRIM: RequestType = 0xC0185879;
    pub const XFS_IOC_FSGEOMETRY: RequestType = 0x8100587E;
    pub const XFS_IOC_BULKSTAT: RequestType = 0x8040587F;
    pub const XFS_IOC_INUMBERS: RequestType = 0x80405880;
    pub const BLKSSZGET: RequestType = 0x1268;
}

#[test]
fn argument_layouts_match_the_kernel() {
    assert_eq!(size_of::<XfsScrubMetadata>(), 64);
    assert_eq!(size_of::<XfsFsopGeom>(), 256);
    assert_eq!(size_of::<XfsFsopCounts>(), 32);
    assert_eq!(size_of::<XfsBulkIreq>(), 64);
    assert_eq!(size_of::<XfsInumbers>(), 24);
    assert_eq!(size_of::<XfsBulkstat>(), 192);
    assert_eq!(size_of::<Fsmap>(), 64);
    assert_eq!(size_of::<FsmapHead>(), 192);
    assert_eq!(size_of::<FstrimRange>(), 24);
}

#[test]
fn xfs_request_codes() {
    assert_eq!(FS_IOC_GETFSMAP, expected::FS_IOC_GETFSMAP);
    assert_eq!(XFS_IOC_SCRUB_METADATA, expected::XFS_IOC_SCRUB_METADATA);
    assert_eq!(XFS_IOC_FSCOUNTS, expected::XFS_IOC_FSCOUNTS);
    assert_eq!(FITRIM, expected::FITRIM);
    assert_eq!(XFS_IOC_FSGEOMETRY, expected::XFS_IOC_FSGEOMETRY);
    assert_eq!(XFS_IOC_BULKSTAT, expected::XFS_IOC_BULKSTAT);
    assert_eq!(XFS_IOC_INUMBERS, expected::XFS_IOC_INUMBERS);
}

#[test]
fn test_ioc_none() {
    assert_eq!(BLKSSZGET, expected::BLKSSZGET);
}

//------------------------------------------
