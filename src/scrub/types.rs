use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::fmt;

//------------------------------------------

// Input flags.
pub const SCRUB_IFLAG_REPAIR: u32 = 1 << 0;

// Output flags.
pub const SCRUB_OFLAG_CORRUPT: u32 = 1 << 1;
pub const SCRUB_OFLAG_PREEN: u32 = 1 << 2;
pub const SCRUB_OFLAG_XFAIL: u32 = 1 << 3;
pub const SCRUB_OFLAG_XCORRUPT: u32 = 1 << 4;
pub const SCRUB_OFLAG_INCOMPLETE: u32 = 1 << 5;
pub const SCRUB_OFLAG_WARNING: u32 = 1 << 6;
pub const SCRUB_OFLAG_NO_REPAIR_NEEDED: u32 = 1 << 7;

pub fn is_corrupt(oflags: u32) -> bool {
    oflags & SCRUB_OFLAG_CORRUPT != 0
}

pub fn is_unoptimized(oflags: u32) -> bool {
    oflags & SCRUB_OFLAG_PREEN != 0
}

pub fn is_incomplete(oflags: u32) -> bool {
    oflags & SCRUB_OFLAG_INCOMPLETE != 0
}

pub fn xref_failed(oflags: u32) -> bool {
    oflags & SCRUB_OFLAG_XFAIL != 0
}

pub fn xref_disagrees(oflags: u32) -> bool {
    oflags & SCRUB_OFLAG_XCORRUPT != 0
}

pub fn has_warning(oflags: u32) -> bool {
    oflags & SCRUB_OFLAG_WARNING != 0
}

/// The kernel asks us to try again if the check was incomplete, or if
/// cross-referencing failed but nothing else is wrong.
pub fn want_retry(oflags: u32) -> bool {
    if is_incomplete(oflags) {
        return true;
    }

    xref_failed(oflags) && !is_corrupt(oflags) && !xref_disagrees(oflags)
}

//------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
#[repr(u32)]
pub enum ScrubType {
    Probe = 0,
    Superblock = 1,
    Agf = 2,
    Agfl = 3,
    Agi = 4,
    Bnobt = 5,
    Cntbt = 6,
    Inobt = 7,
    Finobt = 8,
    Rmapbt = 9,
    Refcountbt = 10,
    Inode = 11,
    BmapData = 12,
    BmapAttr = 13,
    BmapCow = 14,
    Directory = 15,
    Xattr = 16,
    Symlink = 17,
    Parent = 18,
    RtBitmap = 19,
    RtSummary = 20,
    UserQuota = 21,
    GroupQuota = 22,
    ProjectQuota = 23,
    FsCounters = 24,
    QuotaCheck = 25,
    Nlinks = 26,
    Healthy = 27,
}

pub const NR_SCRUB_TYPES: usize = 28;

/// The order in which the scrubbers for a single object are run.  This
/// is the numeric order except that symlink targets are checked before
/// extended attributes, so that all content checks precede the
/// attribute and parent pointer checks.
pub const CHECK_ORDER: [ScrubType; NR_SCRUB_TYPES] = [
    ScrubType::Probe,
    ScrubType::Superblock,
    ScrubType::Agf,
    ScrubType::Agfl,
    ScrubType::Agi,
    ScrubType::Bnobt,
    ScrubType::Cntbt,
    ScrubType::Inobt,
    ScrubType::Finobt,
    ScrubType::Rmapbt,
    ScrubType::Refcountbt,
    ScrubType::Inode,
    ScrubType::BmapData,
    ScrubType::BmapAttr,
    ScrubType::BmapCow,
    ScrubType::Directory,
    ScrubType::Symlink,
    ScrubType::Xattr,
    ScrubType::Parent,
    ScrubType::RtBitmap,
    ScrubType::RtSummary,
    ScrubType::UserQuota,
    ScrubType::GroupQuota,
    ScrubType::ProjectQuota,
    ScrubType::FsCounters,
    ScrubType::QuotaCheck,
    ScrubType::Nlinks,
    ScrubType::Healthy,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrubGroup {
    None,
    AgHeader,
    PerAg,
    FsMetafile,
    Inode,
    Summary,
    InodeScan,
}

impl ScrubType {
    pub fn from_index(index: usize) -> Option<ScrubType> {
        ScrubType::from_usize(index)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn group(self) -> ScrubGroup {
        use ScrubGroup as G;
        use ScrubType::*;

        match self {
            Probe | Healthy => G::None,
            Superblock | Agf | Agfl | Agi => G::AgHeader,
            Bnobt | Cntbt | Inobt | Finobt | Rmapbt | Refcountbt => G::PerAg,
            Inode | BmapData | BmapAttr | BmapCow | Directory | Xattr | Symlink | Parent => {
                G::Inode
            }
            RtBitmap | RtSummary | UserQuota | GroupQuota | ProjectQuota => G::FsMetafile,
            FsCounters => G::Summary,
            QuotaCheck | Nlinks => G::InodeScan,
        }
    }

    pub fn descr(self) -> &'static str {
        use ScrubType::*;

        match self {
            Probe => "metadata",
            Superblock => "superblock",
            Agf => "free space header",
            Agfl => "free list",
            Agi => "inode header",
            Bnobt => "freesp by block btree",
            Cntbt => "freesp by length btree",
            Inobt => "inode btree",
            Finobt => "free inode btree",
            Rmapbt => "reverse mapping btree",
            Refcountbt => "reference count btree",
            Inode => "inode record",
            BmapData => "data block map",
            BmapAttr => "attr block map",
            BmapCow => "CoW block map",
            Directory => "directory entries",
            Xattr => "extended attributes",
            Symlink => "symbolic link",
            Parent => "parent pointer",
            RtBitmap => "realtime bitmap",
            RtSummary => "realtime summary",
            UserQuota => "user quotas",
            GroupQuota => "group quotas",
            ProjectQuota => "project quotas",
            FsCounters => "filesystem summary counters",
            QuotaCheck => "quota counters",
            Nlinks => "inode link counts",
            Healthy => "retained health records",
        }
    }

    /// Types that must be sound before this one can be checked or
    /// repaired.
    pub fn deps(self) -> &'static [ScrubType] {
        use ScrubType::*;

        match self {
            Agf | Agi => &[Superblock],
            Agfl => &[Superblock, Agf],
            Bnobt | Cntbt | Rmapbt | Refcountbt => &[Agf],
            Inobt | Finobt => &[Agi],
            BmapData | BmapAttr | BmapCow => &[Inode],
            Directory | Symlink | Parent => &[BmapData],
            Xattr => &[BmapAttr],
            QuotaCheck => &[UserQuota, GroupQuota, ProjectQuota],
            RtSummary => &[RtBitmap],
            _ => &[],
        }
    }

    pub fn in_group(group: ScrubGroup) -> impl Iterator<Item = ScrubType> {
        CHECK_ORDER.into_iter().filter(move |t| t.group() == group)
    }
}

impl fmt::Display for ScrubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descr())
    }
}

//------------------------------------------

/// The object a scrub call is aimed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScrubTarget {
    Fs,
    Ag(u32),
    Inode { ino: u64, gen: u32 },
}

impl ScrubTarget {
    pub fn agno(&self) -> Option<u32> {
        match self {
            ScrubTarget::Ag(agno) => Some(*agno),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrubRequest {
    pub scrub_type: ScrubType,
    pub target: ScrubTarget,
    pub flags: u32,
}

impl ScrubRequest {
    pub fn check(scrub_type: ScrubType, target: ScrubTarget) -> Self {
        ScrubRequest {
            scrub_type,
            target,
            flags: 0,
        }
    }

    pub fn repair(scrub_type: ScrubType, target: ScrubTarget) -> Self {
        ScrubRequest {
            scrub_type,
            target,
            flags: SCRUB_IFLAG_REPAIR,
        }
    }

    pub fn is_repair(&self) -> bool {
        self.flags & SCRUB_IFLAG_REPAIR != 0
    }
}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_order_covers_every_type() {
        let mut seen = [false; NR_SCRUB_TYPES];
        for t in CHECK_ORDER {
            assert!(!seen[t.index()]);
            seen[t.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn index_round_trips() {
        for t in CHECK_ORDER {
            assert_eq!(ScrubType::from_index(t.index()), Some(t));
        }
        assert_eq!(ScrubType::from_index(NR_SCRUB_TYPES), None);
    }

    #[test]
    fn group_membership() {
        let ag_headers: Vec<ScrubType> = ScrubType::in_group(ScrubGroup::AgHeader).collect();
        assert_eq!(
            ag_headers,
            vec![
                ScrubType::Superblock,
                ScrubType::Agf,
                ScrubType::Agfl,
                ScrubType::Agi
            ]
        );

        let inode: Vec<ScrubType> = ScrubType::in_group(ScrubGroup::Inode).collect();
        assert_eq!(inode.first(), Some(&ScrubType::Inode));
        assert_eq!(inode.last(), Some(&ScrubType::Parent));
        let symlink = inode.iter().position(|t| *t == ScrubType::Symlink);
        let xattr = inode.iter().position(|t| *t == ScrubType::Xattr);
        assert!(symlink < xattr);
    }

    #[test]
    fn retry_wanted_for_incomplete_or_bare_xfail() {
        assert!(want_retry(SCRUB_OFLAG_INCOMPLETE));
        assert!(want_retry(SCRUB_OFLAG_XFAIL));
        assert!(!want_retry(SCRUB_OFLAG_XFAIL | SCRUB_OFLAG_CORRUPT));
        assert!(!want_retry(SCRUB_OFLAG_XFAIL | SCRUB_OFLAG_XCORRUPT));
        assert!(!want_retry(SCRUB_OFLAG_PREEN));
        assert!(!want_retry(0));
    }
}

//------------------------------------------
