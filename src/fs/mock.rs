use anyhow::Result;
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::fs::*;
use crate::scrub::types::*;

//------------------------------------------

/// An in-memory disk with injectable bad units.
pub struct MemDisk {
    size: u64,
    min_io: u64,
    heads: usize,
    bad_units: Mutex<RoaringBitmap>,
    nr_reads: AtomicU64,
}

impl MemDisk {
    pub fn new(size: u64, min_io: u64) -> Self {
        MemDisk {
            size,
            min_io,
            heads: 1,
            bad_units: Mutex::new(RoaringBitmap::new()),
            nr_reads: AtomicU64::new(0),
        }
    }

    pub fn with_heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    /// Every unit overlapping the byte range will fail to read.
    pub fn inject_bad(&self, start: u64, len: u64) {
        let mut bad = self.bad_units.lock().unwrap();
        let first = start / self.min_io;
        let last = (start + len - 1) / self.min_io;
        for u in first..=last {
            bad.insert(u as u32);
        }
    }

    pub fn nr_reads(&self) -> u64 {
        self.nr_reads.load(Ordering::SeqCst)
    }
}

impl Disk for MemDisk {
    fn size(&self) -> u64 {
        self.size
    }

    fn min_io(&self) -> u64 {
        self.min_io
    }

    fn heads(&self) -> usize {
        self.heads
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.nr_reads.fetch_add(1, Ordering::SeqCst);

        if buf.is_empty() {
            return Ok(());
        }

        let end = offset + buf.len() as u64;
        if end > self.size {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }

        let first = (offset / self.min_io) as u32;
        let last = ((end - 1) / self.min_io) as u32;
        let bad = self.bad_units.lock().unwrap();
        if bad.range_cardinality(first..=last) > 0 {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        buf.fill(0);
        Ok(())
    }
}

//------------------------------------------

type CallKey = (ScrubTarget, ScrubType, bool);
type KernelResult = std::result::Result<u32, KernelError>;

/// Consulted before the scripted responses.  Returning None falls
/// through to them.
pub type ScrubHandler = Arc<dyn Fn(&ScrubRequest) -> Option<KernelResult> + Send + Sync>;

#[derive(Default)]
struct Responses {
    once: HashMap<CallKey, VecDeque<KernelResult>>,
    sticky: HashMap<CallKey, KernelResult>,
    vectored_error: Option<KernelError>,
    calls: Vec<ScrubRequest>,
}

#[derive(Default)]
struct Tables {
    inodes: BTreeMap<u64, InodeStat>,
    hidden: HashSet<u64>,
    dirs: HashMap<u64, Vec<DirEntry>>,
    fsmap: Vec<FsmapRecord>,
    paths: Vec<(PathBuf, u64)>,
    trims: Vec<(u64, u64, u64)>,
    trim_errno: Option<i32>,
    counts: Option<FsCounts>,
    disks: HashMap<DeviceId, Arc<MemDisk>>,
}

/// A filesystem that lives entirely in memory.  Every scrub call
/// succeeds with clean flags unless a response has been scripted for
/// it.
pub struct MockFs {
    mount: PathBuf,
    geo: FsGeometry,
    read_only: bool,
    vectored: bool,
    responses: Mutex<Responses>,
    handler: Mutex<Option<ScrubHandler>>,
    tables: Mutex<Tables>,
}

pub const MOCK_AG_BLOCKS: u32 = 1 << 16;
pub const MOCK_BLOCK_SIZE: u32 = 4096;

impl MockFs {
    pub fn new(ag_count: u32) -> Self {
        let geo = FsGeometry {
            block_size: MOCK_BLOCK_SIZE,
            sector_size: 512,
            inode_size: 512,
            ag_blocks: MOCK_AG_BLOCKS,
            ag_count,
            data_blocks: MOCK_AG_BLOCKS as u64 * ag_count as u64,
            rt_blocks: 0,
            rt_extent_size: 1,
            log_blocks: 2048,
            external_log: false,
            agino_log: 19,
        };

        MockFs {
            mount: PathBuf::from("/mnt/mock"),
            geo,
            read_only: false,
            vectored: false,
            responses: Mutex::new(Responses::default()),
            handler: Mutex::new(None),
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn with_realtime(mut self, rt_blocks: u64) -> Self {
        self.geo.rt_blocks = rt_blocks;
        self
    }

    pub fn with_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_vectored(mut self) -> Self {
        self.vectored = true;
        self
    }

    pub fn with_disk(self, dev: DeviceId, disk: Arc<MemDisk>) -> Self {
        self.tables.lock().unwrap().disks.insert(dev, disk);
        self
    }

    //--------------------------------

    pub fn ino(&self, agno: u32, agino: u32) -> u64 {
        self.geo.agino_to_ino(agno, agino)
    }

    pub fn add_inode(&self, stat: InodeStat) {
        self.tables.lock().unwrap().inodes.insert(stat.ino, stat);
    }

    /// Add an inode of the given type (a libc S_IF* value) with
    /// generation 1.
    pub fn add_file(&self, agno: u32, agino: u32, file_type: u32) -> InodeStat {
        let stat = InodeStat {
            ino: self.ino(agno, agino),
            gen: 1,
            mode: file_type | 0o644,
            nlink: 1,
            size: 0,
        };
        self.add_inode(stat);
        stat
    }

    /// Allocated in the inode btree, but bulk fetch won't return it.
    pub fn hide_from_bulkstat(&self, ino: u64) {
        self.tables.lock().unwrap().hidden.insert(ino);
    }

    pub fn add_dir_entry(&self, dir: u64, name: &str, ino: u64) {
        let mut t = self.tables.lock().unwrap();
        t.dirs.entry(dir).or_default().push(DirEntry {
            name: OsString::from(name),
            ino,
        });
    }

    pub fn add_raw_dir_entry(&self, dir: u64, name: OsString, ino: u64) {
        let mut t = self.tables.lock().unwrap();
        t.dirs.entry(dir).or_default().push(DirEntry { name, ino });
    }

    pub fn add_fsmap(&self, rec: FsmapRecord) {
        let mut t = self.tables.lock().unwrap();
        t.fsmap.push(rec);
        t.fsmap.sort_by_key(|r| (r.device, r.physical));
    }

    pub fn add_path(&self, path: &str, ino: u64) {
        self.tables
            .lock()
            .unwrap()
            .paths
            .push((PathBuf::from(path), ino));
    }

    pub fn set_counts(&self, counts: FsCounts) {
        self.tables.lock().unwrap().counts = Some(counts);
    }

    pub fn fail_trim(&self, errno: i32) {
        self.tables.lock().unwrap().trim_errno = Some(errno);
    }

    pub fn trims(&self) -> Vec<(u64, u64, u64)> {
        self.tables.lock().unwrap().trims.clone()
    }

    //--------------------------------

    /// Every matching call returns res until told otherwise.
    pub fn respond(&self, target: ScrubTarget, t: ScrubType, repair: bool, res: KernelResult) {
        let mut r = self.responses.lock().unwrap();
        r.sticky.insert((target, t, repair), res);
    }

    /// The next matching call returns res.  One-shot responses queue up
    /// and take precedence over sticky ones.
    pub fn respond_once(&self, target: ScrubTarget, t: ScrubType, repair: bool, res: KernelResult) {
        let mut r = self.responses.lock().unwrap();
        r.once
            .entry((target, t, repair))
            .or_default()
            .push_back(res);
    }

    /// Make every vectored call fail as a whole.
    pub fn fail_vectored(&self, e: KernelError) {
        self.responses.lock().unwrap().vectored_error = Some(e);
    }

    pub fn set_handler(&self, handler: ScrubHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    pub fn calls(&self) -> Vec<ScrubRequest> {
        self.responses.lock().unwrap().calls.clone()
    }

    pub fn nr_calls(&self, target: ScrubTarget, t: ScrubType, repair: bool) -> usize {
        self.responses
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.target == target && c.scrub_type == t && c.is_repair() == repair)
            .count()
    }

    pub fn clear_calls(&self) {
        self.responses.lock().unwrap().calls.clear();
    }

    fn respond_to(&self, req: &ScrubRequest) -> KernelResult {
        {
            let mut r = self.responses.lock().unwrap();
            r.calls.push(*req);
        }

        // Called without the lock held so handlers may block.
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            if let Some(res) = handler(req) {
                return res;
            }
        }

        let key = (req.target, req.scrub_type, req.is_repair());
        let mut r = self.responses.lock().unwrap();
        if let Some(q) = r.once.get_mut(&key) {
            if let Some(res) = q.pop_front() {
                return res;
            }
        }
        if let Some(res) = r.sticky.get(&key) {
            return *res;
        }
        Ok(0)
    }
}

//------------------------------------------

struct MockFile {
    entries: Option<Vec<DirEntry>>,
}

impl OpenFile for MockFile {
    fn read_dir(&mut self) -> io::Result<Vec<DirEntry>> {
        match &self.entries {
            Some(entries) => Ok(entries.clone()),
            None => Err(io::Error::from_raw_os_error(libc::ENOTDIR)),
        }
    }
}

impl Filesystem for MockFs {
    fn mount_point(&self) -> &Path {
        &self.mount
    }

    fn geometry(&self) -> io::Result<FsGeometry> {
        Ok(self.geo.clone())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn scrub_metadata(&self, req: &ScrubRequest) -> std::result::Result<u32, KernelError> {
        self.respond_to(req)
    }

    fn scrub_vectored(
        &self,
        target: &ScrubTarget,
        entries: &mut [VectoredEntry],
    ) -> std::result::Result<(), KernelError> {
        if !self.vectored {
            return Err(KernelError::NotSupported);
        }
        if let Some(e) = self.responses.lock().unwrap().vectored_error {
            return Err(e);
        }

        for e in entries.iter_mut() {
            let req = ScrubRequest {
                scrub_type: e.scrub_type,
                target: *target,
                flags: e.flags,
            };
            e.result = Some(self.respond_to(&req));
        }
        Ok(())
    }

    fn inumbers(&self, agno: u32, start_ino: u64, max: usize) -> io::Result<Vec<InodeGroup>> {
        let t = self.tables.lock().unwrap();
        let mut groups: BTreeMap<u64, u64> = BTreeMap::new();
        for ino in t.inodes.keys() {
            if self.geo.ino_to_agno(*ino) != agno {
                continue;
            }
            let chunk = ino & !(INODES_PER_CHUNK - 1);
            if chunk + INODES_PER_CHUNK <= start_ino {
                continue;
            }
            *groups.entry(chunk).or_default() |= 1u64 << (ino - chunk);
        }

        Ok(groups
            .into_iter()
            .take(max)
            .map(|(start_ino, alloc_mask)| InodeGroup {
                start_ino,
                alloc_mask,
            })
            .collect())
    }

    fn bulkstat(&self, start_ino: u64, count: usize) -> io::Result<Vec<InodeStat>> {
        let t = self.tables.lock().unwrap();
        Ok(t.inodes
            .range(start_ino..start_ino + count as u64)
            .filter(|(ino, _)| !t.hidden.contains(ino))
            .map(|(_, stat)| *stat)
            .collect())
    }

    fn open_by_handle(&self, handle: &FileHandle) -> io::Result<Box<dyn OpenFile>> {
        let t = self.tables.lock().unwrap();
        match t.inodes.get(&handle.ino) {
            Some(stat) if stat.gen == handle.gen => {
                let entries = if stat.is_dir() {
                    Some(t.dirs.get(&handle.ino).cloned().unwrap_or_default())
                } else {
                    None
                };
                Ok(Box::new(MockFile { entries }))
            }
            _ => Err(io::Error::from_raw_os_error(libc::ESTALE)),
        }
    }

    fn getfsmap(&self, dev: DeviceId, range: Range<u64>, visit: &mut FsmapVisitor) -> Result<()> {
        let records: Vec<FsmapRecord> = {
            let t = self.tables.lock().unwrap();
            t.fsmap
                .iter()
                .filter(|r| r.device == dev && r.physical < range.end && r.end() > range.start)
                .copied()
                .collect()
        };

        for r in &records {
            visit(r)?;
        }
        Ok(())
    }

    fn disk(&self, dev: DeviceId) -> Option<Arc<dyn Disk>> {
        let t = self.tables.lock().unwrap();
        t.disks.get(&dev).map(|d| d.clone() as Arc<dyn Disk>)
    }

    fn trim(&self, start: u64, len: u64, minlen: u64) -> io::Result<()> {
        let mut t = self.tables.lock().unwrap();
        if let Some(errno) = t.trim_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        t.trims.push((start, len, minlen));
        Ok(())
    }

    fn walk_tree(&self, visit: &mut PathVisitor) -> Result<()> {
        let paths = self.tables.lock().unwrap().paths.clone();
        for (path, ino) in &paths {
            visit(path, *ino)?;
        }
        Ok(())
    }

    fn counts(&self) -> io::Result<FsCounts> {
        let t = self.tables.lock().unwrap();
        Ok(t.counts.unwrap_or(FsCounts {
            used_inodes: t.inodes.len() as u64,
            free_inodes: 0,
            free_blocks: 0,
            free_rt_extents: 0,
        }))
    }
}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_units_fail_reads() {
        let disk = MemDisk::new(1 << 20, 4096);
        disk.inject_bad(8192 + 10, 1);
        let mut buf = vec![0; 4096];
        assert!(disk.read_at(&mut buf, 4096).is_ok());
        let e = disk.read_at(&mut buf, 8192).unwrap_err();
        assert_eq!(e.raw_os_error(), Some(libc::EIO));
        let mut big = vec![0; 16384];
        assert!(disk.read_at(&mut big, 0).is_err());
        assert_eq!(disk.nr_reads(), 3);
    }

    #[test]
    fn inode_groups_are_built_from_the_table() {
        let fs = MockFs::new(2);
        fs.add_file(1, 64, libc::S_IFREG);
        fs.add_file(1, 66, libc::S_IFDIR);
        fs.add_file(1, 200, libc::S_IFREG);
        fs.add_file(0, 5, libc::S_IFREG);

        let groups = fs.inumbers(1, fs.ino(1, 0), 64).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].start_ino, fs.ino(1, 64));
        assert_eq!(groups[0].alloc_mask, 0b101);
        assert_eq!(groups[1].start_ino, fs.ino(1, 192));

        let later = fs.inumbers(1, fs.ino(1, 128), 64).unwrap();
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn scripted_responses() {
        let fs = MockFs::new(1);
        let target = ScrubTarget::Ag(0);
        fs.respond(target, ScrubType::Agf, false, Ok(SCRUB_OFLAG_PREEN));
        fs.respond_once(target, ScrubType::Agf, false, Err(KernelError::Busy));

        let req = ScrubRequest::check(ScrubType::Agf, target);
        assert_eq!(fs.scrub_metadata(&req), Err(KernelError::Busy));
        assert_eq!(fs.scrub_metadata(&req), Ok(SCRUB_OFLAG_PREEN));
        assert_eq!(fs.scrub_metadata(&req), Ok(SCRUB_OFLAG_PREEN));
        assert_eq!(
            fs.scrub_metadata(&ScrubRequest::repair(ScrubType::Agf, target)),
            Ok(0)
        );
        assert_eq!(fs.nr_calls(target, ScrubType::Agf, false), 3);
    }

    #[test]
    fn stale_handles_are_refused() {
        let fs = MockFs::new(1);
        let stat = fs.add_file(0, 128, libc::S_IFDIR);
        assert!(fs.open_by_handle(&stat.handle()).is_ok());
        let stale = FileHandle {
            ino: stat.ino,
            gen: stat.gen + 1,
        };
        assert!(fs.open_by_handle(&stale).is_err());
    }
}

//------------------------------------------
