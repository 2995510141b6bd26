use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Range;
use std::os::unix::fs::{DirEntryExt, FileExt, MetadataExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::file_utils::{self, MountEntry};
use crate::fs::*;
use crate::ioctl::*;
use crate::scrub::types::{ScrubRequest, ScrubTarget};

//------------------------------------------

// Output bits of xfs_scrub_metadata.sm_flags.
const SCRUB_FLAGS_OUT: u32 = 0xfe;

const FSMAP_BATCH: usize = 128;
const BULK_BATCH: usize = 64;

// XFS's export handle: a 64 bit inode number and generation, no parent.
const XFS_FILEID_INO64_GEN: i32 = 0x81;
const XFS_FID64_LEN: usize = 12;

fn ioctl_result(rc: libc::c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

//------------------------------------------

fn major_minor(dev: u64) -> (u64, u64) {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
    let minor = (dev & 0xff) | ((dev >> 12) & !0xff);
    (major, minor)
}

// Userspace dev_t to the kernel's 32 bit encoding, which is what fsmap
// reports devices as.
fn encode_dev(dev: u64) -> u32 {
    let (major, minor) = major_minor(dev);
    ((minor & 0xff) | (major << 8) | ((minor & !0xff) << 12)) as u32
}

fn special_owner(owner: u64) -> SpecialOwner {
    use SpecialOwner::*;

    let kind = owner >> 32;
    let code = owner & 0xffff_ffff;
    match (kind, code) {
        (0, 1) => Free,
        (0, 2) => Unknown,
        (0x58, 1) => Fs,
        (0x58, 2) => Log,
        (0x58, 3) => Ag,
        (0x58, 4) => InodeBtree,
        (0x58, 5) => Inodes,
        (0x58, 6) => Refcount,
        (0x58, 7) => Cow,
        (0x58, 8) => Defective,
        _ => Unknown,
    }
}

fn convert_geometry(g: &XfsFsopGeom) -> FsGeometry {
    let agblklog = if g.agblocks <= 1 {
        0
    } else {
        32 - (g.agblocks - 1).leading_zeros()
    };
    let inopblog = (g.blocksize / g.inodesize.max(1)).trailing_zeros();

    FsGeometry {
        block_size: g.blocksize,
        sector_size: g.sectsize,
        inode_size: g.inodesize,
        ag_blocks: g.agblocks,
        ag_count: g.agcount,
        data_blocks: g.datablocks,
        rt_blocks: g.rtblocks,
        rt_extent_size: g.rtextsize,
        log_blocks: g.logblocks,
        external_log: g.logstart == 0,
        agino_log: agblklog + inopblog,
    }
}

fn convert_inode(bs: &XfsBulkstat) -> InodeStat {
    InodeStat {
        ino: bs.bs_ino,
        gen: bs.bs_gen,
        mode: bs.bs_mode as u32,
        nlink: bs.bs_nlink,
        size: bs.bs_size,
    }
}

//------------------------------------------

/// A filesystem device opened for direct reads.
pub struct FileDisk {
    file: File,
    size: u64,
    min_io: u64,
    heads: usize,
}

impl FileDisk {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)?;
        let size = file_utils::device_size(&file)?;
        let min_io = file_utils::sector_size(&file)?.max(512);
        let heads = Self::heads(&file);

        Ok(FileDisk {
            file,
            size,
            min_io,
            heads,
        })
    }

    // Solid state devices cope with as many parallel reads as we have
    // cpus; spinning disks get one.
    fn heads(file: &File) -> usize {
        let rdev = match file.metadata() {
            Ok(md) => md.rdev(),
            Err(_) => return 1,
        };
        let (major, minor) = major_minor(rdev);

        // partitions keep their queue settings on the parent
        for q in ["queue/rotational", "../queue/rotational"] {
            let path = format!("/sys/dev/block/{}:{}/{}", major, minor, q);
            if let Ok(s) = std::fs::read_to_string(path) {
                return if s.trim() == "0" { num_cpus::get() } else { 1 };
            }
        }
        1
    }
}

impl Disk for FileDisk {
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
        self.file.read_exact_at(buf, offset)
    }
}

//------------------------------------------

struct LinuxFile {
    file: File,
}

impl OpenFile for LinuxFile {
    fn read_dir(&mut self) -> io::Result<Vec<DirEntry>> {
        let path = format!("/proc/self/fd/{}", self.file.as_raw_fd());
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name(),
                ino: entry.ino(),
            });
        }
        Ok(entries)
    }
}

#[repr(C)]
struct XfsFileHandle {
    handle_bytes: u32,
    handle_type: i32,
    f_handle: [u8; XFS_FID64_LEN],
}

#[repr(C)]
struct FsmapRequest {
    head: FsmapHead,
    recs: [Fsmap; FSMAP_BATCH],
}

#[repr(C)]
struct InumbersRequest {
    hdr: XfsBulkIreq,
    recs: [XfsInumbers; BULK_BATCH],
}

#[repr(C)]
struct BulkstatRequest {
    hdr: XfsBulkIreq,
    recs: [XfsBulkstat; BULK_BATCH],
}

//------------------------------------------

/// A mounted XFS filesystem, driven through its ioctl interface.
pub struct LinuxFs {
    mount: MountEntry,
    root: File,
    devices: Vec<(DeviceId, u32, PathBuf)>,
    disks: Mutex<HashMap<DeviceId, Option<Arc<FileDisk>>>>,
}

impl LinuxFs {
    pub fn open(path: &Path) -> Result<Self> {
        let mount = file_utils::find_mount(path)?;
        if mount.fs_type != "xfs" {
            return Err(anyhow!(
                "{}: not an XFS filesystem ({})",
                mount.mount_point.display(),
                mount.fs_type
            ));
        }

        let root = File::open(&mount.mount_point)
            .with_context(|| format!("{}", mount.mount_point.display()))?;

        // st_dev of the root directory is the data device, whatever the
        // mount table calls it.
        let data_dev = root.metadata()?.dev();
        let mut devices = vec![(DeviceId::Data, encode_dev(data_dev), mount.device.clone())];
        for (id, key) in [(DeviceId::Log, "logdev"), (DeviceId::Realtime, "rtdev")] {
            if let Some(dev_path) = mount.option(key) {
                let rdev = std::fs::metadata(dev_path)
                    .with_context(|| format!("{} device {}", key, dev_path))?
                    .rdev();
                devices.push((id, encode_dev(rdev), PathBuf::from(dev_path)));
            }
        }

        Ok(LinuxFs {
            mount,
            root,
            devices,
            disks: Mutex::new(HashMap::new()),
        })
    }

    fn fd(&self) -> libc::c_int {
        self.root.as_raw_fd()
    }

    fn device_number(&self, dev: DeviceId) -> Option<u32> {
        self.devices
            .iter()
            .find(|(id, _, _)| *id == dev)
            .map(|(_, devno, _)| *devno)
    }

    fn device_id(&self, devno: u32) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, n, _)| *n == devno)
            .map(|(id, _, _)| *id)
    }

    fn convert_fsmap(&self, rec: &Fsmap, dev: DeviceId) -> FsmapRecord {
        let owner = if rec.fmr_flags & FMR_OF_SPECIAL_OWNER != 0 {
            FsmapOwner::Special(special_owner(rec.fmr_owner))
        } else {
            FsmapOwner::Inode(rec.fmr_owner)
        };

        FsmapRecord {
            device: self.device_id(rec.fmr_device).unwrap_or(dev),
            physical: rec.fmr_physical,
            length: rec.fmr_length,
            owner,
            offset: rec.fmr_offset,
            flags: rec.fmr_flags,
        }
    }
}

impl Filesystem for LinuxFs {
    fn mount_point(&self) -> &Path {
        &self.mount.mount_point
    }

    fn geometry(&self) -> io::Result<FsGeometry> {
        let mut g = XfsFsopGeom::default();
        let rc = unsafe { libc::ioctl(self.fd(), XFS_IOC_FSGEOMETRY as RequestType, &mut g) };
        ioctl_result(rc)?;
        Ok(convert_geometry(&g))
    }

    fn is_read_only(&self) -> bool {
        self.mount.is_read_only()
    }

    fn scrub_metadata(&self, req: &ScrubRequest) -> std::result::Result<u32, KernelError> {
        let mut sm = XfsScrubMetadata {
            sm_type: req.scrub_type as u32,
            sm_flags: req.flags,
            ..Default::default()
        };
        match req.target {
            ScrubTarget::Fs => {}
            ScrubTarget::Ag(agno) => sm.sm_agno = agno,
            ScrubTarget::Inode { ino, gen } => {
                sm.sm_ino = ino;
                sm.sm_gen = gen;
            }
        }

        let rc = unsafe { libc::ioctl(self.fd(), XFS_IOC_SCRUB_METADATA as RequestType, &mut sm) };
        ioctl_result(rc).map_err(|e| KernelError::from_io(&e))?;
        Ok(sm.sm_flags & SCRUB_FLAGS_OUT)
    }

    fn inumbers(&self, agno: u32, start_ino: u64, max: usize) -> io::Result<Vec<InodeGroup>> {
        let mut req = Box::new(InumbersRequest {
            hdr: XfsBulkIreq {
                ino: start_ino,
                flags: XFS_BULK_IREQ_AGNO,
                icount: max.min(BULK_BATCH) as u32,
                agno,
                ..Default::default()
            },
            recs: [XfsInumbers::default(); BULK_BATCH],
        });

        let rc = unsafe { libc::ioctl(self.fd(), XFS_IOC_INUMBERS as RequestType, &mut *req) };
        if let Err(e) = ioctl_result(rc) {
            // start_ino is past the end of the AG
            if e.raw_os_error() == Some(libc::ECANCELED) {
                return Ok(Vec::new());
            }
            return Err(e);
        }

        let n = (req.hdr.ocount as usize).min(BULK_BATCH);
        Ok(req.recs[..n]
            .iter()
            .map(|r| InodeGroup {
                start_ino: r.xi_startino,
                alloc_mask: r.xi_allocmask,
            })
            .collect())
    }

    fn bulkstat(&self, start_ino: u64, count: usize) -> io::Result<Vec<InodeStat>> {
        let mut req = Box::new(BulkstatRequest {
            hdr: XfsBulkIreq {
                ino: start_ino,
                icount: count.min(BULK_BATCH) as u32,
                ..Default::default()
            },
            recs: [XfsBulkstat::default(); BULK_BATCH],
        });

        let rc = unsafe { libc::ioctl(self.fd(), XFS_IOC_BULKSTAT as RequestType, &mut *req) };
        ioctl_result(rc)?;

        let end = start_ino + count as u64;
        let n = (req.hdr.ocount as usize).min(BULK_BATCH);
        Ok(req.recs[..n]
            .iter()
            .filter(|bs| bs.bs_ino >= start_ino && bs.bs_ino < end)
            .map(convert_inode)
            .collect())
    }

    fn open_by_handle(&self, handle: &FileHandle) -> io::Result<Box<dyn OpenFile>> {
        let mut fh = XfsFileHandle {
            handle_bytes: XFS_FID64_LEN as u32,
            handle_type: XFS_FILEID_INO64_GEN,
            f_handle: [0; XFS_FID64_LEN],
        };
        fh.f_handle[..8].copy_from_slice(&handle.ino.to_ne_bytes());
        fh.f_handle[8..].copy_from_slice(&handle.gen.to_ne_bytes());

        let fd = unsafe {
            libc::syscall(
                libc::SYS_open_by_handle_at,
                self.fd(),
                &mut fh as *mut XfsFileHandle,
                libc::O_RDONLY | libc::O_NOCTTY | libc::O_NOATIME,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let file = unsafe { File::from_raw_fd(fd as libc::c_int) };
        Ok(Box::new(LinuxFile { file }))
    }

    fn getfsmap(&self, dev: DeviceId, range: Range<u64>, visit: &mut FsmapVisitor) -> Result<()> {
        if range.start >= range.end {
            return Ok(());
        }
        let devno = self
            .device_number(dev)
            .ok_or_else(|| anyhow!("no {:?} device", dev))?;

        let mut req = Box::new(FsmapRequest {
            head: FsmapHead::default(),
            recs: [Fsmap::default(); FSMAP_BATCH],
        });
        req.head.fmh_keys[0].fmr_device = devno;
        req.head.fmh_keys[0].fmr_physical = range.start;
        req.head.fmh_keys[1] = Fsmap {
            fmr_device: devno,
            fmr_flags: u32::MAX,
            fmr_physical: range.end - 1,
            fmr_owner: u64::MAX,
            fmr_offset: u64::MAX,
            ..Default::default()
        };

        loop {
            req.head.fmh_count = FSMAP_BATCH as u32;
            let rc = unsafe { libc::ioctl(self.fd(), FS_IOC_GETFSMAP as RequestType, &mut *req) };
            ioctl_result(rc).with_context(|| format!("getfsmap of {:?} device", dev))?;

            let n = (req.head.fmh_entries as usize).min(FSMAP_BATCH);
            if n == 0 {
                break;
            }

            let mut last = false;
            for rec in &req.recs[..n] {
                visit(&self.convert_fsmap(rec, dev))?;
                last = rec.fmr_flags & FMR_OF_LAST != 0;
            }
            if last {
                break;
            }

            // resume after the last record returned
            req.head.fmh_keys[0] = req.recs[n - 1];
        }

        Ok(())
    }

    fn disk(&self, dev: DeviceId) -> Option<Arc<dyn Disk>> {
        let mut disks = self.disks.lock().unwrap();
        let disk = disks.entry(dev).or_insert_with(|| {
            self.devices
                .iter()
                .find(|(id, _, _)| *id == dev)
                .and_then(|(_, _, path)| FileDisk::open(path).ok())
                .map(Arc::new)
        });
        disk.clone().map(|d| d as Arc<dyn Disk>)
    }

    fn trim(&self, start: u64, len: u64, minlen: u64) -> io::Result<()> {
        let mut range = FstrimRange { start, len, minlen };
        let rc = unsafe { libc::ioctl(self.fd(), FITRIM as RequestType, &mut range) };
        ioctl_result(rc)
    }

    fn walk_tree(&self, visit: &mut PathVisitor) -> Result<()> {
        let root_md = self.root.metadata()?;
        let fs_dev = root_md.dev();
        visit(&self.mount.mount_point, root_md.ino())?;

        let mut stack = vec![self.mount.mount_point.clone()];
        while let Some(dir) = stack.pop() {
            let iter = match std::fs::read_dir(&dir) {
                Ok(iter) => iter,
                // raced with an unlink
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("{}", dir.display())),
            };

            for entry in iter {
                let entry = entry.with_context(|| format!("{}", dir.display()))?;
                let path = entry.path();
                visit(&path, entry.ino())?;

                let md = match std::fs::symlink_metadata(&path) {
                    Ok(md) => md,
                    Err(_) => continue,
                };
                if md.is_dir() && md.dev() == fs_dev {
                    stack.push(path);
                }
            }
        }

        Ok(())
    }

    fn counts(&self) -> io::Result<FsCounts> {
        let mut c = XfsFsopCounts::default();
        let rc = unsafe { libc::ioctl(self.fd(), XFS_IOC_FSCOUNTS as RequestType, &mut c) };
        ioctl_result(rc)?;

        Ok(FsCounts {
            used_inodes: c.allocino.saturating_sub(c.freeino),
            free_inodes: c.freeino,
            free_blocks: c.freedata,
            free_rt_extents: c.freertx,
        })
    }
}

//------------------------------------------


//------------------------------------------
