use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::ioctl::{RequestType, BLKGETSIZE64, BLKSSZGET};

//------------------------------------------

pub fn file_exists(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

pub fn is_block_device(path: &Path) -> io::Result<bool> {
    Ok(fs::metadata(path)?.file_type().is_block_device())
}

fn check_ioctl(rc: libc::c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Size in bytes of a block device or regular file.
pub fn device_size(file: &File) -> io::Result<u64> {
    let md = file.metadata()?;
    if !md.file_type().is_block_device() {
        return Ok(md.len());
    }

    let mut size: u64 = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as RequestType, &mut size) };
    check_ioctl(rc)?;
    Ok(size)
}

/// Logical sector size of a block device; 512 for anything else.
pub fn sector_size(file: &File) -> io::Result<u64> {
    if !file.metadata()?.file_type().is_block_device() {
        return Ok(512);
    }

    let mut size: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), BLKSSZGET as RequestType, &mut size) };
    check_ioctl(rc)?;
    Ok(size as u64)
}

//------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountEntry {
    pub device: PathBuf,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountEntry {
    /// Value of a key=value mount option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.iter().find_map(|o| {
            o.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

// The mount table escapes whitespace and backslashes as three digit
// octal sequences.
fn unescape_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let c = digits.iter().fold(0u32, |acc, d| acc * 8 + (d - b'0') as u32);
                out.push(c as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }

        entries.push(MountEntry {
            device: PathBuf::from(unescape_field(fields[0])),
            mount_point: PathBuf::from(unescape_field(fields[1])),
            fs_type: fields[2].to_string(),
            options: fields[3].split(',').map(|s| s.to_string()).collect(),
        });
    }
    entries
}

/// Finds the mount whose root is exactly `path`.  Later entries shadow
/// earlier ones.
pub fn find_mount(path: &Path) -> Result<MountEntry> {
    let path = fs::canonicalize(path).with_context(|| format!("{}", path.display()))?;
    let text = fs::read_to_string("/proc/self/mounts").context("reading mount table")?;

    parse_mounts(&text)
        .into_iter()
        .rev()
        .find(|m| m.mount_point == path)
        .ok_or_else(|| anyhow!("{}: not a mount point", path.display()))
}

//------------------------------------------


//------------------------------------------
