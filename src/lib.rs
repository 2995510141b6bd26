extern crate anyhow;
extern crate num_cpus;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
#[cfg(test)]
extern crate quickcheck_macros;

pub mod bitmap;
pub mod buffer;
pub mod commands;
pub mod file_utils;
pub mod fs;
pub mod inodes;
pub mod ioctl;
pub mod math;
pub mod names;
pub mod phases;
pub mod ptvar;
pub mod read_verify;
pub mod report;
pub mod scrub;
pub mod spacemap;
pub mod version;
pub mod workqueue;
