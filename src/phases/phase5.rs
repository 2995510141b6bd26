use anyhow::Result;
use std::sync::Arc;

use crate::fs::{DirEntry, InodeStat};
use crate::inodes::scan_all_inodes;
use crate::names::escape_name;
use crate::phases::{Phase, PhaseId};
use crate::scrub::context::ScrubContext;
use crate::scrub::types::ScrubTarget;


//------------------------------------------

pub struct Connectivity;

fn is_gone(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ESTALE) | Some(libc::ENOENT))
}

fn check_entry(ctx: &ScrubContext, dir_descr: &str, entry: &DirEntry) {
    let problems = ctx.name_checker.check(&entry.name);
    if problems.is_empty() {
        return;
    }

    let descr = format!("{} entry \"{}\"", dir_descr, escape_name(&entry.name));
    for msg in problems {
        ctx.name_warning(&descr, &msg);
    }
}

fn check_dir(ctx: &ScrubContext, stat: &InodeStat) -> Result<()> {
    let descr = ctx.describe_target(&ScrubTarget::Inode {
        ino: stat.ino,
        gen: stat.gen,
    });

    // Opening by handle reconnects the directory to the tree if it has
    // come adrift.
    let entries = ctx
        .fs
        .open_by_handle(&stat.handle())
        .and_then(|mut dir| dir.read_dir());

    match entries {
        Ok(entries) => {
            for entry in &entries {
                check_entry(ctx, &descr, entry);
            }
        }
        Err(e) if is_gone(&e) => {}
        Err(e) => ctx.str_liberror(&descr, &e),
    }
    Ok(())
}

impl Phase for Connectivity {
    fn id(&self) -> PhaseId {
        PhaseId::Connectivity
    }

    fn estimate_work(&self, ctx: &ScrubContext) -> Result<u64> {
        Ok(ctx.fs.counts()?.used_inodes)
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        scan_all_inodes(
            ctx,
            Arc::new(|ctx: &ScrubContext, stat: &InodeStat| {
                if stat.is_dir() {
                    check_dir(ctx, stat)?;
                }
                ctx.progress_add(1);
                Ok(())
            }),
        )
    }
}

//------------------------------------------
