use anyhow::Result;
use std::sync::Arc;

use crate::fs::InodeStat;
use crate::inodes::scan_all_inodes;
use crate::phases::{Phase, PhaseId};
use crate::scrub::action_list::defer_repair;
use crate::scrub::check::check_item;
use crate::scrub::context::{ScrubContext, ScrubMode};
use crate::scrub::item::ScrubItem;
use crate::scrub::repair::repair_item_corruption;
use crate::scrub::types::*;

#[cfg(test)]
mod tests;

//------------------------------------------

pub struct InodeScan;

// Check a group of types, then fix any corruption before moving on,
// since later checks lean on earlier ones.
fn check_step(
    ctx: &ScrubContext,
    sri: &mut ScrubItem,
    types: &[ScrubType],
    fix_now: bool,
) -> Result<()> {
    for t in types {
        sri.schedule(*t);
    }
    check_item(ctx, sri)?;

    if fix_now {
        repair_item_corruption(ctx, sri)?;
    }
    Ok(())
}

fn scrub_inode(ctx: &ScrubContext, stat: &InodeStat, fix_now: bool) -> Result<()> {
    let mut sri = ScrubItem::inode(stat.ino, stat.gen);

    // Holding the file open keeps the inode in memory between checks.
    // Directories are left alone, opening those by handle can kick off
    // a reconnection to the root.
    let _pin = if stat.is_reg() {
        ctx.fs.open_by_handle(&stat.handle()).ok()
    } else {
        None
    };

    check_step(ctx, &mut sri, &[ScrubType::Inode], fix_now)?;
    check_step(
        ctx,
        &mut sri,
        &[ScrubType::BmapData, ScrubType::BmapAttr, ScrubType::BmapCow],
        fix_now,
    )?;

    let mut contents = Vec::new();
    if stat.is_symlink() || stat.is_placeholder() {
        contents.push(ScrubType::Symlink);
    }
    if stat.is_dir() || stat.is_placeholder() {
        contents.push(ScrubType::Directory);
    }
    contents.push(ScrubType::Xattr);
    contents.push(ScrubType::Parent);
    check_step(ctx, &mut sri, &contents, fix_now)?;

    let agno = ctx.geo.ino_to_agno(stat.ino) as usize;
    defer_repair(&ctx.file_repair_lists[agno], sri);

    ctx.inodes_checked.add(1);
    ctx.progress_add(1);
    ctx.background_sleep();
    Ok(())
}

impl Phase for InodeScan {
    fn id(&self) -> PhaseId {
        PhaseId::InodeScan
    }

    fn estimate_work(&self, ctx: &ScrubContext) -> Result<u64> {
        Ok(ctx.fs.counts()?.used_inodes)
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        // With structural repairs still queued, per-file fixes are likely
        // to be wasted, so everything waits for the repair phase.
        let fix_now = ctx.mode() == ScrubMode::Repair && ctx.pending_repairs() == 0;

        scan_all_inodes(
            ctx,
            Arc::new(move |ctx: &ScrubContext, stat: &InodeStat| {
                scrub_inode(ctx, stat, fix_now)
            }),
        )
    }
}

//------------------------------------------
