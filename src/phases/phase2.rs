use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex};

use crate::phases::{Phase, PhaseId};
use crate::scrub::action_list::{defer_repair, ActionList};
use crate::scrub::check::check_item;
use crate::scrub::context::{ScrubContext, ScrubMode};
use crate::scrub::item::*;
use crate::scrub::repair::repair_item_corruption;
use crate::scrub::types::*;
use crate::workqueue::{FirstError, WorkQueue};

#[cfg(test)]
mod tests;

//------------------------------------------

pub struct AgMetadataScan;

/// Set once, waited on by any number of threads.
#[derive(Default)]
struct Signal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn set(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cond.wait(done).unwrap();
        }
    }
}

// Fires the signal however the job exits.
struct SignalOnDrop<'a>(&'a Signal);

impl Drop for SignalOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set();
    }
}

const PRIMARY_METADATA: [ScrubType; 5] = [
    ScrubType::Bnobt,
    ScrubType::Cntbt,
    ScrubType::Inobt,
    ScrubType::Finobt,
    ScrubType::Refcountbt,
];
const SECONDARY_METADATA: [ScrubType; 1] = [ScrubType::Rmapbt];

#[derive(Default)]
struct Difficulty {
    primary: bool,
    secondary: bool,
}

struct ScanState {
    ctx: Arc<ScrubContext>,
    errors: FirstError,
    difficulty: Mutex<Difficulty>,
    rtbitmap_done: Signal,
}

impl ScanState {
    fn fail(&self, e: anyhow::Error) {
        self.ctx.abort();
        self.errors.set(e);
    }

    fn note_difficulty(&self, sri: &ScrubItem) {
        let broken = |types: &[ScrubType]| {
            types
                .iter()
                .any(|t| sri.state(*t) & (ITEM_CORRUPT | ITEM_XCORRUPT) != 0)
        };

        let mut d = self.difficulty.lock().unwrap();
        d.primary |= broken(&PRIMARY_METADATA);
        d.secondary |= broken(&SECONDARY_METADATA);
    }
}

//------------------------------------------

// The inode btrees have to be sound before we can scan inodes, and
// anything still waiting on a check is held back by a broken header.
fn must_fix_now(sri: &ScrubItem) -> bool {
    let inode_btrees = [ScrubType::Agi, ScrubType::Inobt, ScrubType::Finobt];
    inode_btrees
        .iter()
        .any(|t| sri.state(*t) & ITEM_CORRUPT != 0)
        || sri.count_needs_check() > 0
}

/// Check everything scheduled on an item, fixing corruption on the spot
/// when that is what's stopping further checks.
fn check_and_fix(ctx: &ScrubContext, sri: &mut ScrubItem) -> Result<()> {
    let mut last = usize::MAX;

    loop {
        check_item(ctx, sri)?;

        if ctx.mode() != ScrubMode::Repair || !must_fix_now(sri) {
            break;
        }
        repair_item_corruption(ctx, sri)?;

        let remaining = sri.count_needs_check();
        if remaining == 0 {
            break;
        }
        if remaining >= last {
            ctx.str_info(
                &ctx.describe_target(&sri.target),
                "Filesystem metadata dependencies prevent forward checking progress.",
            );
            break;
        }
        last = remaining;
    }

    Ok(())
}

fn scan_primary_super(ctx: &ScrubContext) -> Result<()> {
    let mut sri = ScrubItem::ag(0);
    sri.schedule(ScrubType::Superblock);

    check_item(ctx, &mut sri)?;
    if ctx.mode() == ScrubMode::Repair {
        repair_item_corruption(ctx, &mut sri)?;
    }
    defer_repair(&ctx.ag_repair_lists[0], sri);
    Ok(())
}

fn scan_ag(state: &ScanState, agno: u32) -> Result<()> {
    let ctx = &state.ctx;
    let mut sri = ScrubItem::ag(agno);
    for t in ScrubType::in_group(ScrubGroup::AgHeader) {
        // AG 0's superblock has already been done.
        if agno == 0 && t == ScrubType::Superblock {
            continue;
        }
        sri.schedule(t);
    }
    sri.schedule_group(ScrubGroup::PerAg);

    check_and_fix(ctx, &mut sri)?;
    state.note_difficulty(&sri);
    defer_repair(&ctx.ag_repair_lists[agno as usize], sri);
    ctx.progress_add(1);
    Ok(())
}

fn scan_metafile(ctx: &ScrubContext, list: &ActionList, t: ScrubType) -> Result<()> {
    let mut sri = ScrubItem::fs();
    sri.schedule(t);
    check_item(ctx, &mut sri)?;
    if ctx.mode() == ScrubMode::Repair {
        repair_item_corruption(ctx, &mut sri)?;
    }
    defer_repair(list, sri);
    ctx.progress_add(1);
    Ok(())
}

fn warn_repair_difficulties(ctx: &ScrubContext, d: &Difficulty) {
    if ctx.mode() != ScrubMode::Repair || !d.secondary {
        return;
    }

    let mount = ctx.mount_descr();
    if d.primary {
        ctx.str_info(&mount, "Corrupt primary and secondary metadata.");
    } else {
        ctx.str_info(&mount, "Corrupt secondary metadata.");
    }
    ctx.str_info(&mount, "Filesystem might not be repairable.");
}

fn metafile_types() -> Vec<ScrubType> {
    ScrubType::in_group(ScrubGroup::FsMetafile).collect()
}

impl Phase for AgMetadataScan {
    fn id(&self) -> PhaseId {
        PhaseId::AgMetadataScan
    }

    fn estimate_work(&self, ctx: &ScrubContext) -> Result<u64> {
        Ok(ctx.geo.ag_count as u64 + metafile_types().len() as u64 + 1)
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        scan_primary_super(ctx)?;
        ctx.progress_add(1);

        let state = Arc::new(ScanState {
            ctx: ctx.clone(),
            errors: FirstError::default(),
            difficulty: Mutex::new(Difficulty::default()),
            rtbitmap_done: Signal::default(),
        });

        let mut wq = WorkQueue::new("ag_metadata", state.clone(), ctx.nr_threads());
        for agno in 0..ctx.geo.ag_count {
            wq.add(agno, |state, agno| {
                if state.ctx.is_aborted() {
                    return;
                }
                if let Err(e) = scan_ag(state, agno) {
                    state.fail(e);
                }
            })?;
        }

        // The realtime summary is computed from the bitmap, so it can only
        // be checked once the bitmap has been.  The bitmap job is queued
        // first so that a waiting summary job can't starve it.
        let mut types = metafile_types();
        types.sort_by_key(|t| *t != ScrubType::RtBitmap);
        for t in types {
            wq.add(t as u32, move |state, _| {
                let _signal = if t == ScrubType::RtBitmap {
                    Some(SignalOnDrop(&state.rtbitmap_done))
                } else {
                    None
                };

                if t == ScrubType::RtSummary {
                    state.rtbitmap_done.wait();
                }

                if state.ctx.is_aborted() {
                    return;
                }
                if let Err(e) = scan_metafile(&state.ctx, &state.ctx.fs_repair_list, t) {
                    state.fail(e);
                }
            })?;
        }
        wq.terminate()?;

        state.errors.take()?;
        warn_repair_difficulties(ctx, &state.difficulty.lock().unwrap());
        Ok(())
    }
}

//------------------------------------------
