use anyhow::Result;
use std::sync::{Arc, Mutex};

use crate::scrub::action_list::{ActionItem, ActionList};
use crate::scrub::check::check_item;
use crate::scrub::context::ScrubContext;
use crate::scrub::item::*;
use crate::scrub::repair::{repair_item, RepairFlags};
use crate::workqueue::WorkQueue;


//------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryRepairOutcome {
    /// Nothing left to do for this item.
    Repaired,

    /// Still broken, but something changed, so try again later.
    Requeue,

    /// Still broken and nothing changed.
    NoProgress,
}

/// One attempt at fixing a deferred item.
pub fn action_item_try_repair(
    ctx: &ScrubContext,
    aitem: &mut ActionItem,
    flags: RepairFlags,
) -> Result<TryRepairOutcome> {
    use TryRepairOutcome::*;

    let sri = &mut aitem.sri;
    sri.reset_tries(ITEM_REPAIR_ANY);
    let before = sri.clone();

    repair_item(ctx, sri, flags)?;

    if sri.count_needs_repair() > 0 {
        return Ok(if sri.changed_since(&before) {
            Requeue
        } else {
            NoProgress
        });
    }

    if !before.inconsistent {
        return Ok(Repaired);
    }

    // The item was corrupt, so re-check all of it to make sure the
    // repairs didn't leave anything else behind.
    sri.inconsistent = false;
    sri.revalidate = true;
    sri.reschedule_selected();
    let r = check_item(ctx, sri);
    sri.revalidate = false;
    r?;

    if sri.count_needs_repair() > 0 {
        Ok(Requeue)
    } else {
        Ok(Repaired)
    }
}

//------------------------------------------

#[derive(Default)]
struct RoundState {
    made_progress: bool,
    fixed: u64,
    error: Option<anyhow::Error>,
}

struct RepairRound {
    ctx: Arc<ScrubContext>,
    todo: Arc<ActionList>,
    requeue: ActionList,
    flags: RepairFlags,
    state: Mutex<RoundState>,
}

fn repair_worker(round: &RepairRound) {
    loop {
        if round.ctx.is_aborted() || round.state.lock().unwrap().error.is_some() {
            break;
        }

        let mut aitem = match round.todo.pop() {
            Some(aitem) => aitem,
            None => break,
        };

        let r = action_item_try_repair(&round.ctx, &mut aitem, round.flags);
        round.ctx.progress_add(1);

        let mut state = round.state.lock().unwrap();
        match r {
            Ok(TryRepairOutcome::Repaired) => {
                state.made_progress = true;
                state.fixed += 1;
            }
            Ok(TryRepairOutcome::Requeue) => {
                state.made_progress = true;
                round.requeue.add(aitem);
            }
            Ok(TryRepairOutcome::NoProgress) => round.requeue.add(aitem),
            Err(e) => {
                round.requeue.add(aitem);
                round.ctx.abort();
                if state.error.is_none() {
                    state.error = Some(e);
                }
                break;
            }
        }
    }
}

/// Drain a list with a pool of workers.  Anything that can't be fixed
/// yet goes back on the list, and we go round again for as long as each
/// round makes some progress.  Returns the number of items fixed.
pub fn repair_list_schedule(
    ctx: &Arc<ScrubContext>,
    list: &Arc<ActionList>,
    flags: RepairFlags,
) -> Result<u64> {
    let mut fixed = 0;

    while !list.is_empty() {
        ctx.update_totals(|t| t.repair_rounds += 1);

        let round = Arc::new(RepairRound {
            ctx: ctx.clone(),
            todo: list.clone(),
            requeue: ActionList::new(),
            flags,
            state: Mutex::new(RoundState::default()),
        });

        let nr_workers = std::cmp::min(ctx.nr_threads(), list.len());
        let mut wq = WorkQueue::new("repair", round.clone(), nr_workers);
        for i in 0..nr_workers {
            wq.add(i as u32, |round, _| repair_worker(round))?;
        }
        wq.terminate()?;

        list.merge(&round.requeue);
        let state = std::mem::take(&mut *round.state.lock().unwrap());
        if let Some(e) = state.error {
            return Err(e);
        }

        fixed += state.fixed;
        if !state.made_progress {
            break;
        }
    }

    Ok(fixed)
}

/// Last pass over whatever is left: one final attempt per item with
/// failures reported rather than deferred.
pub fn action_list_process_final(ctx: &ScrubContext, list: &ActionList) -> Result<()> {
    while let Some(mut aitem) = list.pop() {
        if ctx.is_aborted() {
            list.add(aitem);
            break;
        }

        let r = repair_item(ctx, &mut aitem.sri, RepairFlags::final_warning());
        ctx.progress_add(1);
        if let Err(e) = r {
            list.add(aitem);
            return Err(e);
        }
    }
    Ok(())
}

/// Gather the deferred work into the two lists the repair phase works
/// on: whole-filesystem and AG metadata first, then files.
fn gather_work(ctx: &ScrubContext, space: &ActionList, files: &ActionList) {
    space.merge(&ctx.fs_repair_list);
    for l in &ctx.ag_repair_lists {
        space.merge(l);
    }

    files.merge(&ctx.file_repair_list);
    for l in &ctx.file_repair_lists {
        files.merge(l);
    }
}

/// Run repairs until nothing more can be fixed, then make one final
/// pass that reports whatever is still broken.
pub fn repair_everything(ctx: &Arc<ScrubContext>) -> Result<()> {
    let space = Arc::new(ActionList::new());
    let files = Arc::new(ActionList::new());
    gather_work(ctx, &space, &files);

    let r = (|| -> Result<()> {
        loop {
            let fixed = repair_list_schedule(ctx, &space, RepairFlags::default())?
                + repair_list_schedule(ctx, &files, RepairFlags::default())?;
            if fixed == 0 {
                break;
            }
        }

        space.merge(&files);
        action_list_process_final(ctx, &space)
    })();

    // Anything left over stays visible to the rest of the run.
    ctx.fs_repair_list.merge(&space);
    ctx.file_repair_list.merge(&files);
    r
}

//------------------------------------------
