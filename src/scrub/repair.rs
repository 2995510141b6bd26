use anyhow::Result;

use crate::fs::KernelError;
use crate::scrub::context::{ScrubContext, ScrubMode};
use crate::scrub::item::*;
use crate::scrub::types::*;
use crate::scrub::Cancelled;

#[cfg(test)]
mod tests;

//------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairFlags {
    /// This is the last chance; anything we can't fix now gets reported
    /// instead of requeued.
    pub final_warning: bool,
}

impl RepairFlags {
    pub fn final_warning() -> Self {
        RepairFlags {
            final_warning: true,
        }
    }
}

/// Repair classes in the order they are attempted.
pub const REPAIR_CLASSES: [u8; 4] = [ITEM_CORRUPT, ITEM_XCORRUPT, ITEM_XFAIL, ITEM_PREEN];

//------------------------------------------

// Give up on a type, saying why according to what was wrong with it.
fn report_unrepaired(ctx: &ScrubContext, sri: &mut ScrubItem, t: ScrubType, descr: &str) {
    let state = sri.state(t);
    if state & (ITEM_CORRUPT | ITEM_XCORRUPT) != 0 {
        ctx.str_corrupt(descr, "Repair unsuccessful; offline repair required.");
    } else if state & ITEM_XFAIL != 0 {
        ctx.str_warn(
            descr,
            "Seems correct but cross-referencing failed; offline repair recommended.",
        );
    } else if state & ITEM_PREEN != 0 {
        ctx.str_info(descr, "Optimization could not be completed.");
    }
    sri.clean_state(t);
}

fn process_repair_error(
    ctx: &ScrubContext,
    sri: &mut ScrubItem,
    t: ScrubType,
    descr: &str,
    e: KernelError,
    flags: RepairFlags,
) -> Result<()> {
    use KernelError::*;

    match e {
        NotFound => {
            sri.clean_state(t);
            Ok(())
        }
        Busy => {
            if !sri.schedule_retry(t) {
                report_unrepaired(ctx, sri, t, descr);
            }
            Ok(())
        }
        Shutdown => {
            ctx.str_error(descr, "Filesystem is shut down, aborting.");
            Err(e.into())
        }
        Io => {
            ctx.str_liberror(descr, &e);
            Err(e.into())
        }
        NotSupported | Invalid | ReadOnly | NoSpace | NoMemory | Other(_) => {
            // Optimizations are optional, don't make a fuss.
            if sri.preen_only(t) {
                sri.clean_state(t);
                return Ok(());
            }

            if e == ReadOnly {
                ctx.str_error(descr, "Read-only filesystem; cannot make changes.");
                return Err(e.into());
            }

            if e != Invalid && !flags.final_warning {
                return Ok(());
            }

            match e {
                NotSupported | Invalid => {
                    ctx.str_corrupt(descr, "Don't know how to fix; offline repair required.")
                }
                _ => ctx.str_liberror(descr, &e),
            }
            sri.clean_state(t);
            Ok(())
        }
    }
}

/// Ask the kernel to repair one type and fold the outcome into the
/// item.
pub fn repair_metadata(
    ctx: &ScrubContext,
    sri: &mut ScrubItem,
    t: ScrubType,
    flags: RepairFlags,
) -> Result<()> {
    let descr = ctx.describe(&sri.target, t);
    let old_state = sri.state(t);
    let preen_only = sri.preen_only(t);

    let res = ctx.fs.scrub_metadata(&ScrubRequest::repair(t, sri.target));
    ctx.background_sleep();

    let oflags = match res {
        Ok(oflags) => oflags,
        Err(e) => return process_repair_error(ctx, sri, t, &descr, e, flags),
    };

    let mut final_attempt = flags.final_warning;
    if want_retry(oflags) {
        if !final_attempt && sri.schedule_retry(t) {
            return Ok(());
        }
        final_attempt = true;
    }

    if final_attempt && is_incomplete(oflags) {
        ctx.str_warn(&descr, "Repair incomplete; offline repair recommended.");
    }

    if is_corrupt(oflags) || xref_disagrees(oflags) {
        if final_attempt {
            ctx.str_corrupt(&descr, "Repair unsuccessful; offline repair required.");
            sri.clean_state(t);
        } else {
            sri.save_state(t, oflags);
        }
        return Ok(());
    }

    if xref_failed(oflags) {
        if final_attempt {
            ctx.str_warn(
                &descr,
                "Seems correct but cross-referencing failed; offline repair recommended.",
            );
            sri.clean_state(t);
        } else {
            sri.save_state(t, oflags);
        }
        return Ok(());
    }

    if is_incomplete(oflags) {
        sri.clean_state(t);
        return Ok(());
    }

    if oflags & SCRUB_OFLAG_NO_REPAIR_NEEDED != 0 {
        if preen_only {
            ctx.record_preen(&descr, "Already optimized.");
        } else {
            ctx.str_info(&descr, "No modification needed.");
        }
        sri.clean_state(t);
        return Ok(());
    }

    if old_state & ITEM_CORRUPT != 0 {
        ctx.record_repair(&descr, "Repairs successful.");
    } else if old_state & ITEM_XCORRUPT != 0 {
        ctx.record_repair(
            &descr,
            "Repairs successful after discrepancy in cross-referencing.",
        );
    } else if old_state & ITEM_XFAIL != 0 {
        ctx.record_repair(&descr, "Repairs successful after cross-referencing failure.");
    } else {
        ctx.record_preen(&descr, "Optimization successful.");
    }
    sri.clean_state(t);

    Ok(())
}

//------------------------------------------

fn mode_allows(ctx: &ScrubContext, class: u8) -> bool {
    match ctx.mode() {
        ScrubMode::DryRun => false,
        ScrubMode::Preen => class == ITEM_PREEN,
        ScrubMode::Repair => true,
    }
}

/// Repair every type of the item that falls in one repair class.
/// Boosted types ride along with the corruption class.
pub fn repair_item_class(
    ctx: &ScrubContext,
    sri: &mut ScrubItem,
    class: u8,
    flags: RepairFlags,
) -> Result<()> {
    if !mode_allows(ctx, class) {
        return Ok(());
    }

    let mask = if class == ITEM_CORRUPT {
        class | ITEM_BOOST
    } else {
        class
    };

    loop {
        let old = sri.clone();
        let types: Vec<ScrubType> = sri
            .types_with(mask)
            .filter(|t| sri.needs_repair(*t))
            .collect();
        if types.is_empty() {
            break;
        }

        for t in types {
            if ctx.excessive_errors() {
                return Err(Cancelled.into());
            }

            // Wait for whatever this depends on to be fixed first,
            // unless this is our last chance.
            if !flags.final_warning && sri.deps_pending(t) {
                continue;
            }

            repair_metadata(ctx, sri, t, flags)?;
        }

        if !sri.call_kernel_again(mask, &old) {
            break;
        }
    }

    Ok(())
}

/// Try every repair class on the item, most serious first.
pub fn repair_item(ctx: &ScrubContext, sri: &mut ScrubItem, flags: RepairFlags) -> Result<()> {
    sri.reset_tries(ITEM_REPAIR_ANY);
    for class in REPAIR_CLASSES {
        repair_item_class(ctx, sri, class, flags)?;
    }
    Ok(())
}

/// Fix outright corruption now, leaving everything else for later.
pub fn repair_item_corruption(ctx: &ScrubContext, sri: &mut ScrubItem) -> Result<()> {
    sri.reset_tries(ITEM_REPAIR_ANY);
    repair_item_class(ctx, sri, ITEM_CORRUPT, RepairFlags::default())
}

/// Fix everything we can and report the rest; nothing is deferred.
pub fn repair_item_completely(ctx: &ScrubContext, sri: &mut ScrubItem) -> Result<()> {
    repair_item(ctx, sri, RepairFlags::final_warning())
}

//------------------------------------------
