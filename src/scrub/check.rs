use anyhow::Result;

use crate::fs::{KernelError, VectoredEntry};
use crate::scrub::context::{ScrubContext, ScrubMode};
use crate::scrub::item::*;
use crate::scrub::types::*;
use crate::scrub::Cancelled;


//------------------------------------------

fn warn_incomplete(ctx: &ScrubContext, descr: &str, oflags: u32) {
    if is_incomplete(oflags) {
        ctx.str_warn(descr, "Check incomplete.");
    }

    if has_warning(oflags) {
        ctx.str_info(descr, "Possibly suspect metadata.");
    }
}

/// Fold the result of one check call into the item.  Only conditions
/// that make the rest of the run pointless come back as errors.
pub fn process_check_result(
    ctx: &ScrubContext,
    sri: &mut ScrubItem,
    t: ScrubType,
    res: std::result::Result<u32, KernelError>,
) -> Result<()> {
    let descr = ctx.describe(&sri.target, t);

    let oflags = match res {
        Ok(oflags) => oflags,
        Err(KernelError::NotFound) => {
            // Metadata not present, nothing to check.
            sri.clean_state(t);
            return Ok(());
        }
        Err(KernelError::Busy) => {
            if sri.schedule_retry(t) {
                return Ok(());
            }
            ctx.str_warn(&descr, "Filesystem busy; check could not be completed.");
            sri.clean_state(t);
            return Ok(());
        }
        Err(KernelError::NotSupported) => {
            ctx.str_warn(&descr, "Kernel cannot check this metadata; skipping.");
            sri.clean_state(t);
            return Ok(());
        }
        Err(e @ KernelError::Shutdown) => {
            ctx.str_error(&descr, "Filesystem is shut down, aborting.");
            return Err(e.into());
        }
        Err(e @ (KernelError::Io | KernelError::NoMemory)) => {
            ctx.str_liberror(&descr, &e);
            return Err(e.into());
        }
        Err(e) => {
            ctx.str_liberror(&descr, &e);
            sri.clean_state(t);
            return Ok(());
        }
    };

    // The kernel may want us to try again, eg. it couldn't get all the
    // locks it wanted, or cross-referencing raced with an update.
    if want_retry(oflags) && sri.schedule_retry(t) {
        return Ok(());
    }

    warn_incomplete(ctx, &descr, oflags);

    if is_corrupt(oflags) || xref_disagrees(oflags) {
        if ctx.mode() == ScrubMode::Repair {
            sri.save_state(t, oflags);
        } else {
            ctx.str_corrupt(&descr, "Repairs are required.");
            sri.clean_state(t);
        }
        return Ok(());
    }

    if is_unoptimized(oflags) {
        if ctx.mode() == ScrubMode::DryRun {
            ctx.trigger_preen(t);
            sri.clean_state(t);
        } else {
            sri.save_state(t, oflags);
        }
        return Ok(());
    }

    if xref_failed(oflags) {
        if ctx.mode() == ScrubMode::Repair {
            sri.save_state(t, oflags);
        } else {
            ctx.str_warn(&descr, "Seems correct but cross-referencing failed.");
            sri.clean_state(t);
        }
        return Ok(());
    }

    ctx.str_debug(&descr, "Check passed.");
    sri.clean_state(t);
    Ok(())
}

fn check_one(ctx: &ScrubContext, sri: &mut ScrubItem, t: ScrubType) -> Result<()> {
    let res = ctx.fs.scrub_metadata(&ScrubRequest::check(t, sri.target));
    ctx.background_sleep();
    process_check_result(ctx, sri, t, res)
}

// Returns false if vectored calls turned out to be unavailable, in
// which case nothing was done.
fn check_vectored(ctx: &ScrubContext, sri: &mut ScrubItem, types: &[ScrubType]) -> Result<bool> {
    let mut entries: Vec<VectoredEntry> = types.iter().map(|t| VectoredEntry::new(*t, 0)).collect();

    match ctx.fs.scrub_vectored(&sri.target, &mut entries) {
        Ok(()) => {}
        Err(KernelError::NotSupported) => {
            ctx.report
                .debug("Vectored scrub not supported; falling back to single calls.");
            ctx.set_vectored(false);
            return Ok(false);
        }
        Err(e @ (KernelError::Shutdown | KernelError::Io | KernelError::NoMemory)) => {
            // Fatal whichever type it gets pinned on.
            process_check_result(ctx, sri, types[0], Err(e))?;
            return Ok(true);
        }
        Err(_) => return Ok(false),
    }
    ctx.background_sleep();

    for e in entries {
        match e.result {
            Some(res) => process_check_result(ctx, sri, e.scrub_type, res)?,
            None => check_one(ctx, sri, e.scrub_type)?,
        }
    }

    Ok(true)
}

/// Run every scheduled check on an item, retrying as long as the kernel
/// asks us to and the retry budget allows.
pub fn check_item(ctx: &ScrubContext, sri: &mut ScrubItem) -> Result<()> {
    sri.reset_tries(ITEM_NEEDSCHECK);

    loop {
        let old = sri.clone();
        // Anything whose dependencies are known to be broken waits until
        // they've been repaired.
        let types: Vec<ScrubType> = sri
            .types_with(ITEM_NEEDSCHECK)
            .filter(|t| !sri.deps_corrupt(*t))
            .collect();
        if types.is_empty() {
            break;
        }

        if ctx.excessive_errors() {
            return Err(Cancelled.into());
        }

        if !(ctx.use_vectored() && check_vectored(ctx, sri, &types)?) {
            for t in types {
                if ctx.excessive_errors() {
                    return Err(Cancelled.into());
                }
                if sri.deps_corrupt(t) {
                    continue;
                }
                check_one(ctx, sri, t)?;
            }
        }

        if !sri.call_kernel_again(ITEM_NEEDSCHECK, &old) {
            break;
        }
    }

    Ok(())
}

//------------------------------------------
