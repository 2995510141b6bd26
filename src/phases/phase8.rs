use anyhow::Result;
use std::sync::Arc;

use crate::phases::{Phase, PhaseId};
use crate::scrub::context::{ScrubContext, ScrubMode};


//------------------------------------------

pub struct Trim;

// Never discard blocks from a filesystem we're not sure about.
fn safe_to_trim(ctx: &ScrubContext) -> bool {
    let t = ctx.totals();
    t.corruptions_found == 0 && t.unfixable_errors == 0 && ctx.pending_repairs() == 0
}

impl Phase for Trim {
    fn id(&self) -> PhaseId {
        PhaseId::Trim
    }

    fn is_enabled(&self, ctx: &ScrubContext) -> bool {
        ctx.mode() != ScrubMode::DryRun && !ctx.opts.skip_trim
    }

    fn estimate_work(&self, ctx: &ScrubContext) -> Result<u64> {
        Ok(ctx.geo.ag_count as u64)
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        if !safe_to_trim(ctx) {
            ctx.str_info(&ctx.mount_descr(), "Not trimming a filesystem with unresolved errors.");
            return Ok(());
        }

        let minlen = ctx.geo.block_size as u64;
        for agno in 0..ctx.geo.ag_count {
            if ctx.is_aborted() {
                break;
            }

            let r = ctx.geo.ag_range(agno);
            if let Err(e) = ctx.fs.trim(r.start, r.end - r.start, minlen) {
                // Not every device supports discard.
                if e.raw_os_error() == Some(libc::EOPNOTSUPP) {
                    ctx.report.debug("Trim not supported.");
                    break;
                }
                ctx.str_liberror(&format!("{} AG {}", ctx.mount_descr(), agno), &e);
                break;
            }
            ctx.progress_add(1);
        }

        Ok(())
    }
}

//------------------------------------------
