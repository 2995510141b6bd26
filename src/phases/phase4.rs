use anyhow::Result;
use std::sync::Arc;

use crate::phases::{Phase, PhaseId};
use crate::scrub::context::{ScrubContext, ScrubMode};
use crate::scrub::schedule::repair_everything;

//------------------------------------------

pub struct Repair;

impl Phase for Repair {
    fn id(&self) -> PhaseId {
        PhaseId::Repair
    }

    fn is_enabled(&self, ctx: &ScrubContext) -> bool {
        ctx.mode() != ScrubMode::DryRun
    }

    fn estimate_work(&self, ctx: &ScrubContext) -> Result<u64> {
        Ok(ctx.pending_repairs())
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        if ctx.pending_repairs() == 0 {
            ctx.report.debug("Nothing to repair.");
            return Ok(());
        }

        repair_everything(ctx)
    }
}

//------------------------------------------
