use anyhow::Result;
use std::sync::Arc;

use crate::phases::{Phase, PhaseId};
use crate::scrub::check::check_item;
use crate::scrub::context::ScrubContext;
use crate::scrub::item::ScrubItem;
use crate::scrub::repair::repair_item_completely;
use crate::scrub::types::*;


//------------------------------------------

pub struct CounterCheck;

// Allow for inodes allocated or freed while we were scanning.
fn counts_disagree(counted: u64, reported: u64) -> bool {
    let diff = counted.abs_diff(reported);
    diff > reported / 16
}

impl Phase for CounterCheck {
    fn id(&self) -> PhaseId {
        PhaseId::CounterCheck
    }

    fn estimate_work(&self, _ctx: &ScrubContext) -> Result<u64> {
        Ok(2)
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        let mut sri = ScrubItem::fs();
        sri.schedule_group(ScrubGroup::Summary);
        sri.schedule_group(ScrubGroup::InodeScan);

        check_item(ctx, &mut sri)?;
        repair_item_completely(ctx, &mut sri)?;
        ctx.progress_add(1);

        let counted = ctx.inodes_checked.value();
        let reported = ctx.fs.counts()?.used_inodes;
        if counts_disagree(counted, reported) {
            ctx.str_warn(
                &ctx.mount_descr(),
                &format!(
                    "inodes checked ({}) does not match allocated inode count ({}).",
                    counted, reported
                ),
            );
        }
        ctx.progress_add(1);

        Ok(())
    }
}

//------------------------------------------
