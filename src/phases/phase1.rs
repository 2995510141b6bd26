use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::fs::{DeviceId, KernelError};
use crate::phases::{Phase, PhaseId};
use crate::scrub::context::{ScrubContext, ScrubMode};
use crate::scrub::types::*;

//------------------------------------------

pub struct Setup;

fn probe(ctx: &ScrubContext, repair: bool) -> std::result::Result<u32, KernelError> {
    let req = if repair {
        ScrubRequest::repair(ScrubType::Probe, ScrubTarget::Fs)
    } else {
        ScrubRequest::check(ScrubType::Probe, ScrubTarget::Fs)
    };
    ctx.fs.scrub_metadata(&req)
}

fn probe_kernel(ctx: &ScrubContext) -> Result<()> {
    match probe(ctx, false) {
        Ok(_) => {}
        Err(KernelError::NotSupported) | Err(KernelError::Invalid) => {
            return Err(anyhow!(
                "Kernel metadata scrubbing facility is not available."
            ));
        }
        Err(e) => return Err(e.into()),
    }

    if ctx.mode() != ScrubMode::DryRun {
        match probe(ctx, true) {
            Ok(_) => {}
            Err(KernelError::NotSupported) | Err(KernelError::Invalid) => {
                return Err(anyhow!(
                    "Kernel metadata repair facility is not available.  Use -n to scrub."
                ));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

// Vectored calls are an optimisation, so any failure just leaves them
// off.
fn probe_vectored(ctx: &ScrubContext) {
    let mut entries = [crate::fs::VectoredEntry::new(ScrubType::Probe, 0)];
    let enabled = ctx.fs.scrub_vectored(&ScrubTarget::Fs, &mut entries).is_ok();
    ctx.set_vectored(enabled);
    if enabled {
        ctx.report.debug("Using vectored scrub calls.");
    }
}

fn check_devices(ctx: &ScrubContext) -> Result<()> {
    if !ctx.opts.verify_data {
        return Ok(());
    }

    let mut devs = vec![DeviceId::Data];
    if ctx.geo.has_realtime() {
        devs.push(DeviceId::Realtime);
    }

    for dev in devs {
        if ctx.fs.disk(dev).is_none() {
            return Err(anyhow!(
                "Unable to open the {:?} device for media verification.",
                dev
            ));
        }
    }
    Ok(())
}

impl Phase for Setup {
    fn id(&self) -> PhaseId {
        PhaseId::Setup
    }

    fn estimate_work(&self, _ctx: &ScrubContext) -> Result<u64> {
        Ok(0)
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        if ctx.mode() != ScrubMode::DryRun && ctx.fs.is_read_only() {
            return Err(anyhow!(
                "Cannot repair a filesystem mounted read-only.  Use -n to scrub."
            ));
        }

        probe_kernel(ctx)?;
        probe_vectored(ctx);
        check_devices(ctx)?;

        let geo = &ctx.geo;
        ctx.report.debug(&format!(
            "{}: {} AGs of {} blocks, block size {}, {} realtime blocks.",
            ctx.mount_descr(),
            geo.ag_count,
            geo.ag_blocks,
            geo.block_size,
            geo.rt_blocks
        ));
        ctx.report.debug(&format!(
            "{}: using {} threads.",
            ctx.mount_descr(),
            ctx.nr_threads()
        ));

        Ok(())
    }
}

//------------------------------------------
