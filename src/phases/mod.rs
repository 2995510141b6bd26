use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::fs::Filesystem;
use crate::report::{ProgressMonitor, Report};
use crate::scrub::context::*;
use crate::scrub::{is_cancelled, Cancelled};
use crate::scrub::types::*;

pub mod phase1;
pub mod phase2;
pub mod phase3;
pub mod phase4;
pub mod phase5;
pub mod phase6;
pub mod phase7;
pub mod phase8;


//------------------------------------------

/// The phases of a run, in the order they happen.  No phase is
/// entered twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PhaseId {
    Setup,
    AgMetadataScan,
    InodeScan,
    Repair,
    Connectivity,
    DataVerification,
    CounterCheck,
    Trim,
    Done,
}

impl PhaseId {
    pub fn next(self) -> PhaseId {
        use PhaseId::*;

        match self {
            Setup => AgMetadataScan,
            AgMetadataScan => InodeScan,
            InodeScan => Repair,
            Repair => Connectivity,
            Connectivity => DataVerification,
            DataVerification => CounterCheck,
            CounterCheck => Trim,
            Trim | Done => Done,
        }
    }

    pub fn number(self) -> usize {
        self as usize + 1
    }

    pub fn descr(self) -> &'static str {
        use PhaseId::*;

        match self {
            Setup => "Find filesystem geometry.",
            AgMetadataScan => "Check internal metadata.",
            InodeScan => "Scan all inodes.",
            Repair => "Repair filesystem.",
            Connectivity => "Check directory tree.",
            DataVerification => "Verify data file integrity.",
            CounterCheck => "Check summary counters.",
            Trim => "Trim filesystem storage.",
            Done => "Done.",
        }
    }
}

pub trait Phase {
    fn id(&self) -> PhaseId;

    fn is_enabled(&self, _ctx: &ScrubContext) -> bool {
        true
    }

    /// Rough number of work units, used to scale the progress bar.
    fn estimate_work(&self, ctx: &ScrubContext) -> Result<u64>;

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()>;
}

pub fn all_phases() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(phase1::Setup),
        Box::new(phase2::AgMetadataScan),
        Box::new(phase3::InodeScan),
        Box::new(phase4::Repair),
        Box::new(phase5::Connectivity),
        Box::new(phase6::DataVerification),
        Box::new(phase7::CounterCheck),
        Box::new(phase8::Trim),
    ]
}

fn run_phase(ctx: &Arc<ScrubContext>, phase: &dyn Phase) -> Result<()> {
    let id = phase.id();
    ctx.report
        .set_title(&format!("Phase {}: {}", id.number(), id.descr()));
    ctx.report.info(&format!("Phase {}: {}", id.number(), id.descr()));

    let work = phase.estimate_work(ctx)?;
    ctx.progress.reset();

    let progress = ctx.progress.clone();
    let monitor = ProgressMonitor::new(ctx.report.clone(), work, move || progress.value());
    let r = phase.run(ctx);
    monitor.stop();
    ctx.report.progress(100);

    r
}

/// Run the phases in order.  Each one finishes completely before the
/// next begins.
pub fn run_pipeline(ctx: &Arc<ScrubContext>, phases: &[Box<dyn Phase>]) -> Result<()> {
    let mut state = PhaseId::Setup;

    for phase in phases {
        if phase.id() < state {
            return Err(anyhow!("phase {} is out of order", phase.id().number()));
        }
        state = phase.id();

        if !phase.is_enabled(ctx) {
            continue;
        }

        run_phase(ctx, phase.as_ref())?;

        if ctx.is_aborted() {
            return Err(Cancelled.into());
        }
        state = state.next();
    }

    ctx.report.complete();
    Ok(())
}

//------------------------------------------

fn report_summary(ctx: &ScrubContext, t: &RunTotals) {
    let mount = ctx.mount_descr();

    let errors = t.corruptions_found + t.unfixable_errors + t.runtime_errors;
    if errors > 0 || t.warnings_found > 0 {
        ctx.report.to_stdout(&format!(
            "{}: {} errors and {} warnings found.",
            mount, errors, t.warnings_found
        ));
        if t.corruptions_found > 0 || t.unfixable_errors > 0 {
            ctx.report.to_stdout(&format!(
                "{}: Unmount and run xfs_repair.",
                mount
            ));
        }
    }

    if t.repairs > 0 || t.preens > 0 {
        ctx.report.to_stdout(&format!(
            "{}: repairs made: {}; optimizations made: {}.",
            mount, t.repairs, t.preens
        ));
    }

    ctx.report.info(&format!(
        "{}: {} inodes checked, {} bytes verified, {} repair rounds.",
        mount, t.inodes_checked, t.bytes_verified, t.repair_rounds
    ));
}

// Tell the kernel it can forget any health problems it remembers.
fn report_healthy(ctx: &ScrubContext) {
    if ctx.mode() == ScrubMode::DryRun {
        return;
    }

    let req = ScrubRequest::repair(ScrubType::Healthy, ScrubTarget::Fs);
    if ctx.fs.scrub_metadata(&req).is_ok() {
        ctx.report.debug("Filesystem marked healthy.");
    }
}

/// Check (and maybe repair) a mounted filesystem from start to finish.
/// Operational failures are counted rather than returned, so the
/// totals always describe the whole run.
pub fn scrub_filesystem(
    fs: Arc<dyn Filesystem>,
    opts: ScrubOptions,
    report: Arc<Report>,
) -> Result<RunTotals> {
    let ctx = Arc::new(ScrubContext::new(fs, opts, report)?);
    scrub_with_context(&ctx, &all_phases());
    Ok(ctx.totals())
}

pub fn scrub_with_context(ctx: &Arc<ScrubContext>, phases: &[Box<dyn Phase>]) {
    if let Err(e) = run_pipeline(ctx, phases) {
        // Fatal kernel errors have been reported where they happened.
        if !is_cancelled(&e) && ctx.totals().runtime_errors == 0 {
            ctx.str_liberror(&ctx.mount_descr(), &e);
        }
    }

    ctx.report_preen_triggers();

    let t = ctx.totals();
    if t.is_clean() && ctx.pending_repairs() == 0 && !ctx.is_aborted() {
        report_healthy(ctx);
    }
    report_summary(ctx, &t);
}

//------------------------------------------
