use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fs::mock::MockFs;
use crate::phases::phase2::AgMetadataScan;
use crate::phases::Phase;
use crate::scrub::context::{ScrubMode, ScrubOptions};
use crate::scrub::item::*;
use crate::scrub::test_utils::Fixture;
use crate::scrub::types::*;

//------------------------------------------

fn random_pause() {
    let us = rand::thread_rng().gen_range(0..400);
    std::thread::sleep(Duration::from_micros(us));
}

#[test]
fn rtsummary_waits_for_rtbitmap() {
    for _ in 0..100 {
        let fs = MockFs::new(4).with_realtime(1 << 16);
        let bitmap_done = Arc::new(AtomicBool::new(false));
        let violations = Arc::new(AtomicU64::new(0));

        let done = bitmap_done.clone();
        let bad = violations.clone();
        fs.set_handler(Arc::new(move |req: &ScrubRequest| {
            match req.scrub_type {
                ScrubType::RtBitmap => {
                    random_pause();
                    done.store(true, Ordering::SeqCst);
                }
                ScrubType::RtSummary => {
                    if !done.load(Ordering::SeqCst) {
                        bad.fetch_add(1, Ordering::SeqCst);
                    }
                }
                _ => random_pause(),
            }
            None
        }));

        let opts = ScrubOptions {
            mode: ScrubMode::Repair,
            nr_threads: Some(4),
            ..Default::default()
        };
        let f = Fixture::with_opts(fs, opts);
        AgMetadataScan.run(&f.ctx).unwrap();

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(f.fs.nr_calls(ScrubTarget::Fs, ScrubType::RtSummary, false), 1);
    }
}

#[test]
fn primary_super_is_checked_first_and_once() {
    let f = Fixture::new(MockFs::new(3), ScrubMode::Repair);
    AgMetadataScan.run(&f.ctx).unwrap();

    let calls = f.fs.calls();
    assert_eq!(calls[0].scrub_type, ScrubType::Superblock);
    assert_eq!(calls[0].target, ScrubTarget::Ag(0));
    assert_eq!(f.fs.nr_calls(ScrubTarget::Ag(0), ScrubType::Superblock, false), 1);
    assert_eq!(f.fs.nr_calls(ScrubTarget::Ag(2), ScrubType::Superblock, false), 1);
    assert_eq!(f.fs.nr_calls(ScrubTarget::Ag(2), ScrubType::Refcountbt, false), 1);
    assert_eq!(f.ctx.pending_repairs(), 0);
}

#[test]
fn inode_btree_corruption_is_fixed_immediately() {
    let fs = MockFs::new(2);
    fs.respond_once(ScrubTarget::Ag(1), ScrubType::Inobt, false, Ok(SCRUB_OFLAG_CORRUPT));
    let f = Fixture::new(fs, ScrubMode::Repair);
    AgMetadataScan.run(&f.ctx).unwrap();

    assert_eq!(f.fs.nr_calls(ScrubTarget::Ag(1), ScrubType::Inobt, true), 1);
    assert_eq!(f.totals().repairs, 1);
    assert_eq!(f.ctx.pending_repairs(), 0);
}

#[test]
fn other_problems_are_deferred() {
    let fs = MockFs::new(2);
    fs.respond_once(ScrubTarget::Ag(1), ScrubType::Bnobt, false, Ok(SCRUB_OFLAG_CORRUPT));
    fs.respond_once(ScrubTarget::Ag(0), ScrubType::Cntbt, false, Ok(SCRUB_OFLAG_PREEN));
    let f = Fixture::new(fs, ScrubMode::Repair);
    AgMetadataScan.run(&f.ctx).unwrap();

    assert_eq!(f.fs.nr_calls(ScrubTarget::Ag(1), ScrubType::Bnobt, true), 0);
    assert_eq!(f.ctx.ag_repair_lists[0].nr_repairs(), 1);
    assert_eq!(f.ctx.ag_repair_lists[1].nr_repairs(), 1);
}

#[test]
fn stuck_headers_stop_forward_checking() {
    let fs = MockFs::new(1);
    let target = ScrubTarget::Ag(0);
    fs.respond(target, ScrubType::Agf, false, Ok(SCRUB_OFLAG_CORRUPT));
    fs.respond(target, ScrubType::Agf, true, Ok(SCRUB_OFLAG_CORRUPT));
    let f = Fixture::new(fs, ScrubMode::Repair);
    AgMetadataScan.run(&f.ctx).unwrap();

    assert_eq!(
        f.count_lines("Filesystem metadata dependencies prevent forward checking progress."),
        1
    );
    // the free space btrees were never looked at
    assert_eq!(f.fs.nr_calls(target, ScrubType::Bnobt, false), 0);

    let item = f.ctx.ag_repair_lists[0].pop().unwrap();
    assert_eq!(item.sri.state(ScrubType::Agf), ITEM_CORRUPT);
    assert!(item.sri.needs_check(ScrubType::Bnobt));
}

#[test]
fn broken_secondary_metadata_is_called_out() {
    let fs = MockFs::new(2);
    fs.respond_once(ScrubTarget::Ag(1), ScrubType::Rmapbt, false, Ok(SCRUB_OFLAG_CORRUPT));
    fs.respond_once(ScrubTarget::Ag(0), ScrubType::Bnobt, false, Ok(SCRUB_OFLAG_CORRUPT));
    let f = Fixture::new(fs, ScrubMode::Repair);
    AgMetadataScan.run(&f.ctx).unwrap();

    assert_eq!(f.count_lines("Corrupt primary and secondary metadata."), 1);
    assert_eq!(f.count_lines("Filesystem might not be repairable."), 1);
}

#[test]
fn dry_run_reports_instead_of_deferring() {
    let fs = MockFs::new(2);
    fs.respond_once(ScrubTarget::Ag(1), ScrubType::Rmapbt, false, Ok(SCRUB_OFLAG_CORRUPT));
    let f = Fixture::new(fs, ScrubMode::DryRun);
    AgMetadataScan.run(&f.ctx).unwrap();

    assert_eq!(f.totals().corruptions_found, 1);
    assert_eq!(f.ctx.pending_repairs(), 0);
    assert_eq!(f.count_lines("might not be repairable"), 0);
    assert!(f.fs.calls().iter().all(|c| !c.is_repair()));
}

#[test]
fn shutdown_aborts_the_scan() {
    let fs = MockFs::new(4);
    fs.respond(
        ScrubTarget::Ag(2),
        ScrubType::Agi,
        false,
        Err(crate::fs::KernelError::Shutdown),
    );
    let f = Fixture::new(fs, ScrubMode::Repair);
    assert!(AgMetadataScan.run(&f.ctx).is_err());
    assert!(f.ctx.is_aborted());
}

//------------------------------------------
