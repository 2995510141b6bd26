use crate::fs::mock::MockFs;
use crate::fs::KernelError;
use crate::scrub::context::ScrubMode;
use crate::scrub::item::*;
use crate::scrub::repair::*;
use crate::scrub::test_utils::Fixture;

//------------------------------------------

fn repair_calls(f: &Fixture) -> Vec<ScrubType> {
    f.fs.calls()
        .iter()
        .filter(|c| c.is_repair())
        .map(|c| c.scrub_type)
        .collect()
}

#[test]
fn corruption_is_fixed_before_optimizations() {
    let f = Fixture::new(MockFs::new(1), ScrubMode::Repair);
    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Bnobt, SCRUB_OFLAG_PREEN);
    sri.save_state(ScrubType::Inobt, SCRUB_OFLAG_CORRUPT);

    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();

    assert_eq!(repair_calls(&f), vec![ScrubType::Inobt, ScrubType::Bnobt]);
    assert_eq!(sri.count_needs_repair(), 0);

    let t = f.totals();
    assert_eq!(t.repairs, 1);
    assert_eq!(t.preens, 1);
    assert_eq!(f.count_lines("Repaired: AG 0 inode btree: Repairs successful."), 1);
    assert_eq!(
        f.count_lines("Optimized: AG 0 freesp by block btree: Optimization successful."),
        1
    );
}

#[test]
fn classes_run_most_serious_first() {
    let f = Fixture::new(MockFs::new(1), ScrubMode::Repair);
    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Agf, SCRUB_OFLAG_PREEN);
    sri.save_state(ScrubType::Agfl, SCRUB_OFLAG_XFAIL);
    sri.save_state(ScrubType::Agi, SCRUB_OFLAG_XCORRUPT);
    sri.save_state(ScrubType::Bnobt, SCRUB_OFLAG_CORRUPT);

    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();
    assert_eq!(
        repair_calls(&f),
        vec![
            ScrubType::Bnobt,
            ScrubType::Agi,
            ScrubType::Agfl,
            ScrubType::Agf
        ]
    );
}

#[test]
fn boosted_types_join_the_corruption_class() {
    let f = Fixture::new(MockFs::new(1), ScrubMode::Repair);
    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Agi, SCRUB_OFLAG_XCORRUPT);
    sri.save_state(ScrubType::Cntbt, SCRUB_OFLAG_XFAIL);
    sri.boost(ScrubType::Cntbt);

    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();
    assert_eq!(repair_calls(&f), vec![ScrubType::Cntbt, ScrubType::Agi]);
}

#[test]
fn preen_mode_only_optimizes() {
    let f = Fixture::new(MockFs::new(1), ScrubMode::Preen);
    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Bnobt, SCRUB_OFLAG_PREEN);
    sri.save_state(ScrubType::Inobt, SCRUB_OFLAG_CORRUPT);

    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();
    assert_eq!(repair_calls(&f), vec![ScrubType::Bnobt]);
    assert_eq!(sri.state(ScrubType::Inobt), ITEM_CORRUPT);
}

#[test]
fn dry_run_never_calls_the_kernel() {
    let f = Fixture::new(MockFs::new(1), ScrubMode::DryRun);
    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Inobt, SCRUB_OFLAG_CORRUPT);

    repair_item(&f.ctx, &mut sri, RepairFlags::final_warning()).unwrap();
    assert!(f.fs.calls().is_empty());
}

#[test]
fn already_optimized_counts_as_an_optimization() {
    let fs = MockFs::new(1);
    let target = ScrubTarget::Inode { ino: 128, gen: 1 };
    fs.respond(
        target,
        ScrubType::BmapData,
        true,
        Ok(SCRUB_OFLAG_NO_REPAIR_NEEDED),
    );
    let f = Fixture::new(fs, ScrubMode::Repair);

    let mut sri = ScrubItem::inode(128, 1);
    sri.save_state(ScrubType::BmapData, SCRUB_OFLAG_PREEN);
    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();

    assert_eq!(f.totals().preens, 1);
    assert_eq!(f.count_lines("Already optimized."), 1);
    assert_eq!(sri.count_needs_repair(), 0);
}

#[test]
fn unsupported_repair_waits_for_the_final_pass() {
    let fs = MockFs::new(1);
    fs.respond(
        ScrubTarget::Ag(0),
        ScrubType::Rmapbt,
        true,
        Err(KernelError::NotSupported),
    );
    let f = Fixture::new(fs, ScrubMode::Repair);

    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Rmapbt, SCRUB_OFLAG_CORRUPT);
    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();
    assert_eq!(sri.state(ScrubType::Rmapbt), ITEM_CORRUPT);
    assert_eq!(f.totals().corruptions_found, 0);

    repair_item(&f.ctx, &mut sri, RepairFlags::final_warning()).unwrap();
    assert_eq!(sri.state(ScrubType::Rmapbt), 0);
    assert_eq!(f.totals().corruptions_found, 1);
    assert_eq!(f.count_lines("Don't know how to fix"), 1);
}

#[test]
fn unsupported_optimization_is_dropped_quietly() {
    let fs = MockFs::new(1);
    fs.respond(
        ScrubTarget::Ag(0),
        ScrubType::Rmapbt,
        true,
        Err(KernelError::NotSupported),
    );
    let f = Fixture::new(fs, ScrubMode::Repair);

    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Rmapbt, SCRUB_OFLAG_PREEN);
    repair_item(&f.ctx, &mut sri, RepairFlags::final_warning()).unwrap();
    assert_eq!(sri.state(ScrubType::Rmapbt), 0);
    assert!(f.totals().is_clean());
}

#[test]
fn busy_repairs_give_up_after_the_retry_budget() {
    let fs = MockFs::new(1);
    let target = ScrubTarget::Ag(0);
    fs.respond(target, ScrubType::Finobt, true, Err(KernelError::Busy));
    let f = Fixture::new(fs, ScrubMode::Repair);

    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Finobt, SCRUB_OFLAG_CORRUPT);
    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();

    assert_eq!(
        f.fs.nr_calls(target, ScrubType::Finobt, true),
        ITEM_MAX_RETRIES as usize + 1
    );
    assert_eq!(sri.state(ScrubType::Finobt), 0);
    assert_eq!(f.count_lines("Repair unsuccessful; offline repair required."), 1);
}

#[test]
fn read_only_is_fatal() {
    let fs = MockFs::new(1);
    fs.respond(
        ScrubTarget::Fs,
        ScrubType::FsCounters,
        true,
        Err(KernelError::ReadOnly),
    );
    let f = Fixture::new(fs, ScrubMode::Repair);

    let mut sri = ScrubItem::fs();
    sri.save_state(ScrubType::FsCounters, SCRUB_OFLAG_CORRUPT);
    assert!(repair_item(&f.ctx, &mut sri, RepairFlags::default()).is_err());
    assert_eq!(f.totals().runtime_errors, 1);
}

#[test]
fn dependents_wait_for_their_dependencies() {
    let fs = MockFs::new(1);
    let target = ScrubTarget::Inode { ino: 131, gen: 4 };
    fs.respond(target, ScrubType::BmapData, true, Ok(SCRUB_OFLAG_CORRUPT));
    let f = Fixture::new(fs, ScrubMode::Repair);

    let mut sri = ScrubItem::inode(131, 4);
    sri.save_state(ScrubType::BmapData, SCRUB_OFLAG_CORRUPT);
    sri.save_state(ScrubType::Directory, SCRUB_OFLAG_CORRUPT);

    repair_item(&f.ctx, &mut sri, RepairFlags::default()).unwrap();
    assert_eq!(repair_calls(&f), vec![ScrubType::BmapData]);
    assert_eq!(sri.state(ScrubType::Directory), ITEM_CORRUPT);

    // Last chance: everything gets a go regardless.
    f.fs.clear_calls();
    repair_item(&f.ctx, &mut sri, RepairFlags::final_warning()).unwrap();
    assert_eq!(
        repair_calls(&f),
        vec![ScrubType::BmapData, ScrubType::Directory]
    );
    assert_eq!(sri.count_needs_repair(), 0);
    assert_eq!(f.totals().corruptions_found, 1);
    assert_eq!(f.totals().repairs, 1);
}

#[test]
fn corruption_only_pass_leaves_the_rest() {
    let f = Fixture::new(MockFs::new(1), ScrubMode::Repair);
    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Agf, SCRUB_OFLAG_PREEN);
    sri.save_state(ScrubType::Agi, SCRUB_OFLAG_CORRUPT);

    repair_item_corruption(&f.ctx, &mut sri).unwrap();
    assert_eq!(repair_calls(&f), vec![ScrubType::Agi]);
    assert!(sri.preen_only(ScrubType::Agf));
}

//------------------------------------------
