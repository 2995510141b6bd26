use crate::fs::mock::MockFs;
use crate::phases::phase3::InodeScan;
use crate::phases::Phase;
use crate::scrub::action_list::ActionItem;
use crate::scrub::context::ScrubMode;
use crate::scrub::item::*;
use crate::scrub::test_utils::Fixture;
use crate::scrub::types::*;

//------------------------------------------

fn checks_for(f: &Fixture, ino: u64) -> Vec<ScrubType> {
    f.fs.calls()
        .iter()
        .filter(|c| !c.is_repair())
        .filter(|c| matches!(c.target, ScrubTarget::Inode { ino: i, .. } if i == ino))
        .map(|c| c.scrub_type)
        .collect()
}

#[test]
fn checks_follow_the_file_type() {
    let fs = MockFs::new(1);
    let file = fs.add_file(0, 64, libc::S_IFREG);
    let dir = fs.add_file(0, 65, libc::S_IFDIR);
    let link = fs.add_file(0, 66, libc::S_IFLNK);
    let f = Fixture::new(fs, ScrubMode::Repair);
    InodeScan.run(&f.ctx).unwrap();

    use ScrubType::*;
    assert_eq!(
        checks_for(&f, file.ino),
        vec![Inode, BmapData, BmapAttr, BmapCow, Xattr, Parent]
    );
    assert_eq!(
        checks_for(&f, dir.ino),
        vec![Inode, BmapData, BmapAttr, BmapCow, Directory, Xattr, Parent]
    );
    assert_eq!(
        checks_for(&f, link.ino),
        vec![Inode, BmapData, BmapAttr, BmapCow, Symlink, Xattr, Parent]
    );
    assert_eq!(f.totals().inodes_checked, 3);
}

#[test]
fn placeholders_get_every_content_check() {
    let fs = MockFs::new(1);
    let file = fs.add_file(0, 64, libc::S_IFREG);
    fs.hide_from_bulkstat(file.ino);
    let f = Fixture::new(fs, ScrubMode::Repair);
    InodeScan.run(&f.ctx).unwrap();

    let calls = f.fs.calls();
    assert!(calls
        .iter()
        .all(|c| c.target == ScrubTarget::Inode { ino: file.ino, gen: 0 }));
    let checks = checks_for(&f, file.ino);
    assert!(checks.contains(&ScrubType::Symlink));
    assert!(checks.contains(&ScrubType::Directory));
}

#[test]
fn corruption_is_fixed_during_the_scan() {
    let fs = MockFs::new(2);
    let file = fs.add_file(1, 64, libc::S_IFREG);
    let target = ScrubTarget::Inode {
        ino: file.ino,
        gen: file.gen,
    };
    fs.respond_once(target, ScrubType::BmapData, false, Ok(SCRUB_OFLAG_CORRUPT));
    let f = Fixture::new(fs, ScrubMode::Repair);
    InodeScan.run(&f.ctx).unwrap();

    assert_eq!(f.fs.nr_calls(target, ScrubType::BmapData, true), 1);
    assert_eq!(f.totals().repairs, 1);
    assert_eq!(f.ctx.pending_repairs(), 0);
}

#[test]
fn pending_structural_repairs_defer_file_fixes() {
    let fs = MockFs::new(2);
    let file = fs.add_file(1, 64, libc::S_IFREG);
    let target = ScrubTarget::Inode {
        ino: file.ino,
        gen: file.gen,
    };
    fs.respond_once(target, ScrubType::BmapData, false, Ok(SCRUB_OFLAG_CORRUPT));
    let f = Fixture::new(fs, ScrubMode::Repair);

    let mut sri = ScrubItem::ag(0);
    sri.save_state(ScrubType::Bnobt, SCRUB_OFLAG_CORRUPT);
    f.ctx.ag_repair_lists[0].add(ActionItem::new(sri));

    InodeScan.run(&f.ctx).unwrap();

    assert_eq!(f.fs.nr_calls(target, ScrubType::BmapData, true), 0);
    assert_eq!(f.ctx.file_repair_lists[1].nr_repairs(), 1);
    assert_eq!(f.ctx.file_repair_lists[0].nr_repairs(), 0);
}

#[test]
fn optimizations_wait_for_the_repair_phase() {
    let fs = MockFs::new(1);
    let file = fs.add_file(0, 128, libc::S_IFREG);
    let target = ScrubTarget::Inode {
        ino: file.ino,
        gen: file.gen,
    };
    fs.respond(target, ScrubType::BmapData, false, Ok(SCRUB_OFLAG_PREEN));
    let f = Fixture::new(fs, ScrubMode::Repair);
    InodeScan.run(&f.ctx).unwrap();

    assert_eq!(f.fs.nr_calls(target, ScrubType::BmapData, true), 0);
    let item = f.ctx.file_repair_lists[0].pop().unwrap();
    assert!(item.sri.preen_only(ScrubType::BmapData));
}

#[test]
fn estimate_uses_the_allocated_inode_count() {
    let fs = MockFs::new(1);
    for agino in 64..74 {
        fs.add_file(0, agino, libc::S_IFREG);
    }
    let f = Fixture::new(fs, ScrubMode::DryRun);
    assert_eq!(InodeScan.estimate_work(&f.ctx).unwrap(), 10);
}

//------------------------------------------
