use anyhow::Result;
use std::ops::Range;
use std::sync::Arc;

use crate::fs::*;
use crate::scrub::context::ScrubContext;
use crate::scrub::Cancelled;
use crate::workqueue::{FirstError, WorkQueue};

//------------------------------------------

pub type SpaceFn = dyn Fn(&ScrubContext, &FsmapRecord) -> Result<()> + Send + Sync;

/// Called on the scanning thread once a region's records are exhausted.
pub type RegionDoneFn = dyn Fn(&ScrubContext, &SpaceRegion) -> Result<()> + Send + Sync;

/// A unit of space map scanning: one AG of the data device, or the
/// whole of an external device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpaceRegion {
    pub dev: DeviceId,
    pub range: Range<u64>,
}

pub fn space_regions(ctx: &ScrubContext) -> Vec<SpaceRegion> {
    let geo = &ctx.geo;
    let mut regions: Vec<SpaceRegion> = (0..geo.ag_count)
        .map(|agno| SpaceRegion {
            dev: DeviceId::Data,
            range: geo.ag_range(agno),
        })
        .collect();

    if geo.has_realtime() {
        regions.push(SpaceRegion {
            dev: DeviceId::Realtime,
            range: 0..geo.rt_blocks * geo.block_size as u64,
        });
    }

    if geo.external_log {
        regions.push(SpaceRegion {
            dev: DeviceId::Log,
            range: 0..geo.log_blocks as u64 * geo.block_size as u64,
        });
    }

    regions
}

struct SpaceScan {
    ctx: Arc<ScrubContext>,
    visit: Arc<SpaceFn>,
    region_done: Option<Arc<RegionDoneFn>>,
    errors: FirstError,
}

fn scan_region(scan: &SpaceScan, region: &SpaceRegion) -> Result<()> {
    let ctx = &scan.ctx;
    ctx.fs.getfsmap(region.dev, region.range.clone(), &mut |rec: &FsmapRecord| {
        if ctx.is_aborted() {
            return Err(Cancelled.into());
        }
        (scan.visit)(ctx, rec)
    })?;

    match &scan.region_done {
        Some(done) => done(ctx, region),
        None => Ok(()),
    }
}

/// Visit every space map record of every device, one region per worker.
/// `region_done`, if given, is called as each region finishes.
pub fn scan_fs_space(
    ctx: &Arc<ScrubContext>,
    visit: Arc<SpaceFn>,
    region_done: Option<Arc<RegionDoneFn>>,
) -> Result<()> {
    let scan = Arc::new(SpaceScan {
        ctx: ctx.clone(),
        visit,
        region_done,
        errors: FirstError::default(),
    });

    let regions = space_regions(ctx);
    let nr_workers = std::cmp::min(ctx.nr_threads(), regions.len());
    let mut wq = WorkQueue::new("spacemap", scan.clone(), nr_workers);
    for (i, region) in regions.into_iter().enumerate() {
        wq.add(i as u32, move |scan, _| {
            if scan.ctx.is_aborted() {
                return;
            }

            if let Err(e) = scan_region(scan, &region) {
                scan.ctx.abort();
                scan.errors.set(e);
            }
        })?;
    }
    wq.terminate()?;

    scan.errors.take()
}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::fs::mock::*;
    use crate::scrub::context::ScrubMode;
    use crate::scrub::test_utils::Fixture;

    fn file_extent(dev: DeviceId, physical: u64, length: u64, ino: u64) -> FsmapRecord {
        FsmapRecord {
            device: dev,
            physical,
            length,
            owner: FsmapOwner::Inode(ino),
            offset: 0,
            flags: 0,
        }
    }

    #[test]
    fn regions_cover_each_device() {
        let f = Fixture::new(MockFs::new(4).with_realtime(1000), ScrubMode::Repair);
        let regions = space_regions(&f.ctx);
        assert_eq!(regions.len(), 5);
        assert_eq!(regions[1].range, f.ctx.geo.ag_range(1));
        assert_eq!(regions[4].dev, DeviceId::Realtime);
        assert_eq!(regions[4].range, 0..1000 * MOCK_BLOCK_SIZE as u64);
    }

    #[test]
    fn each_region_is_finished_on_its_scanning_thread() {
        let fs = MockFs::new(3);
        fs.add_fsmap(file_extent(DeviceId::Data, 4096, 8192, 131));

        let f = Fixture::new(fs, ScrubMode::Repair);
        let visits = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Mutex::new(Vec::new()));
        let v = visits.clone();
        let d = done.clone();
        let region_done: Arc<RegionDoneFn> =
            Arc::new(move |_ctx: &ScrubContext, region: &SpaceRegion| -> Result<()> {
                d.lock().unwrap().push((region.clone(), std::thread::current().id()));
                Ok(())
            });
        scan_fs_space(
            &f.ctx,
            Arc::new(move |_ctx: &ScrubContext, rec: &FsmapRecord| {
                v.lock().unwrap().push((rec.physical, std::thread::current().id()));
                Ok(())
            }),
            Some(region_done),
        )
        .unwrap();

        let done = done.lock().unwrap();
        let mut ranges: Vec<Range<u64>> = done.iter().map(|(r, _)| r.range.clone()).collect();
        ranges.sort_by_key(|r| r.start);
        let expected: Vec<Range<u64>> = (0..3).map(|agno| f.ctx.geo.ag_range(agno)).collect();
        assert_eq!(ranges, expected);

        let (_, visit_thread) = visits.lock().unwrap()[0];
        let (_, done_thread) = done
            .iter()
            .find(|(r, _)| r.range.contains(&4096))
            .unwrap();
        assert_eq!(visit_thread, *done_thread);
    }

    #[test]
    fn every_record_is_visited() {
        let fs = MockFs::new(2).with_realtime(1000);
        let ag_bytes = MOCK_AG_BLOCKS as u64 * MOCK_BLOCK_SIZE as u64;
        fs.add_fsmap(file_extent(DeviceId::Data, 4096, 8192, 131));
        fs.add_fsmap(file_extent(DeviceId::Data, ag_bytes + 4096, 4096, 132));
        fs.add_fsmap(file_extent(DeviceId::Realtime, 0, 65536, 133));

        let f = Fixture::new(fs, ScrubMode::Repair);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        scan_fs_space(
            &f.ctx,
            Arc::new(move |_ctx: &ScrubContext, rec: &FsmapRecord| {
                seen2.lock().unwrap().push(*rec);
                Ok(())
            }),
            None,
        )
        .unwrap();

        let mut owners: Vec<FsmapOwner> = seen.lock().unwrap().iter().map(|r| r.owner).collect();
        owners.sort_by_key(|o| match o {
            FsmapOwner::Inode(ino) => *ino,
            FsmapOwner::Special(_) => 0,
        });
        assert_eq!(
            owners,
            vec![
                FsmapOwner::Inode(131),
                FsmapOwner::Inode(132),
                FsmapOwner::Inode(133)
            ]
        );
    }
}

//------------------------------------------
