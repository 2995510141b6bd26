use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crate::bitmap::{BadExtentTracker, BadExtents};
use crate::fs::*;
use crate::inodes::scan_all_inodes;
use crate::phases::{Phase, PhaseId};
use crate::read_verify::{IoErrorFn, ReadVerifyPool};
use crate::scrub::context::ScrubContext;
use crate::scrub::types::ScrubTarget;
use crate::spacemap::{scan_fs_space, RegionDoneFn, SpaceRegion};


//------------------------------------------

pub struct DataVerification;

fn dev_name(dev: DeviceId) -> &'static str {
    match dev {
        DeviceId::Data => "data",
        DeviceId::Log => "log",
        DeviceId::Realtime => "realtime",
    }
}

// Only file data gets read.  The kernel checks metadata itself, and
// unwritten extents have nothing on disk to read.
fn wants_verify(rec: &FsmapRecord) -> bool {
    !rec.is_special() && rec.flags & (FMR_OF_PREALLOC | FMR_OF_EXTENT_MAP) == 0
}

struct DeviceVerify {
    dev: DeviceId,
    pool: ReadVerifyPool<DeviceId>,
    bad: Arc<BadExtentTracker>,
}

fn mk_device_verify(ctx: &ScrubContext, dev: DeviceId) -> Result<Option<DeviceVerify>> {
    let disk = match ctx.fs.disk(dev) {
        Some(disk) => disk,
        None => return Ok(None),
    };

    let nr_verifiers = if ctx.opts.background > 0 {
        1
    } else {
        ctx.nr_threads() * std::cmp::max(disk.heads(), 1)
    };

    let bad = Arc::new(BadExtentTracker::new());
    let tracker = bad.clone();
    let ioerr: IoErrorFn<DeviceId> = Arc::new(move |start, len, _e, _dev| {
        tracker.add(start, len);
    });

    let pool = ReadVerifyPool::new(
        disk,
        ctx.opts.read_verify,
        nr_verifiers,
        ctx.nr_threads(),
        ioerr,
        Some(ctx.progress.clone()),
    )?;

    Ok(Some(DeviceVerify { dev, pool, bad }))
}

fn verify_devices(ctx: &Arc<ScrubContext>) -> Result<Vec<(DeviceId, BadExtents)>> {
    let mut devs = vec![DeviceId::Data];
    if ctx.geo.has_realtime() {
        devs.push(DeviceId::Realtime);
    }

    let mut verifiers = Vec::new();
    for dev in devs {
        if let Some(dv) = mk_device_verify(ctx, dev)? {
            verifiers.push(dv);
        }
    }
    let verifiers = Arc::new(verifiers);

    let forced = verifiers.clone();
    let region_done: Arc<RegionDoneFn> =
        Arc::new(move |_ctx: &ScrubContext, _region: &SpaceRegion| -> Result<()> {
            // This thread's staged ranges won't grow any further.
            for dv in forced.iter() {
                dv.pool.force_io()?;
            }
            Ok(())
        });

    let vs = verifiers.clone();
    scan_fs_space(
        ctx,
        Arc::new(move |_ctx: &ScrubContext, rec: &FsmapRecord| {
            if !wants_verify(rec) {
                return Ok(());
            }
            match vs.iter().find(|dv| dv.dev == rec.device) {
                Some(dv) => dv.pool.schedule(rec.physical, rec.length, rec.device),
                None => Ok(()),
            }
        }),
        Some(region_done),
    )?;

    let verifiers = Arc::try_unwrap(verifiers)
        .map_err(|_| anyhow!("media verification is still in progress"))?;

    let mut results = Vec::new();
    for mut dv in verifiers {
        dv.pool.flush()?;
        let n = dv.pool.bytes_verified();
        ctx.update_totals(|t| t.bytes_verified += n);

        // Dropping the pool drops its error callback, and with it the
        // last other reference to the tracker.
        let DeviceVerify { dev, pool, bad } = dv;
        drop(pool);
        let bad = Arc::try_unwrap(bad)
            .map_err(|_| anyhow!("bad extent tracker is still in use"))?
            .finish();
        results.push((dev, bad));
    }

    Ok(results)
}

//------------------------------------------

/// Who owns a piece of a bad range.
#[derive(Clone, Debug, PartialEq, Eq)]
enum BadOwner {
    Special(SpecialOwner),
    File { ino: u64, offset: u64, attr: bool },
}

struct BadRange {
    dev: DeviceId,
    range: Range<u64>,
    owners: Vec<BadOwner>,
}

// Fast path: the space map tells us who owns each bad range.
fn find_owners(ctx: &ScrubContext, dev: DeviceId, bad: &BadExtents) -> Result<Vec<BadRange>> {
    let mut results = Vec::new();

    for range in bad.iter() {
        let mut owners = Vec::new();
        ctx.fs
            .getfsmap(dev, range.clone(), &mut |rec: &FsmapRecord| {
                let owner = match rec.owner {
                    FsmapOwner::Special(SpecialOwner::Free) => return Ok(()),
                    FsmapOwner::Special(s) => BadOwner::Special(s),
                    FsmapOwner::Inode(ino) => {
                        let clip_start = std::cmp::max(rec.physical, range.start);
                        BadOwner::File {
                            ino,
                            offset: rec.offset + (clip_start - rec.physical),
                            attr: rec.flags & FMR_OF_ATTR_FORK != 0,
                        }
                    }
                };
                owners.push(owner);
                Ok(())
            })?;

        results.push(BadRange {
            dev,
            range: range.clone(),
            owners,
        });
    }

    Ok(results)
}

// Slow path: name the files that own bad ranges.  Walking the tree finds
// the linked ones, an inode scan finds anything open but unlinked.
fn find_file_names(
    ctx: &Arc<ScrubContext>,
    inos: &BTreeSet<u64>,
) -> Result<BTreeMap<u64, String>> {
    let mut names = BTreeMap::new();
    if inos.is_empty() {
        return Ok(names);
    }

    ctx.fs.walk_tree(&mut |path: &std::path::Path, ino: u64| {
        if inos.contains(&ino) {
            names.entry(ino).or_insert_with(|| path.display().to_string());
        }
        Ok(())
    })?;

    let unnamed: BTreeSet<u64> = inos
        .iter()
        .filter(|ino| !names.contains_key(*ino))
        .copied()
        .collect();
    if unnamed.is_empty() {
        return Ok(names);
    }

    let found: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let f = found.clone();
    scan_all_inodes(
        ctx,
        Arc::new(move |_ctx: &ScrubContext, stat: &InodeStat| {
            if unnamed.contains(&stat.ino) {
                f.lock().unwrap().push(stat.ino);
            }
            Ok(())
        }),
    )?;

    for ino in found.lock().unwrap().iter() {
        let descr = ctx.describe_target(&ScrubTarget::Inode { ino: *ino, gen: 0 });
        names.insert(*ino, format!("{} (unlinked)", descr));
    }

    Ok(names)
}

fn describe_owner(ctx: &ScrubContext, names: &BTreeMap<u64, String>, owner: &BadOwner) -> String {
    match owner {
        BadOwner::Special(s) => s.descr().to_string(),
        BadOwner::File { ino, offset, attr } => {
            let name = names
                .get(ino)
                .cloned()
                .unwrap_or_else(|| ctx.describe_target(&ScrubTarget::Inode { ino: *ino, gen: 0 }));
            let fork = if *attr { "attr" } else { "data" };
            format!("{} {} offset {}", name, fork, offset)
        }
    }
}

fn report_bad_ranges(ctx: &Arc<ScrubContext>, results: &[(DeviceId, BadExtents)]) -> Result<()> {
    let mut ranges = Vec::new();
    for (dev, bad) in results {
        if !bad.is_empty() {
            ranges.extend(find_owners(ctx, *dev, bad)?);
        }
    }
    if ranges.is_empty() {
        return Ok(());
    }

    let inos: BTreeSet<u64> = ranges
        .iter()
        .flat_map(|r| r.owners.iter())
        .filter_map(|o| match o {
            BadOwner::File { ino, .. } => Some(*ino),
            _ => None,
        })
        .collect();
    let names = find_file_names(ctx, &inos)?;

    for r in &ranges {
        let descr = format!(
            "{} device offset {} length {}",
            dev_name(r.dev),
            r.range.start,
            r.range.end - r.range.start
        );

        let owners: Vec<String> = r
            .owners
            .iter()
            .map(|o| describe_owner(ctx, &names, o))
            .collect();
        let msg = if owners.is_empty() {
            "media error in unowned space.".to_string()
        } else {
            format!("media error in {}.", owners.join(", "))
        };
        ctx.str_unfixable(&descr, &msg);
    }

    Ok(())
}

//------------------------------------------

impl Phase for DataVerification {
    fn id(&self) -> PhaseId {
        PhaseId::DataVerification
    }

    fn is_enabled(&self, ctx: &ScrubContext) -> bool {
        ctx.opts.verify_data
    }

    fn estimate_work(&self, ctx: &ScrubContext) -> Result<u64> {
        let geo = &ctx.geo;
        let counts = ctx.fs.counts()?;
        let data = geo.data_blocks.saturating_sub(counts.free_blocks) * geo.block_size as u64;
        let rt = geo
            .rt_blocks
            .saturating_sub(counts.free_rt_extents * geo.rt_extent_size as u64)
            * geo.block_size as u64;
        Ok(data + rt)
    }

    fn run(&self, ctx: &Arc<ScrubContext>) -> Result<()> {
        let results = verify_devices(ctx)?;
        report_bad_ranges(ctx, &results)
    }
}

//------------------------------------------
