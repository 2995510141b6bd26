use anyhow::Result;
use std::sync::Arc;

use crate::fs::*;
use crate::scrub::context::ScrubContext;
use crate::scrub::Cancelled;
use crate::workqueue::{FirstError, WorkQueue};

//------------------------------------------

/// Number of inode groups fetched per call.
const INUMBERS_BATCH: usize = 64;

pub type InodeFn = dyn Fn(&ScrubContext, &InodeStat) -> Result<()> + Send + Sync;

/// Match bulk-fetched records against the allocation bitmap of their
/// chunk.  Allocated inodes the fetch didn't return get a placeholder so
/// the checks still run against them; records from outside the chunk, or
/// for inodes the bitmap says are free, are dropped.
pub fn reconcile_chunk(group: &InodeGroup, stats: &[InodeStat]) -> Vec<InodeStat> {
    let mut found: Vec<Option<InodeStat>> = vec![None; INODES_PER_CHUNK as usize];
    for stat in stats {
        if stat.ino < group.start_ino || stat.ino >= group.start_ino + INODES_PER_CHUNK {
            continue;
        }
        found[(stat.ino - group.start_ino) as usize] = Some(*stat);
    }

    let mut result = Vec::with_capacity(group.alloc_count() as usize);
    for (i, stat) in found.into_iter().enumerate() {
        if !group.is_allocated(i as u64) {
            continue;
        }
        let ino = group.start_ino + i as u64;
        result.push(stat.unwrap_or_else(|| InodeStat::placeholder(ino)));
    }
    result
}

/// Visit every allocated inode in one AG.
pub fn scan_ag_inodes<F>(ctx: &ScrubContext, agno: u32, mut visit: F) -> Result<()>
where
    F: FnMut(&InodeStat) -> Result<()>,
{
    let mut next = ctx.geo.agino_to_ino(agno, 0);

    loop {
        let groups = ctx.fs.inumbers(agno, next, INUMBERS_BATCH)?;
        if groups.is_empty() {
            break;
        }

        for group in &groups {
            if ctx.is_aborted() {
                return Err(Cancelled.into());
            }

            let stats = ctx.fs.bulkstat(group.start_ino, INODES_PER_CHUNK as usize)?;
            for stat in reconcile_chunk(group, &stats) {
                visit(&stat)?;
            }
        }

        if let Some(last) = groups.last() {
            next = last.start_ino + INODES_PER_CHUNK;
        }
        if ctx.geo.ino_to_agno(next) != agno {
            break;
        }
    }

    Ok(())
}

struct InodeScan {
    ctx: Arc<ScrubContext>,
    visit: Arc<InodeFn>,
    errors: FirstError,
}

/// Visit every allocated inode in the filesystem, one AG per worker.
/// Stops early, returning the first error, if any visit fails.
pub fn scan_all_inodes(ctx: &Arc<ScrubContext>, visit: Arc<InodeFn>) -> Result<()> {
    let scan = Arc::new(InodeScan {
        ctx: ctx.clone(),
        visit,
        errors: FirstError::default(),
    });

    let mut wq = WorkQueue::new("inodes", scan.clone(), ctx.nr_ag_threads());
    for agno in 0..ctx.geo.ag_count {
        wq.add(agno, |scan, agno| {
            if scan.ctx.is_aborted() {
                return;
            }

            let ctx = &scan.ctx;
            if let Err(e) = scan_ag_inodes(ctx, agno, |stat| (scan.visit)(ctx, stat)) {
                ctx.abort();
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

    use crate::fs::mock::MockFs;
    use crate::scrub::context::ScrubMode;
    use crate::scrub::test_utils::Fixture;

    #[test]
    fn missing_records_become_placeholders() {
        let group = InodeGroup {
            start_ino: 128,
            alloc_mask: 0b1011,
        };
        let stats = vec![
            InodeStat {
                ino: 128,
                gen: 3,
                mode: libc::S_IFDIR | 0o755,
                ..Default::default()
            },
            // unallocated according to the bitmap
            InodeStat {
                ino: 130,
                gen: 1,
                ..Default::default()
            },
            // outside the chunk
            InodeStat {
                ino: 300,
                gen: 1,
                ..Default::default()
            },
        ];

        let r = reconcile_chunk(&group, &stats);
        assert_eq!(r.len(), 3);
        assert_eq!(r[0].gen, 3);
        assert_eq!(r[1].ino, 129);
        assert!(r[1].is_placeholder());
        assert_eq!(r[1].gen, 0);
        assert_eq!(r[2].ino, 131);
        assert!(r[2].is_placeholder());
    }

    #[test]
    fn every_inode_is_visited_once() {
        let fs = MockFs::new(3);
        let mut expected = Vec::new();
        for agno in 0..3 {
            for agino in [64, 65, 127, 128, 1000] {
                expected.push(fs.add_file(agno, agino, libc::S_IFREG).ino);
            }
        }
        fs.hide_from_bulkstat(expected[3]);

        let f = Fixture::new(fs, ScrubMode::Repair);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        scan_all_inodes(
            &f.ctx,
            Arc::new(move |_ctx: &ScrubContext, stat: &InodeStat| {
                seen2.lock().unwrap().push(*stat);
                Ok(())
            }),
        )
        .unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|s| s.ino);
        let inos: Vec<u64> = seen.iter().map(|s| s.ino).collect();
        expected.sort();
        assert_eq!(inos, expected);
        assert_eq!(seen.iter().filter(|s| s.is_placeholder()).count(), 1);
    }

    #[test]
    fn visit_errors_stop_the_scan() {
        let fs = MockFs::new(2);
        for agino in 64..80 {
            fs.add_file(0, agino, libc::S_IFREG);
            fs.add_file(1, agino, libc::S_IFREG);
        }

        let f = Fixture::new(fs, ScrubMode::Repair);
        let r = scan_all_inodes(
            &f.ctx,
            Arc::new(|_ctx: &ScrubContext, _stat: &InodeStat| Err(anyhow::anyhow!("boom"))),
        );
        assert!(r.is_err());
        assert!(f.ctx.is_aborted());
    }
}

//------------------------------------------
