use rangemap::RangeSet;
use std::ops::Range;
use std::sync::Mutex;

//------------------------------------------

/// Collects unreadable byte ranges while verifiers are running.
#[derive(Default)]
pub struct BadExtentTracker {
    ranges: Mutex<RangeSet<u64>>,
}

impl BadExtentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, start: u64, len: u64) {
        if len == 0 {
            return;
        }
        let mut ranges = self.ranges.lock().unwrap();
        ranges.insert(start..start + len);
    }

    /// Stop collecting.  Only the finished set can be queried.
    pub fn finish(self) -> BadExtents {
        BadExtents {
            ranges: self.ranges.into_inner().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

/// The final, read-only set of bad ranges for one device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BadExtents {
    ranges: RangeSet<u64>,
}

impl BadExtents {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<u64>> {
        self.ranges.iter()
    }

    pub fn overlaps(&self, r: &Range<u64>) -> bool {
        self.ranges.overlaps(r)
    }

    /// The bad ranges that intersect r, clipped to it.
    pub fn within(&self, r: &Range<u64>) -> Vec<Range<u64>> {
        self.ranges
            .overlapping(r)
            .map(|b| std::cmp::max(b.start, r.start)..std::cmp::min(b.end, r.end))
            .collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn len(&self) -> usize {
        self.ranges.iter().count()
    }
}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_ranges_merge() {
        let t = BadExtentTracker::new();
        t.add(4096, 4096);
        t.add(8192, 4096);
        t.add(65536, 512);
        t.add(0, 0);
        let bad = t.finish();
        assert_eq!(bad.len(), 2);
        assert_eq!(bad.total_bytes(), 8192 + 512);
        assert!(bad.overlaps(&(10000..10001)));
        assert!(!bad.overlaps(&(12288..65536)));
    }

    #[test]
    fn clipping() {
        let t = BadExtentTracker::new();
        t.add(100, 100);
        let bad = t.finish();
        assert_eq!(bad.within(&(150..1000)), vec![150..200]);
        assert!(bad.within(&(200..300)).is_empty());
    }

    // Compare against a byte-per-bit model of the disk.
    #[quickcheck]
    fn tracker_matches_bitset(adds: Vec<(u16, u8)>) -> bool {
        let t = BadExtentTracker::new();
        let mut model = fixedbitset::FixedBitSet::with_capacity(1 << 17);
        for (start, len) in &adds {
            t.add(*start as u64, *len as u64);
            model.insert_range(*start as usize..*start as usize + *len as usize);
        }
        let bad = t.finish();

        let disjoint = bad.iter().zip(bad.iter().skip(1)).all(|(a, b)| a.end < b.start);
        disjoint
            && bad.total_bytes() == model.count_ones(..) as u64
            && bad
                .iter()
                .all(|r| model.count_ones(r.start as usize..r.end as usize) as u64 == r.end - r.start)
    }
}

//------------------------------------------
