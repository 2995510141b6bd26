use fixedbitset::FixedBitSet;

use crate::scrub::types::*;

//------------------------------------------

// Per-type state bits.  The repair bits deliberately share values with
// the kernel's output flags so they can be copied across directly.
pub const ITEM_CORRUPT: u8 = 1 << 1;
pub const ITEM_PREEN: u8 = 1 << 2;
pub const ITEM_XFAIL: u8 = 1 << 3;
pub const ITEM_XCORRUPT: u8 = 1 << 4;
pub const ITEM_NEEDSCHECK: u8 = 1 << 5;
pub const ITEM_BOOST: u8 = 1 << 7;

pub const ITEM_REPAIR_ANY: u8 = ITEM_CORRUPT | ITEM_PREEN | ITEM_XFAIL | ITEM_XCORRUPT;

pub const ITEM_MAX_RETRIES: u8 = 10;

/// Per-object record of which scrubbers still need to run, what they
/// found, and how many retries each one has left.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrubItem {
    pub target: ScrubTarget,
    state: [u8; NR_SCRUB_TYPES],
    tries: [u8; NR_SCRUB_TYPES],
    selected: FixedBitSet,

    /// Set once any check finds outright corruption; repair of such an
    /// item is followed by a full re-check.
    pub inconsistent: bool,

    /// Set while re-checking after a repair.
    pub revalidate: bool,
}

impl ScrubItem {
    pub fn new(target: ScrubTarget) -> Self {
        ScrubItem {
            target,
            state: [0; NR_SCRUB_TYPES],
            tries: [0; NR_SCRUB_TYPES],
            selected: FixedBitSet::with_capacity(NR_SCRUB_TYPES),
            inconsistent: false,
            revalidate: false,
        }
    }

    pub fn fs() -> Self {
        Self::new(ScrubTarget::Fs)
    }

    pub fn ag(agno: u32) -> Self {
        Self::new(ScrubTarget::Ag(agno))
    }

    pub fn inode(ino: u64, gen: u32) -> Self {
        Self::new(ScrubTarget::Inode { ino, gen })
    }

    pub fn state(&self, t: ScrubType) -> u8 {
        self.state[t.index()]
    }

    pub fn tries(&self, t: ScrubType) -> u8 {
        self.tries[t.index()]
    }

    pub fn schedule(&mut self, t: ScrubType) {
        self.state[t.index()] = ITEM_NEEDSCHECK;
        self.tries[t.index()] = 0;
        self.selected.insert(t.index());
    }

    pub fn schedule_group(&mut self, group: ScrubGroup) {
        for t in ScrubType::in_group(group) {
            self.schedule(t);
        }
    }

    /// Schedule every type that was ever selected for another look.
    pub fn reschedule_selected(&mut self) {
        let selected: Vec<usize> = self.selected.ones().collect();
        for i in selected {
            self.state[i] = ITEM_NEEDSCHECK;
            self.tries[i] = 0;
        }
    }

    pub fn is_selected(&self, t: ScrubType) -> bool {
        self.selected.contains(t.index())
    }

    pub fn clean_state(&mut self, t: ScrubType) {
        self.state[t.index()] = 0;
    }

    pub fn save_state(&mut self, t: ScrubType, oflags: u32) {
        let boost = self.state[t.index()] & ITEM_BOOST;
        let repair = (oflags & 0xff) as u8 & ITEM_REPAIR_ANY;
        self.state[t.index()] = repair | if repair != 0 { boost } else { 0 };
        if repair & (ITEM_CORRUPT | ITEM_XCORRUPT) != 0 {
            self.inconsistent = true;
        }
    }

    pub fn boost(&mut self, t: ScrubType) {
        if self.state[t.index()] & ITEM_REPAIR_ANY != 0 {
            self.state[t.index()] |= ITEM_BOOST;
        }
    }

    pub fn needs_check(&self, t: ScrubType) -> bool {
        self.state(t) & ITEM_NEEDSCHECK != 0
    }

    pub fn needs_repair(&self, t: ScrubType) -> bool {
        self.state(t) & ITEM_REPAIR_ANY != 0
    }

    /// True if the only thing wrong is that the object could be
    /// optimized.
    pub fn preen_only(&self, t: ScrubType) -> bool {
        self.state(t) & ITEM_REPAIR_ANY == ITEM_PREEN
    }

    pub fn types_with(&self, mask: u8) -> impl Iterator<Item = ScrubType> + '_ {
        CHECK_ORDER
            .into_iter()
            .filter(move |t| self.state[t.index()] & mask != 0)
    }

    pub fn count_needs_check(&self) -> usize {
        self.types_with(ITEM_NEEDSCHECK).count()
    }

    pub fn count_needs_repair(&self) -> usize {
        self.types_with(ITEM_REPAIR_ANY).count()
    }

    pub fn reset_tries(&mut self, mask: u8) {
        for i in 0..NR_SCRUB_TYPES {
            if self.state[i] & mask != 0 {
                self.tries[i] = ITEM_MAX_RETRIES;
            }
        }
    }

    /// Consume one retry.  Returns false once the budget is spent.
    pub fn schedule_retry(&mut self, t: ScrubType) -> bool {
        let tries = &mut self.tries[t.index()];
        if *tries == 0 {
            return false;
        }
        *tries -= 1;
        true
    }

    /// Should we call the kernel again for the types selected by mask?
    /// Only if something changed since the snapshot, otherwise we'd spin.
    pub fn call_kernel_again(&self, mask: u8, old: &ScrubItem) -> bool {
        (0..NR_SCRUB_TYPES).any(|i| {
            self.state[i] & mask != 0
                && (self.state[i] != old.state[i] || self.tries[i] != old.tries[i])
        })
    }

    /// Does any dependency of t still need repairs?  Optimizations
    /// don't count.
    pub fn deps_pending(&self, t: ScrubType) -> bool {
        t.deps()
            .iter()
            .any(|d| self.state(*d) & (ITEM_CORRUPT | ITEM_XCORRUPT | ITEM_XFAIL) != 0)
    }

    /// Is a dependency of t so broken that checking t is pointless?
    pub fn deps_corrupt(&self, t: ScrubType) -> bool {
        t.deps()
            .iter()
            .any(|d| self.state(*d) & (ITEM_CORRUPT | ITEM_XCORRUPT) != 0)
    }

    pub fn changed_since(&self, old: &ScrubItem) -> bool {
        self.state != old.state || self.tries != old.tries
    }
}

//------------------------------------------


//------------------------------------------
