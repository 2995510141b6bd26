use std::collections::VecDeque;
use std::sync::Mutex;

use crate::scrub::item::ScrubItem;

//------------------------------------------

/// A deferred repair: an owned snapshot of an item that still has
/// problems.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionItem {
    pub sri: ScrubItem,
}

impl ActionItem {
    pub fn new(sri: ScrubItem) -> Self {
        ActionItem { sri }
    }

    pub fn nr_repairs(&self) -> u64 {
        self.sri.count_needs_repair() as u64
    }
}

#[derive(Default)]
struct ListInner {
    items: VecDeque<ActionItem>,
    nr_repairs: u64,
}

/// Mutex-protected FIFO of deferred repairs.  Besides the items it keeps
/// a count of outstanding repair instances, which is what the repair
/// phase uses as its work estimate.
#[derive(Default)]
pub struct ActionList {
    inner: Mutex<ListInner>,
}

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, item: ActionItem) {
        let mut inner = self.inner.lock().unwrap();
        inner.nr_repairs += item.nr_repairs();
        inner.items.push_back(item);
    }

    pub fn pop(&self) -> Option<ActionItem> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner.items.pop_front()?;
        inner.nr_repairs -= item.nr_repairs();
        Some(item)
    }

    /// Move everything from src onto the end of this list.
    pub fn merge(&self, src: &ActionList) {
        if std::ptr::eq(self, src) {
            return;
        }

        let (items, nr) = {
            let mut s = src.inner.lock().unwrap();
            let nr = s.nr_repairs;
            s.nr_repairs = 0;
            (std::mem::take(&mut s.items), nr)
        };

        let mut inner = self.inner.lock().unwrap();
        inner.items.extend(items);
        inner.nr_repairs += nr;
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn nr_repairs(&self) -> u64 {
        self.inner.lock().unwrap().nr_repairs
    }
}

/// Queue an item for the repair phase if anything is still wrong with
/// it.
pub fn defer_repair(list: &ActionList, sri: ScrubItem) {
    if sri.count_needs_repair() == 0 {
        return;
    }
    list.add(ActionItem::new(sri));
}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrub::types::*;

    fn broken_ag(agno: u32, nr: usize) -> ScrubItem {
        let mut sri = ScrubItem::ag(agno);
        for t in ScrubType::in_group(ScrubGroup::PerAg).take(nr) {
            sri.save_state(t, SCRUB_OFLAG_CORRUPT);
        }
        sri
    }

    #[test]
    fn clean_items_are_not_deferred() {
        let list = ActionList::new();
        defer_repair(&list, ScrubItem::ag(0));
        assert!(list.is_empty());
    }

    #[test]
    fn counts_repair_instances() {
        let list = ActionList::new();
        defer_repair(&list, broken_ag(0, 2));
        defer_repair(&list, broken_ag(1, 3));
        assert_eq!(list.len(), 2);
        assert_eq!(list.nr_repairs(), 5);

        let first = list.pop().unwrap();
        assert_eq!(first.sri.target, ScrubTarget::Ag(0));
        assert_eq!(list.nr_repairs(), 3);
    }

    #[test]
    fn merge_moves_everything() {
        let a = ActionList::new();
        let b = ActionList::new();
        defer_repair(&a, broken_ag(0, 1));
        defer_repair(&b, broken_ag(1, 1));
        defer_repair(&b, broken_ag(2, 2));

        a.merge(&b);
        assert!(b.is_empty());
        assert_eq!(b.nr_repairs(), 0);
        assert_eq!(a.len(), 3);
        assert_eq!(a.nr_repairs(), 4);

        a.merge(&a);
        assert_eq!(a.len(), 3);
    }
}

//------------------------------------------
