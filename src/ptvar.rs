use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

//------------------------------------------

// Threads are mapped onto a fixed set of slots by hashing their id.  Two
// threads may share a slot; the slots are still correct then, merely
// contended.
fn current_slot(nr_slots: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() as usize) % nr_slots
}

//------------------------------------------

#[repr(align(64))]
#[derive(Default)]
struct Slot(AtomicU64);

/// A counter sharded across threads so that hot increments don't
/// bounce one cache line around.  Reading sums all the shards.
pub struct PerThreadCounter {
    slots: Vec<Slot>,
}

impl PerThreadCounter {
    pub fn new(nr_threads: usize) -> Self {
        let nr = std::cmp::max(nr_threads, 1);
        let mut slots = Vec::with_capacity(nr);
        slots.resize_with(nr, Slot::default);
        PerThreadCounter { slots }
    }

    pub fn add(&self, n: u64) {
        let slot = &self.slots[current_slot(self.slots.len())];
        slot.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.slots.iter().map(|s| s.0.load(Ordering::Relaxed)).sum()
    }

    pub fn reset(&self) {
        for s in &self.slots {
            s.0.store(0, Ordering::Relaxed);
        }
    }
}

//------------------------------------------

/// One T per submitting thread.
pub struct PerThread<T> {
    slots: Vec<Mutex<T>>,
}

impl<T: Default> PerThread<T> {
    pub fn new(nr_threads: usize) -> Self {
        let nr = std::cmp::max(nr_threads, 1);
        let mut slots = Vec::with_capacity(nr);
        slots.resize_with(nr, || Mutex::new(T::default()));
        PerThread { slots }
    }
}

impl<T> PerThread<T> {
    pub fn get(&self) -> MutexGuard<'_, T> {
        self.slots[current_slot(self.slots.len())].lock().unwrap()
    }

    pub fn foreach<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&mut T) -> Result<(), E>,
    {
        for s in &self.slots {
            let mut v = s.lock().unwrap();
            f(&mut v)?;
        }
        Ok(())
    }
}

//------------------------------------------


//------------------------------------------
