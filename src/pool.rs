use crate::sync::{Arc, AtomicUsize, Mutex, Ordering};
use derive_more::Debug;

/// Object that can be reset to a blank state and handed out again.
pub(crate) trait Recycle: Default {
    /// Drop every reference the object holds while keeping its allocations.
    fn recycle(&mut self);
}

/// Fixed-block allocator that recycles engine nodes instead of returning
/// them to the global allocator.
///
/// Recycled objects keep their inner allocations (e.g. `Vec` capacity), so a
/// warmed-up pool serves submissions without allocating.
#[derive(Debug)]
pub(crate) struct ObjectPool<T> {
    #[debug(skip)]
    spare: Mutex<Vec<Arc<T>>>,
    capacity: usize,
    live: AtomicUsize,
}

impl<T: Recycle> ObjectPool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            spare: Mutex::new(Vec::new()),
            capacity,
            live: AtomicUsize::new(0),
        }
    }

    /// Take a blank object, reusing a recycled one if available, and
    /// initialize it while it is still uniquely owned.
    pub(crate) fn acquire(&self, init: impl FnOnce(&mut T)) -> Arc<T> {
        let spare = self.spare.lock().expect("ObjectPool::acquire: [1]").pop();
        let mut obj = spare.unwrap_or_default();
        init(Arc::get_mut(&mut obj).expect("ObjectPool::acquire: [2]"));
        self.live.fetch_add(1, Ordering::Relaxed);
        obj
    }

    /// Give an object back. It is only kept for reuse if nothing else
    /// references it anymore and the pool isn't full.
    pub(crate) fn release(&self, mut obj: Arc<T>) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        let Some(inner) = Arc::get_mut(&mut obj) else {
            return;
        };
        inner.recycle();
        let mut spare = self.spare.lock().expect("ObjectPool::release: [1]");
        if spare.len() < self.capacity {
            spare.push(obj);
        }
    }

    /// Number of objects handed out and not yet released.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn spare(&self) -> usize {
        self.spare.lock().expect("ObjectPool::spare: [1]").len()
    }
}

/// Index-stable key into a [`HandleTable`].
///
/// The generation is bumped every time a slot is vacated, so a key that
/// outlived its object never resolves again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Slab of live objects addressed by [`Key`]s handed out to clients.
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    #[debug(skip)]
    slots: Mutex<Slots<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }
}

impl<T> HandleTable<T> {
    pub(crate) fn insert(&self, value: Arc<T>) -> Key {
        let mut slots = self.slots.lock().expect("HandleTable::insert: [1]");
        if let Some(index) = slots.free.pop() {
            let slot = &mut slots.entries[index as usize];
            debug_assert!(slot.value.is_none(), "HandleTable::insert: [2]");
            slot.value = Some(value);
            return Key::new(index, slot.generation);
        }
        let index = slots
            .entries
            .len()
            .try_into()
            .expect("HandleTable::insert: [3]");
        slots.entries.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Key::new(index, 0)
    }

    pub(crate) fn get(&self, key: Key) -> Option<Arc<T>> {
        let slots = self.slots.lock().expect("HandleTable::get: [1]");
        slots
            .entries
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.clone())
    }

    pub(crate) fn remove(&self, key: Key) -> Option<Arc<T>> {
        let mut slots = self.slots.lock().expect("HandleTable::remove: [1]");
        let slot = slots
            .entries
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(key.index);
        Some(value)
    }
}
