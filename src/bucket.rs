use crate::sync::{spin, AtomicU8, AtomicUsize, Ordering, SyncUnsafeCell};
use thiserror::Error;

/// Error kind for indexed store operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The index lies outside `[0, capacity)`. Indices are never clamped.
    #[error("index {index} is out of range for capacity {capacity}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// The store's fixed capacity.
        capacity: usize,
    },
}

const EMPTY: u8 = 0;
const FULL: u8 = 1;
/// Transient guard state, held only for the few instructions needed to move
/// or clone the payload in or out of the cell.
const LOCKED: u8 = 2;

/// One independently synchronized cell of a [`Bucket`].
///
/// The state word is the single source of truth: every operation linearizes
/// at a CAS (or a load) on `state`, and the payload cell is only touched
/// while the state word is held at `LOCKED`.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    state: AtomicU8,
    value: SyncUnsafeCell<Option<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: SyncUnsafeCell::new(None),
        }
    }

    /// Locks the slot whatever its populated state, returning the prior state.
    fn lock_any(&self) -> u8 {
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state != LOCKED
                && self
                    .state
                    .compare_exchange_weak(state, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return state;
            }
            spin();
        }
    }

    /// Locks the slot only if it is occupied. Returns `false` on an observed
    /// `EMPTY`, which is the miss linearization point.
    fn lock_full(&self) -> bool {
        loop {
            match self
                .state
                .compare_exchange_weak(FULL, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(EMPTY) => return false,
                // Either LOCKED or a spurious weak-CAS failure.
                Err(_) => spin(),
            }
        }
    }

    fn unlock(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }

    pub(crate) fn try_get(&self) -> Option<T>
    where
        T: Clone,
    {
        if self.state.load(Ordering::Acquire) == EMPTY {
            return None;
        }
        if !self.lock_full() {
            return None;
        }
        // SAFETY: The state word is LOCKED, so we have exclusive access.
        let value = unsafe { self.value.with_mut(|ptr| (*ptr).clone()) };
        self.unlock(FULL);
        debug_assert!(value.is_some(), "Slot::try_get: occupied slot without payload");
        value
    }

    /// Single-attempt insertion: one `EMPTY -> LOCKED` CAS. A slot observed
    /// occupied, mid-operation, or lost to a concurrent writer rejects the
    /// value without retrying.
    pub(crate) fn insert(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        // SAFETY: The state word is LOCKED, so we have exclusive access.
        unsafe { self.value.with_mut(|ptr| *ptr = Some(value)) };
        self.unlock(FULL);
        Ok(())
    }

    /// Like [`Slot::insert`], but a rejected insert reports the occupant it
    /// lost to instead of handing the value back.
    pub(crate) fn insert_or_previous(&self, value: T) -> Option<T>
    where
        T: Clone,
    {
        loop {
            match self
                .state
                .compare_exchange_weak(EMPTY, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => {
                    // SAFETY: The state word is LOCKED, so we have exclusive access.
                    unsafe { self.value.with_mut(|ptr| *ptr = Some(value)) };
                    self.unlock(FULL);
                    return None;
                }
                Err(FULL) => {
                    if self.lock_full() {
                        // SAFETY: The state word is LOCKED, so we have exclusive access.
                        let previous = unsafe { self.value.with_mut(|ptr| (*ptr).clone()) };
                        self.unlock(FULL);
                        if let Some(previous) = previous {
                            return Some(previous);
                        }
                    }
                    // Emptied between the two attempts; retry the insert.
                }
                Err(_) => spin(),
            }
        }
    }

    /// Unconditional swap. Returns the prior payload, `None` if the slot
    /// was empty.
    pub(crate) fn exchange(&self, value: T) -> Option<T> {
        let prior = self.lock_any();
        // SAFETY: The state word is LOCKED, so we have exclusive access.
        let previous = unsafe { self.value.with_mut(|ptr| (*ptr).replace(value)) };
        self.unlock(FULL);
        debug_assert_eq!(prior == FULL, previous.is_some(), "Slot::exchange");
        previous
    }

    pub(crate) fn remove(&self) -> Option<T> {
        if self.state.load(Ordering::Acquire) == EMPTY {
            return None;
        }
        if !self.lock_full() {
            return None;
        }
        // SAFETY: The state word is LOCKED, so we have exclusive access.
        let value = unsafe { self.value.with_mut(|ptr| (*ptr).take()) };
        self.unlock(EMPTY);
        debug_assert!(value.is_some(), "Slot::remove: occupied slot without payload");
        value
    }
}

/// A fixed-capacity store of independently synchronized slots addressed by
/// integer index.
///
/// Every operation completes via a single atomic compare-and-swap on the
/// addressed slot's state word, or a bounded retry loop over one; there is no
/// store-wide lock, and operations on distinct indices never contend.
/// Capacity is fixed at construction and never changes.
///
/// Values are moved in and out by value; [`Bucket::try_get`] and the lazy
/// [`Bucket::iter`] additionally require `T: Clone` since the slot retains
/// its payload.
#[must_use]
#[derive(Debug)]
pub struct Bucket<T> {
    slots: Box<[Slot<T>]>,
    len: AtomicUsize,
}

impl<T> Bucket<T> {
    /// Creates a store with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            len: AtomicUsize::new(0),
        }
    }

    /// The fixed number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The number of currently occupied slots.
    ///
    /// Under concurrent mutation this is a point-in-time approximation, like
    /// any size read from a lock-free structure.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether no slot is currently occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, index: usize) -> Result<&Slot<T>, StoreError> {
        self.slots.get(index).ok_or(StoreError::IndexOutOfRange {
            index,
            capacity: self.slots.len(),
        })
    }

    /// Reads the value at `index` without mutating the slot.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn try_get(&self, index: usize) -> Result<Option<T>, StoreError>
    where
        T: Clone,
    {
        Ok(self.slot(index)?.try_get())
    }

    /// Inserts `value` at `index` only if the slot is empty at the moment of
    /// a single compare-and-swap.
    ///
    /// Returns `Ok(None)` on success. On failure (the slot is occupied, or
    /// the attempt lost a race with a concurrent writer) the slot is left
    /// unchanged and the rejected value is handed back as `Ok(Some(value))`.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn insert(&self, index: usize, value: T) -> Result<Option<T>, StoreError> {
        match self.slot(index)?.insert(value) {
            Ok(()) => {
                self.len.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(value) => Ok(Some(value)),
        }
    }

    /// Like [`Bucket::insert`], but a failed insert returns the occupant it
    /// lost to (`Ok(Some(previous))`); the rejected `value` is dropped.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn insert_or_previous(&self, index: usize, value: T) -> Result<Option<T>, StoreError>
    where
        T: Clone,
    {
        let previous = self.slot(index)?.insert_or_previous(value);
        if previous.is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        Ok(previous)
    }

    /// Atomically swaps `value` into the slot, returning whatever was there
    /// before (`None` if the slot was empty). Always succeeds.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn exchange(&self, index: usize, value: T) -> Result<Option<T>, StoreError> {
        let previous = self.slot(index)?.exchange(value);
        if previous.is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        Ok(previous)
    }

    /// Unconditionally writes `value` at `index`; reports whether the slot
    /// was previously empty. Any displaced value is dropped.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn set(&self, index: usize, value: T) -> Result<bool, StoreError> {
        Ok(self.exchange(index, value)?.is_none())
    }

    /// Atomically clears the slot if occupied, returning the removed value.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn remove_at(&self, index: usize) -> Result<Option<T>, StoreError> {
        let removed = self.slot(index)?.remove();
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    /// A lazy, single-pass iterator over currently occupied slots.
    ///
    /// Each slot is read at the moment it is visited; the sequence is not a
    /// snapshot and may observe interleaved mutation.
    pub fn iter(&self) -> Iter<'_, T>
    where
        T: Clone,
    {
        Iter {
            bucket: self,
            index: 0,
        }
    }

    /// A snapshot copy of the occupied values, in index order, each slot read
    /// at visit time.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().collect()
    }
}

/// See [`Bucket::iter`].
#[derive(Debug)]
pub struct Iter<'a, T> {
    bucket: &'a Bucket<T>,
    index: usize,
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while let Some(slot) = self.bucket.slots.get(self.index) {
            self.index += 1;
            if let Some(value) = slot.try_get() {
                return Some(value);
            }
        }
        None
    }
}

impl<'a, T: Clone> IntoIterator for &'a Bucket<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
