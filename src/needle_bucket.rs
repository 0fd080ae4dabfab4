use crate::{
    bucket::{Bucket, StoreError},
    needle::{NeedleRef, Reservoir},
};
use derive_more::Debug;
use std::sync::Arc;

type Factory<T> = Box<dyn Fn(usize) -> T + Send + Sync>;

/// A fixed-capacity store with per-index lazy initialization and recycled
/// value wrappers.
///
/// Composes a [`Bucket`] of [`NeedleRef`]s, a [`Reservoir`] that recycles the
/// wrapper allocations, and a per-index value factory. [`NeedleBucket::get`]
/// provides get-or-create-once semantics: under contention the factory may
/// run more than once, but exactly one produced value is ever observably
/// stored per index; losers hand their freshly built needle back to the
/// reservoir and return the winner's value.
#[must_use]
#[derive(Debug)]
pub struct NeedleBucket<T> {
    entries: Bucket<NeedleRef<T>>,
    reservoir: Arc<Reservoir<T>>,
    #[debug(skip)]
    factory: Factory<T>,
}

impl<T> NeedleBucket<T> {
    /// A store of `capacity` slots lazily initialized by `factory(index)`,
    /// backed by a private reservoir.
    pub fn new(factory: impl Fn(usize) -> T + Send + Sync + 'static, capacity: usize) -> Self {
        Self::with_reservoir(factory, capacity, Arc::new(Reservoir::new()))
    }

    /// Like [`NeedleBucket::new`] with an index-blind factory.
    pub fn from_fn(factory: impl Fn() -> T + Send + Sync + 'static, capacity: usize) -> Self {
        Self::new(move |_| factory(), capacity)
    }

    /// A store sharing `reservoir` with other stores of the same value type,
    /// so displaced wrappers from one can satisfy acquisitions in another.
    pub fn with_reservoir(
        factory: impl Fn(usize) -> T + Send + Sync + 'static,
        capacity: usize,
        reservoir: Arc<Reservoir<T>>,
    ) -> Self {
        Self {
            entries: Bucket::new(capacity),
            reservoir,
            factory: Box::new(factory),
        }
    }

    /// The fixed number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// The number of currently occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no slot is currently occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The reservoir backing this store.
    #[must_use]
    pub fn reservoir(&self) -> &Arc<Reservoir<T>> {
        &self.reservoir
    }

    /// Returns the value at `index`, creating it via the factory if the slot
    /// is empty.
    ///
    /// An occupied slot is read absent-safely: a needle whose weak payload
    /// has died yields `Ok(None)` without re-running the factory. An empty
    /// slot runs the factory, wraps the result and races a single-attempt
    /// insert; if the insert loses, the just-built needle is released back to
    /// the reservoir and the winner's value is returned.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn get(&self, index: usize) -> Result<Option<Arc<T>>, StoreError> {
        if let Some(needle) = self.entries.try_get(index)? {
            return Ok(needle.try_get());
        }
        let needle = self.reservoir.acquire((self.factory)(index));
        match self.entries.insert_or_previous(index, Arc::clone(&needle))? {
            None => Ok(needle.try_get()),
            Some(winner) => {
                self.reservoir.release(needle);
                Ok(winner.try_get())
            }
        }
    }

    /// Returns the wrapper at `index`, creating and installing one if the
    /// slot is empty, for callers needing wrapper identity or weak-reference
    /// semantics rather than a value.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn get_needle(&self, index: usize) -> Result<NeedleRef<T>, StoreError> {
        if let Some(needle) = self.entries.try_get(index)? {
            return Ok(needle);
        }
        let needle = self.reservoir.acquire((self.factory)(index));
        match self.entries.insert_or_previous(index, Arc::clone(&needle))? {
            None => Ok(needle),
            Some(winner) => {
                self.reservoir.release(needle);
                Ok(winner)
            }
        }
    }

    /// Reads the value at `index` without ever invoking the factory.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn try_get(&self, index: usize) -> Result<Option<Arc<T>>, StoreError> {
        Ok(self.entries.try_get(index)?.and_then(|needle| needle.try_get()))
    }

    /// Inserts `value` only if the slot is empty at the moment of a single
    /// compare-and-swap; `Ok(false)` leaves the slot unchanged and recycles
    /// the rejected wrapper.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn insert(&self, index: usize, value: T) -> Result<bool, StoreError> {
        let needle = self.reservoir.acquire(value);
        match self.entries.insert(index, needle)? {
            None => Ok(true),
            Some(rejected) => {
                self.reservoir.release(rejected);
                Ok(false)
            }
        }
    }

    /// Atomically swaps `value` in, returning the displaced value (if any)
    /// and recycling the displaced wrapper.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn exchange(&self, index: usize, value: T) -> Result<Option<Arc<T>>, StoreError> {
        let needle = self.reservoir.acquire(value);
        match self.entries.exchange(index, needle)? {
            None => Ok(None),
            Some(displaced) => {
                let previous = displaced.try_get();
                self.reservoir.release(displaced);
                Ok(previous)
            }
        }
    }

    /// Unconditionally writes `value`; reports whether the slot was
    /// previously empty. The displaced wrapper, if any, is recycled.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn set(&self, index: usize, value: T) -> Result<bool, StoreError> {
        Ok(self.exchange(index, value)?.is_none())
    }

    /// Atomically clears the slot if occupied, returning the removed value
    /// and recycling its wrapper.
    ///
    /// # Errors
    /// If `index` is out of range.
    pub fn remove_at(&self, index: usize) -> Result<Option<Arc<T>>, StoreError> {
        match self.entries.remove_at(index)? {
            None => Ok(None),
            Some(removed) => {
                let previous = removed.try_get();
                self.reservoir.release(removed);
                Ok(previous)
            }
        }
    }

    /// A lazy, single-pass iterator over the live values of currently
    /// occupied slots; dead weak payloads are skipped. Each slot is read at
    /// visit time, with no snapshot isolation.
    pub fn iter(&self) -> impl Iterator<Item = Arc<T>> + '_ {
        self.entries.iter().filter_map(|needle| needle.try_get())
    }

    /// A snapshot copy of the live values, in index order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.iter().collect()
    }
}
