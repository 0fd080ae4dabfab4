use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// What a [`Needle`] currently holds.
#[derive(Debug, Default)]
pub enum Payload<T> {
    /// Nothing; the needle is blank (freshly recycled or explicitly cleared).
    #[default]
    Empty,
    /// A value kept alive by the needle itself.
    Strong(Arc<T>),
    /// A value the needle observes but does not keep alive.
    Weak(Weak<T>),
}

/// A recyclable wrapper around a value that may be absent.
///
/// Needles are shared by reference ([`NeedleRef`]) so a store and its callers
/// can observe the same wrapper identity. The payload may be held strongly or
/// weakly; reads are absent-safe in both cases.
#[derive(Debug)]
pub struct Needle<T> {
    payload: Mutex<Payload<T>>,
}

/// Shared handle to a [`Needle`]. This is what stores hold and what the
/// [`Reservoir`] recycles.
pub type NeedleRef<T> = Arc<Needle<T>>;

impl<T> Needle<T> {
    /// A needle strongly holding `value`.
    pub fn strong(value: T) -> Self {
        Self {
            payload: Mutex::new(Payload::Strong(Arc::new(value))),
        }
    }

    /// A blank needle.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            payload: Mutex::new(Payload::Empty),
        }
    }

    /// Reads the current value, if any. A dead weak payload reads as absent.
    #[must_use]
    pub fn try_get(&self) -> Option<Arc<T>> {
        match &*self.payload.lock() {
            Payload::Empty => None,
            Payload::Strong(value) => Some(Arc::clone(value)),
            Payload::Weak(weak) => weak.upgrade(),
        }
    }

    /// Whether a read would currently produce a value.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        match &*self.payload.lock() {
            Payload::Empty => false,
            Payload::Strong(_) => true,
            Payload::Weak(weak) => weak.strong_count() > 0,
        }
    }

    /// Replaces the payload with a strongly held `value`.
    pub fn put(&self, value: T) {
        *self.payload.lock() = Payload::Strong(Arc::new(value));
    }

    /// Replaces the payload with a strong reference to an existing allocation.
    pub fn put_shared(&self, value: Arc<T>) {
        *self.payload.lock() = Payload::Strong(value);
    }

    /// Downgrades a strong payload to a weak one; the needle stops keeping
    /// the value alive. Empty and weak payloads are left as they are.
    pub fn demote(&self) {
        let mut payload = self.payload.lock();
        if let Payload::Strong(value) = &*payload {
            *payload = Payload::Weak(Arc::downgrade(value));
        }
    }

    /// Blanks the payload, dropping any strong hold on the value.
    pub fn clear(&self) {
        *self.payload.lock() = Payload::Empty;
    }
}

/// Default bound on the number of pooled needles per reservoir.
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 64;

/// An unordered pool of free [`Needle`] handles, reducing allocation churn
/// for values that move in and out of stores.
///
/// Ownership contract (caller-enforced): a needle may be released only once
/// it has been removed from (or rejected by) every store, i.e. it has no
/// live owner besides the releasing caller. A needle currently installed in a
/// store must never be released. As a guard against the most common
/// violation, [`Reservoir::release`] refuses to pool a needle that still has
/// outside references and simply drops its own handle instead.
#[derive(Debug)]
pub struct Reservoir<T> {
    pool: Mutex<Vec<NeedleRef<T>>>,
    capacity: usize,
}

impl<T> Reservoir<T> {
    /// A reservoir bounded at [`DEFAULT_RESERVOIR_CAPACITY`] pooled needles.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RESERVOIR_CAPACITY)
    }

    /// A reservoir pooling at most `capacity` free needles; releases beyond
    /// the bound drop the needle instead of pooling it.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: Mutex::new(Vec::with_capacity(capacity.min(DEFAULT_RESERVOIR_CAPACITY))),
            capacity,
        }
    }

    /// Pops a free needle and reinitializes it with `value`, or allocates a
    /// fresh one if the pool is empty.
    pub fn acquire(&self, value: T) -> NeedleRef<T> {
        match self.pool.lock().pop() {
            Some(needle) => {
                needle.put(value);
                needle
            }
            None => Arc::new(Needle::strong(value)),
        }
    }

    /// Returns a needle to the pool for future reuse, blanking its payload.
    ///
    /// The needle is pooled only if the caller held the last reference and
    /// the pool is under its bound; otherwise it is dropped. Releasing the
    /// same logical needle twice therefore pools it at most once.
    pub fn release(&self, needle: NeedleRef<T>) {
        needle.clear();
        if Arc::strong_count(&needle) == 1 {
            let mut pool = self.pool.lock();
            if pool.len() < self.capacity {
                pool.push(needle);
            }
        }
    }

    /// The number of needles currently waiting for reuse.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }

    /// The pooling bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for Reservoir<T> {
    fn default() -> Self {
        Self::new()
    }
}
