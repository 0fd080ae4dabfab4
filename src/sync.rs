#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::cell::UnsafeCell;
    pub(crate) use loom::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    /// Let the `loom` scheduler explore other interleavings while we spin.
    pub(crate) fn spin() {
        loom::thread::yield_now();
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::cell::UnsafeCell;
    pub(crate) use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    pub(crate) fn spin() {
        core::hint::spin_loop();
    }
}

pub(crate) use imp::*;

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Send`.
///
/// Access goes through `with_mut` so the same call sites work against both
/// `core::cell::UnsafeCell` and `loom::cell::UnsafeCell`. Exclusivity is
/// ensured by the callers' atomic state machines: a slot's cell is touched
/// only while its state word is held in the transient LOCKED state, the same
/// discipline a `Mutex<Option<T>>` would enforce, hence the `T: Send` bound.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }

    /// # Safety
    ///
    /// The caller must guarantee no concurrent access to the cell for the
    /// duration of `f` (here: the owning slot's state word is LOCKED).
    #[cfg(not(feature = "loom"))]
    pub(crate) unsafe fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }

    /// # Safety
    ///
    /// See the non-`loom` variant.
    #[cfg(feature = "loom")]
    pub(crate) unsafe fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        self.0.with_mut(f)
    }
}
