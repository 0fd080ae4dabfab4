use arc_swap::ArcSwap;
use core::sync::atomic::{AtomicU64, Ordering};
use core::cmp::Ordering as CmpOrdering;
use std::{sync::Arc, time::Instant};

/// One counter generation of a [`VersionProvider`].
///
/// An epoch's counter only ever increases; when it saturates, the provider
/// installs a fresh epoch rather than mutating this one, so tokens captured
/// before the rollover stay valid and orderable. `seq` records creation
/// order and `born` the installation time.
#[derive(Debug)]
pub struct Epoch {
    seq: u64,
    born: Instant,
    number: AtomicU64,
}

impl Epoch {
    fn first() -> Self {
        Self::with_seq(1)
    }

    fn with_seq(seq: u64) -> Self {
        Self {
            seq,
            born: Instant::now(),
            number: AtomicU64::new(0),
        }
    }

    /// When this epoch was installed.
    #[must_use]
    pub fn born(&self) -> Instant {
        self.born
    }

    /// Increments the counter, refusing once `limit` is reached so the
    /// exhausted value is never reused. Returns the new counter value.
    fn try_advance(&self, limit: u64) -> Option<u64> {
        self.number
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |number| {
                (number < limit).then_some(number + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }
}

/// Issues comparable, monotonically increasing version tokens, surviving
/// counter exhaustion via epoch rollover.
///
/// Typical use is cheap "did anything change" staleness checks: mutators call
/// [`VersionProvider::advance`] after every change, readers capture a
/// [`VersionToken`] and later ask it to [`VersionToken::update`]. All paths
/// are lock-free; concurrent advances each receive a unique number.
#[must_use]
#[derive(Debug)]
pub struct VersionProvider {
    current: ArcSwap<Epoch>,
    limit: u64,
}

impl VersionProvider {
    /// A provider whose epochs saturate at `u64::MAX`.
    pub fn new() -> Self {
        Self::with_rollover_limit(u64::MAX)
    }

    /// A provider whose epochs saturate at `limit` advances, after which the
    /// next advance installs a fresh epoch. Mainly useful for exercising
    /// rollover without 2^64 increments.
    pub fn with_rollover_limit(limit: u64) -> Self {
        Self {
            current: ArcSwap::from_pointee(Epoch::first()),
            limit,
        }
    }

    /// Advances the current epoch's counter; on exhaustion, installs a fresh
    /// epoch and advances that one instead.
    pub fn advance(&self) {
        let _ = self.bump();
    }

    /// Advances and atomically captures the resulting `(epoch, counter)` as
    /// a token.
    pub fn advance_new_token(&self) -> VersionToken {
        let (epoch, number) = self.bump();
        VersionToken {
            epoch: Some(epoch),
            number,
        }
    }

    /// A token not yet bound to any epoch; it binds lazily on its first
    /// [`VersionToken::update`] and orders before every bound token.
    pub fn new_token(&self) -> VersionToken {
        VersionToken {
            epoch: None,
            number: 0,
        }
    }

    fn bump(&self) -> (Arc<Epoch>, u64) {
        loop {
            let epoch = self.current.load_full();
            if let Some(number) = epoch.try_advance(self.limit) {
                return (epoch, number);
            }
            // Exhausted: race to install the successor. Losers simply retry
            // on whichever epoch won.
            let successor = Arc::new(Epoch::with_seq(epoch.seq + 1));
            let _ = self.current.compare_and_swap(&epoch, successor);
        }
    }

    fn snapshot(&self) -> (Arc<Epoch>, u64) {
        let epoch = self.current.load_full();
        let number = epoch.number.load(Ordering::Acquire);
        (epoch, number)
    }
}

impl Default for VersionProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time capture of a [`VersionProvider`]'s state.
///
/// Two tokens from the same epoch compare by counter; tokens from different
/// epochs compare by the epochs' creation order. This yields a total order
/// that survives counter rollover. An unbound token (fresh from
/// [`VersionProvider::new_token`], or [`VersionToken::reset`]) orders before
/// every bound one.
#[derive(Debug, Clone)]
pub struct VersionToken {
    epoch: Option<Arc<Epoch>>,
    number: u64,
}

impl VersionToken {
    /// Re-reads `provider`'s current epoch and counter into this token;
    /// reports whether either differed from the token's prior state.
    pub fn update(&mut self, provider: &VersionProvider) -> bool {
        let (epoch, number) = provider.snapshot();
        let changed = self.number != number
            || !self
                .epoch
                .as_ref()
                .is_some_and(|held| Arc::ptr_eq(held, &epoch));
        self.epoch = Some(epoch);
        self.number = number;
        changed
    }

    /// Like [`VersionToken::update`], invoking `on_change` only when the
    /// token actually moved.
    pub fn update_with(&mut self, provider: &VersionProvider, on_change: impl FnOnce()) -> bool {
        let changed = self.update(provider);
        if changed {
            on_change();
        }
        changed
    }

    /// Unbinds the token, as if freshly produced by
    /// [`VersionProvider::new_token`].
    pub fn reset(&mut self) {
        self.epoch = None;
        self.number = 0;
    }

    /// Total-order key: unbound tokens use epoch sequence 0, which no real
    /// epoch carries.
    fn key(&self) -> (u64, u64) {
        (
            self.epoch.as_ref().map_or(0, |epoch| epoch.seq),
            self.number,
        )
    }
}

impl PartialEq for VersionToken {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for VersionToken {}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}
