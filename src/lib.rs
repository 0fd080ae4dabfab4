//! In-process concurrency primitives with minimal synchronization overhead.
//!
//! This crate is a small toolkit of five cooperating pieces:
//! - A fixed-capacity indexed store ([`bucket::Bucket`]) whose slots are each
//!   independently synchronized: every operation is a single compare-and-swap
//!   on the addressed slot's state word (or a bounded retry loop over one),
//!   and operations on distinct indices never contend.
//! - A recycling pool of value wrappers ([`needle::Reservoir`] of
//!   [`needle::Needle`]s) that cuts allocation churn for values moving in and
//!   out of stores, with an explicit strong/weak/absent payload.
//! - A memoizing store ([`needle_bucket::NeedleBucket`]) composing the two
//!   with a per-index factory for get-or-create-once semantics: the factory
//!   may race, but exactly one produced value is ever observably stored, and
//!   losers recycle their wrapper instead of leaking it.
//! - A monotonic version-token service ([`version::VersionProvider`]) for
//!   lock-free "did anything change" staleness checks, with epoch rollover
//!   keeping tokens totally ordered across counter exhaustion.
//! - A hybrid work scheduler ([`work::WorkContext`]): a FIFO queue served by
//!   lazily started dedicated threads (rayon fallback when none), supporting
//!   mutually exclusive items that wait for quiescence of all other in-flight
//!   work before running alone.
//!
//! Quick start:
//! 1. Build a [`needle_bucket::NeedleBucket`] with a capacity and a factory;
//!    call `get(index)` from any thread and always observe the same value.
//! 2. Hand a [`version::VersionProvider`] to your mutators (`advance`) and
//!    readers (`advance_new_token` / `token.update`) for cheap invalidation.
//! 3. Create a [`work::WorkContext`], `add_work` ordinary or exclusive
//!    actions, `start` them and either poll `done` or cooperatively `wait`.
//!
//! Blocking is confined to idle workers parked on a wake signal; store,
//! reservoir and version operations never block. The one deliberate spin is
//! the exclusive item's wait for quiescence, a latency-favoring tradeoff
//! with a configurable backoff policy.
//!
//! The `loom` cargo feature swaps the slot-level atomics for `loom`'s models
//! so the store's state machine can be exhaustively checked (see
//! `tests/loom.rs`).

#![warn(missing_docs)]

/// The fixed-capacity, per-slot-synchronized indexed store.
pub mod bucket;
/// Recyclable value wrappers and their pool.
///
/// Defines the `Needle` wrapper (strong/weak/absent payload), the shared
/// `NeedleRef` handle, and the bounded `Reservoir` that recycles them.
pub mod needle;
/// The memoizing store: `Bucket` + `Reservoir` + a per-index value factory.
pub mod needle_bucket;
mod sync;
/// Monotonic version tokens with epoch rollover.
pub mod version;
/// The work scheduler: contexts, dedicated workers, exclusive execution.
pub mod work;

pub use bucket::{Bucket, StoreError};
pub use needle::{Needle, NeedleRef, Reservoir};
pub use needle_bucket::NeedleBucket;
pub use version::{VersionProvider, VersionToken};
pub use work::{ContextConfig, SpinPolicy, Work, WorkContext, WorkError};
