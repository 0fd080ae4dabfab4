#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use needlework::{Needle, Reservoir};
use std::sync::Arc;

#[test]
fn acquire_reuses_released_handles() {
    let reservoir = Reservoir::new();
    let first = reservoir.acquire(1_u32);
    assert_eq!(reservoir.pooled(), 0);

    reservoir.release(first);
    assert_eq!(reservoir.pooled(), 1);

    let second = reservoir.acquire(2);
    assert_eq!(reservoir.pooled(), 0);
    assert_eq!(second.try_get().as_deref(), Some(&2));
}

#[test]
fn release_blanks_the_payload() {
    let reservoir = Reservoir::new();
    let needle = reservoir.acquire(5_u32);
    reservoir.release(needle);

    let recycled = reservoir.acquire(6);
    assert_eq!(recycled.try_get().as_deref(), Some(&6));
    recycled.clear();
    assert!(recycled.try_get().is_none());
    assert!(!recycled.is_alive());
}

#[test]
fn pool_bound_is_enforced() {
    let reservoir = Reservoir::with_capacity(2);
    let needles: Vec<_> = (0..4).map(|i| reservoir.acquire(i)).collect();
    for needle in needles {
        reservoir.release(needle);
    }
    assert_eq!(reservoir.pooled(), 2);
    assert_eq!(reservoir.capacity(), 2);
}

#[test]
fn aliased_release_does_not_pool_the_handle() {
    let reservoir = Reservoir::new();
    let needle = reservoir.acquire(1_u32);
    let alias = Arc::clone(&needle);

    // The caller still holds `alias`, so the handle must not become
    // reusable: pooling it would let a future acquire overwrite a payload
    // the alias can still read.
    reservoir.release(needle);
    assert_eq!(reservoir.pooled(), 0);
    assert!(alias.try_get().is_none());

    // Once the last reference is the one being released, pooling resumes.
    reservoir.release(alias);
    assert_eq!(reservoir.pooled(), 1);
}

#[test]
fn double_release_pools_at_most_once() {
    let reservoir = Reservoir::new();
    let needle = reservoir.acquire(1_u32);
    let duplicate = Arc::clone(&needle);

    reservoir.release(needle);
    reservoir.release(duplicate);
    assert_eq!(reservoir.pooled(), 1);
}

#[test]
fn weak_payload_dies_with_its_value() {
    let needle = Needle::blank();
    let value = Arc::new(42_u32);
    needle.put_shared(Arc::clone(&value));
    needle.demote();

    assert!(needle.is_alive());
    assert_eq!(needle.try_get().as_deref(), Some(&42));

    drop(value);
    assert!(!needle.is_alive());
    assert!(needle.try_get().is_none());
}

#[test]
fn demote_leaves_blank_needles_alone() {
    let needle: Needle<u32> = Needle::blank();
    needle.demote();
    assert!(!needle.is_alive());
}
