#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use needlework::{ContextConfig, SpinPolicy, Work, WorkContext, WorkError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn started_work_completes_and_is_observable() {
    let context = WorkContext::with_dedicated_threads(2);
    let ran = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&ran);

    let item = context.add_work(move || { counted.fetch_add(1, Ordering::SeqCst); }, false);
    assert!(!item.done());
    item.start().unwrap();
    item.wait().unwrap();

    assert!(item.done());
    assert!(item.fault().is_none());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_cooperatively_drains_with_zero_dedicated_threads() {
    // Fallback-pool mode: the waiting caller itself makes progress even if
    // the fallback dispatch is slow.
    let context = WorkContext::with_dedicated_threads(0);
    let ran = Arc::new(AtomicUsize::new(0));

    let items: Vec<Work> = (0..4)
        .map(|_| {
            let counted = Arc::clone(&ran);
            let item = context.add_work(move || { counted.fetch_add(1, Ordering::SeqCst); }, false);
            item.start().unwrap();
            item
        })
        .collect();

    for item in &items {
        item.wait().unwrap();
        assert!(item.done());
    }
    assert_eq!(ran.load(Ordering::SeqCst), 4);
}

#[test]
fn non_exclusive_items_can_run_concurrently() {
    let context = WorkContext::with_dedicated_threads(2);
    // Both bodies must be in flight at once to get past the barrier.
    let rendezvous = Arc::new(Barrier::new(2));

    let items: Vec<Work> = (0..2)
        .map(|_| {
            let rendezvous = Arc::clone(&rendezvous);
            let item = context.add_work(move || { rendezvous.wait(); }, false);
            item.start().unwrap();
            item
        })
        .collect();

    for item in &items {
        item.wait().unwrap();
    }
}

#[test]
fn exclusive_work_runs_in_quiescence() {
    let context = Arc::new(WorkContext::with_dedicated_threads(4));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let exclusive_snapshot = Arc::new(AtomicUsize::new(usize::MAX));
    let overlap_seen = Arc::new(AtomicUsize::new(0));

    let mut items = Vec::new();
    for _ in 0..3 {
        let in_flight = Arc::clone(&in_flight);
        let overlap_seen = Arc::clone(&overlap_seen);
        let item = context.add_work(
            move || {
                in_flight.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                overlap_seen.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );
        item.start().unwrap();
        items.push(item);
    }

    let observer = Arc::clone(&context);
    let in_flight_probe = Arc::clone(&in_flight);
    let snapshot = Arc::clone(&exclusive_snapshot);
    let exclusive = context.add_work(
        move || {
            // While an exclusive item executes, no non-exclusive body is
            // mid-execution anywhere in the context.
            assert_eq!(in_flight_probe.load(Ordering::SeqCst), 0);
            // Let any freshly woken worker park before sampling.
            thread::sleep(Duration::from_millis(20));
            snapshot.store(observer.active_workers(), Ordering::SeqCst);
        },
        true,
    );
    exclusive.start().unwrap();

    for item in &items {
        item.wait().unwrap();
    }
    exclusive.wait().unwrap();

    assert!(exclusive.done());
    assert!(exclusive.fault().is_none(), "{:?}", exclusive.fault());
    assert_eq!(overlap_seen.load(Ordering::SeqCst), 3);
    assert_eq!(exclusive_snapshot.load(Ordering::SeqCst), 1);
}

#[test]
fn a_faulting_item_never_crashes_the_dispatcher() {
    let context = WorkContext::with_dedicated_threads(1);

    let faulty = context.add_work(|| panic!("intentional failure"), false);
    faulty.start().unwrap();
    faulty.wait().unwrap();

    assert!(faulty.done());
    assert_eq!(faulty.fault().as_deref(), Some("intentional failure"));

    // The worker that caught the panic keeps serving items.
    let healthy = context.add_work(|| {}, false);
    healthy.start().unwrap();
    healthy.wait().unwrap();
    assert!(healthy.fault().is_none());
}

#[test]
fn current_work_is_visible_inside_the_body() {
    let context = WorkContext::with_dedicated_threads(1);
    let seen = Arc::new(AtomicUsize::new(usize::MAX));

    let observed = Arc::clone(&seen);
    let item = context.add_work(
        move || {
            let current = Work::current().expect("executing inside a scheduled body");
            observed.store(current.id() as usize, Ordering::SeqCst);
        },
        false,
    );
    item.start().unwrap();
    item.wait().unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), item.id() as usize);
    assert!(Work::current().is_none());
}

#[test]
fn dispose_stops_dispatch_and_joins_workers() {
    let context = WorkContext::with_dedicated_threads(2);
    let item = context.add_work(|| {}, false);
    item.start().unwrap();
    item.wait().unwrap();

    context.dispose().unwrap();
    assert!(!context.is_alive());

    let late = context.add_work(|| {}, false);
    assert!(matches!(late.start(), Err(WorkError::Disposed)));
    assert!(matches!(context.do_one_work(), Err(WorkError::Disposed)));
    // Dispose is idempotent.
    context.dispose().unwrap();
}

#[test]
fn non_disposable_contexts_refuse_dispose() {
    let context = WorkContext::new(ContextConfig {
        dedicated_threads: 1,
        disposable: false,
        ..ContextConfig::default()
    });
    assert!(matches!(context.dispose(), Err(WorkError::NotDisposable)));
    assert!(context.is_alive());
}

#[test]
fn backoff_policy_preserves_the_exclusion_contract() {
    let context = Arc::new(WorkContext::new(ContextConfig {
        dedicated_threads: 2,
        spin_policy: SpinPolicy::Backoff,
        ..ContextConfig::default()
    }));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let mut items = Vec::new();
    for _ in 0..2 {
        let in_flight = Arc::clone(&in_flight);
        let item = context.add_work(
            move || {
                in_flight.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                in_flight.fetch_sub(1, Ordering::SeqCst);
            },
            false,
        );
        item.start().unwrap();
        items.push(item);
    }

    let probe = Arc::clone(&in_flight);
    let exclusive = context.add_work(
        move || assert_eq!(probe.load(Ordering::SeqCst), 0),
        true,
    );
    exclusive.start().unwrap();

    for item in &items {
        item.wait().unwrap();
    }
    exclusive.wait().unwrap();
    assert!(exclusive.fault().is_none(), "{:?}", exclusive.fault());
}

#[test]
fn all_items_reach_done_in_a_mixed_batch() {
    let context = WorkContext::with_dedicated_threads(4);
    let mut items = Vec::new();
    for index in 0..12 {
        let exclusive = index % 4 == 3;
        let item = context.add_work(|| thread::sleep(Duration::from_millis(1)), exclusive);
        item.start().unwrap();
        items.push(item);
    }
    for item in &items {
        item.wait().unwrap();
        assert!(item.done());
    }
}
