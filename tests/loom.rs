#![allow(missing_docs)]
#![cfg(feature = "loom")]

use loom::sync::Arc;
use loom::thread;
use needlework::Bucket;

/// Two racing inserts on the same index: exactly one wins, the slot ends up
/// holding the winner's value, and the loser gets its value handed back.
/// The winner's linearization point is the single `EMPTY -> LOCKED` CAS.
#[test]
fn racing_inserts_have_a_single_winner() {
    loom::model(|| {
        let bucket = Arc::new(Bucket::new(1));
        let other = Arc::clone(&bucket);

        let handle = thread::spawn(move || other.insert(0, 1_u8).unwrap());
        let mine = bucket.insert(0, 2_u8).unwrap();
        let theirs = handle.join().unwrap();

        let wins = usize::from(mine.is_none()) + usize::from(theirs.is_none());
        assert_eq!(wins, 1);
        // A losing insert hands the rejected value back unchanged.
        if let Some(rejected) = mine {
            assert_eq!(rejected, 2);
        }
        if let Some(rejected) = theirs {
            assert_eq!(rejected, 1);
        }
        assert_eq!(bucket.len(), 1);
        let stored = bucket.try_get(0).unwrap().unwrap();
        if mine.is_none() {
            assert_eq!(stored, 2);
        } else {
            assert_eq!(stored, 1);
        }
    });
}

/// Insert racing a remove on a pre-populated slot. Whatever the interleaving,
/// the remove returns either the original occupant or nothing, and the slot's
/// final contents agree with the two operations' outcomes.
#[test]
fn insert_racing_remove_is_linearizable() {
    loom::model(|| {
        let bucket = Arc::new(Bucket::new(1));
        assert!(bucket.insert(0, 10_u8).unwrap().is_none());
        let other = Arc::clone(&bucket);

        let remover = thread::spawn(move || other.remove_at(0).unwrap());
        let inserted = bucket.insert(0, 20_u8).unwrap();
        let removed = remover.join().unwrap();

        // The remove targeted an occupied slot, so it must have taken one of
        // the two values.
        let final_value = bucket.try_get(0).unwrap();
        match (removed, inserted.is_none()) {
            // Remove took the original; our insert then won the empty slot.
            (Some(10), true) => assert_eq!(final_value, Some(20)),
            // Remove took the original; our insert lost (ran before the
            // removal) leaving the slot empty.
            (Some(10), false) => assert_eq!(final_value, None),
            // Remove took our insert, which must have won first.
            (Some(20), true) => assert_eq!(final_value, None),
            outcome => panic!("impossible interleaving: {outcome:?}"),
        }
    });
}

/// A reader racing an exchange never observes a torn or absent value on an
/// always-occupied slot.
#[test]
fn read_racing_exchange_observes_some_value() {
    loom::model(|| {
        let bucket = Arc::new(Bucket::new(1));
        assert!(bucket.insert(0, 1_u8).unwrap().is_none());
        let other = Arc::clone(&bucket);

        let reader = thread::spawn(move || other.try_get(0).unwrap());
        let previous = bucket.exchange(0, 2_u8).unwrap();
        let observed = reader.join().unwrap();

        assert_eq!(previous, Some(1));
        assert!(matches!(observed, Some(1) | Some(2)));
        assert_eq!(bucket.try_get(0).unwrap(), Some(2));
    });
}
