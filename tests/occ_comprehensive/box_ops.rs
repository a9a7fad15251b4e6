//! OccBox Basic Operations Tests
//!
//! Tests for single-box behaviour:
//! - read / write / write_ptr round trips
//! - version accounting
//! - snapshots outliving the box

use crate::*;
use occbox::prelude::*;
use occbox::INITIAL_VERSION;
use static_assertions::{assert_impl_all, assert_not_impl_any};

assert_impl_all!(OccBox<i64>: Send, Sync);
assert_impl_all!(Snapshot<String>: Send, Sync, Clone);
assert_not_impl_any!(OccBox<i64>: Clone);

#[test]
fn test_new_box_reads_initial_value() {
    init_tracing();
    let b = OccBox::new(String::from("hello"));
    assert_eq!(b.read(|s| s.len()), 5);
    assert_eq!(b.version(), INITIAL_VERSION);
}

#[test]
fn test_write_then_read() {
    let b = OccBox::new(Account { balance: 10 });
    b.write(|a| a.balance *= 3);
    assert_eq!(b.read(|a| a.balance), 30);
}

#[test]
fn test_version_counts_every_commit() {
    let b = OccBox::new(0u32);
    for i in 1..=25u64 {
        b.write(|v| *v += 1);
        assert_eq!(b.version(), INITIAL_VERSION + i);
    }
    b.write_ptr(|v| Arc::new(**v * 2));
    assert_eq!(b.version(), INITIAL_VERSION + 26);
    assert_eq!(b.read(|v| *v), 50);
}

#[test]
fn test_snapshot_pairs_value_with_version() {
    let b = OccBox::new(vec![0u8]);
    b.write(|v| v.push(1));
    let snap = b.snapshot();
    assert_eq!(snap.version(), 1);
    assert_eq!(*snap, vec![0, 1]);
}

#[test]
fn test_snapshot_outlives_box() {
    let b = OccBox::new(String::from("durable"));
    let snap = b.snapshot();
    let handle = b.load();
    drop(b);
    assert_eq!(&*snap, "durable");
    assert_eq!(handle.as_str(), "durable");
}

#[test]
fn test_box_can_be_moved() {
    let b = OccBox::new(7);
    let id = b.id();
    let moved = Box::new(b);
    moved.write(|v| *v += 1);
    assert_eq!(moved.read(|v| *v), 8);
    assert_eq!(moved.id(), id);
}

#[test]
fn test_read_returns_arbitrary_type() {
    let b = OccBox::new(vec![3, 1, 2]);
    let sorted: Vec<i32> = b.read(|v| {
        let mut v = v.clone();
        v.sort();
        v
    });
    assert_eq!(sorted, vec![1, 2, 3]);
    assert_eq!(b.read(|v| v.clone()), vec![3, 1, 2]);
}

#[test]
fn test_fallible_update() {
    let b = OccBox::new(Account { balance: 20 });

    let withdraw = |amount: i64| {
        move |a: &mut Account| {
            if a.balance < amount {
                return Err(format!("insufficient funds: {} < {}", a.balance, amount));
            }
            a.balance -= amount;
            Ok(())
        }
    };

    assert_eq!(b.update(withdraw(15)), Ok(1));
    let err = b.update(withdraw(15)).unwrap_err();
    assert!(err.contains("insufficient funds"));
    assert_eq!(b.read(|a| a.balance), 5);
    assert_eq!(b.version(), 1);
}

#[test]
fn test_distinct_ids() {
    let a = OccBox::new(());
    let b = OccBox::new(());
    assert_ne!(a.id(), b.id());
}
