//! Transaction Tests
//!
//! Tests for multi-box commits:
//! - All-or-nothing publish
//! - Conflict leaves every box untouched
//! - Concurrent transfers conserve totals
//! - Overlapping transactions never deadlock

use crate::*;
use occbox::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Barrier;
use std::thread;

#[test]
fn test_transfer_between_accounts() {
    init_tracing();
    let a = OccBox::new(Account { balance: 100 });
    let b = OccBox::new(Account { balance: 200 });

    let receipt = Transaction::new()
        .update(&a, |acct| acct.balance -= 50)
        .update(&b, |acct| acct.balance += 50)
        .commit()
        .unwrap();

    assert_eq!(a.read(|acct| acct.balance), 50);
    assert_eq!(b.read(|acct| acct.balance), 250);
    assert_eq!(a.version(), 1);
    assert_eq!(b.version(), 1);
    assert_eq!(receipt.len(), 2);
    assert_eq!(receipt.version_of(a.id()), Some(1));
    assert_eq!(receipt.version_of(b.id()), Some(1));
}

#[test]
fn test_apply2_with_captures() {
    let a = OccBox::new(300i64);
    let b = OccBox::new(100i64);
    let amount = 75;

    assert!(apply2(&a, |v| *v -= amount, &b, |v| *v += amount));

    assert_eq!(a.read(|v| *v), 225);
    assert_eq!(b.read(|v| *v), 175);
}

#[test]
fn test_empty_transaction_succeeds() {
    let receipt = Transaction::new().commit().unwrap();
    assert!(receipt.is_empty());
    assert!(Transaction::default().apply());
}

#[test]
fn test_duplicate_box_is_rejected() {
    let a = OccBox::new(1i32);
    let ran = AtomicBool::new(false);

    let result = Transaction::new()
        .update(&a, |v| {
            ran.store(true, Ordering::SeqCst);
            *v += 1;
        })
        .update(&a, |v| *v += 1)
        .commit();

    assert_eq!(result.unwrap_err(), Error::DuplicateCell(a.id()));
    assert!(!ran.load(Ordering::SeqCst), "no mutator may run");
    assert_eq!(a.read(|v| *v), 1);
    assert_eq!(a.version(), 0);
}

/// A box that changes while the transaction's mutators run aborts it whole
#[test]
fn test_conflict_leaves_all_boxes_untouched() {
    let a = OccBox::new(100i64);
    let b = OccBox::new(200i64);

    let result = Transaction::new()
        .update(&a, |v| *v -= 10)
        .update(&b, |v| {
            // Interleaved writer commits on `a` after it was snapshotted.
            a.write(|x| *x += 1);
            *v += 10;
        })
        .commit();

    let err = result.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.cell(), Some(a.id()));
    assert_eq!(a.read(|v| *v), 101, "only the interleaved write landed");
    assert_eq!(b.read(|v| *v), 200);
    assert_eq!(a.version(), 1);
    assert_eq!(b.version(), 0);
}

#[test]
fn test_mixed_value_and_pointer_mode() {
    let counter = OccBox::new(0u32);
    let name = OccBox::new(String::from("before"));

    let ok = Transaction::new()
        .update(&counter, |v| *v += 1)
        .replace(&name, |current| Arc::new(format!("{}-after", current)))
        .apply();

    assert!(ok);
    assert_eq!(counter.read(|v| *v), 1);
    assert_eq!(name.read(|s| s.clone()), "before-after");
}

/// Transfers on a ring of accounts, retried until they land
#[test]
fn test_concurrent_transfers_conserve_total() {
    const NUM_ACCOUNTS: usize = 4;
    const NUM_THREADS: usize = 6;
    const TRANSFERS_PER_THREAD: usize = 300;
    const INITIAL: i64 = 1_000;

    let accounts: Arc<Vec<OccBox<Account>>> = Arc::new(
        (0..NUM_ACCOUNTS)
            .map(|_| OccBox::new(Account { balance: INITIAL }))
            .collect(),
    );
    let conflicts = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let accounts = Arc::clone(&accounts);
            let conflicts = Arc::clone(&conflicts);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..TRANSFERS_PER_THREAD {
                    let from = &accounts[(t + i) % NUM_ACCOUNTS];
                    let to = &accounts[(t + i + 1) % NUM_ACCOUNTS];
                    // Stage in both orders to exercise lock ordering.
                    while !(if i % 2 == 0 {
                        apply2(from, |a| a.balance -= 1, to, |a| a.balance += 1)
                    } else {
                        apply2(to, |a| a.balance += 1, from, |a| a.balance -= 1)
                    }) {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let total: i64 = accounts.iter().map(|a| a.read(|acct| acct.balance)).sum();
    assert_eq!(total, INITIAL * NUM_ACCOUNTS as i64);

    let commits: u64 = accounts.iter().map(|a| a.version()).sum();
    assert_eq!(commits, 2 * (NUM_THREADS * TRANSFERS_PER_THREAD) as u64);
}

/// Transactions set both boxes to the same increasing value. A reader that
/// saw one box's new value must never see the other box's old value later.
#[test]
fn test_readers_never_see_partial_transaction() {
    const ROUNDS: u64 = 2_000;
    const NUM_READERS: usize = 4;

    let a = Arc::new(OccBox::new(0u64));
    let b = Arc::new(OccBox::new(0u64));
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(NUM_READERS + 1));

    let readers: Vec<_> = (0..NUM_READERS)
        .map(|r| {
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            let done = Arc::clone(&done);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                while !done.load(Ordering::SeqCst) {
                    let (first, second) = if r % 2 == 0 {
                        (a.read(|v| *v), b.read(|v| *v))
                    } else {
                        (b.read(|v| *v), a.read(|v| *v))
                    };
                    assert!(
                        second >= first,
                        "partial transaction visible: {} then {}",
                        first,
                        second
                    );
                }
            })
        })
        .collect();

    barrier.wait();
    for k in 1..=ROUNDS {
        assert!(apply2(&*a, |v| *v = k, &*b, |v| *v = k));
    }
    done.store(true, Ordering::SeqCst);

    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(a.read(|v| *v), ROUNDS);
    assert_eq!(b.read(|v| *v), ROUNDS);
}

/// Transactions over overlapping box sets, plus single writes on the same
/// boxes, all complete
#[test]
fn test_overlapping_transactions_complete() {
    const ITERS: usize = 500;

    let boxes = Arc::new([OccBox::new(0u64), OccBox::new(0u64), OccBox::new(0u64)]);
    let barrier = Arc::new(Barrier::new(4));

    let pairs = [(0usize, 1usize), (1, 2), (2, 0)];
    let mut handles: Vec<_> = pairs
        .into_iter()
        .map(|(x, y)| {
            let boxes = Arc::clone(&boxes);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERS {
                    while !Transaction::new()
                        .update(&boxes[x], |v| *v += 1)
                        .update(&boxes[y], |v| *v += 1)
                        .apply()
                    {}
                }
            })
        })
        .collect();

    handles.push({
        let boxes = Arc::clone(&boxes);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..ITERS {
                boxes[i % 3].write(|v| *v += 1);
            }
        })
    });

    for h in handles {
        h.join().unwrap();
    }

    let total: u64 = boxes.iter().map(|b| b.read(|v| *v)).sum();
    assert_eq!(total, (2 * 3 * ITERS + ITERS) as u64);
}
