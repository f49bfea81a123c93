use rand::prelude::*;
use rendezvous_rust::{CancelToken, CountdownGate, SyncError, WaitOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn zero_count_is_rejected() {
    match CountdownGate::new(0) {
        Err(SyncError::InvalidArgument(_)) => {}
        other => panic!("expected InvalidArgument, got {:?}", other.map(|g| g.count())),
    }
}

#[test]
fn opens_only_after_every_signal() {
    let gate = CountdownGate::new(3).unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let gate = gate.clone();
            let released = released.clone();
            thread::spawn(move || {
                gate.wait();
                released.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    assert!(!gate.signal());
    assert!(!gate.signal());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert_eq!(gate.count(), 1);
    assert!(!gate.is_open());

    assert!(gate.signal());
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 4);
    assert!(gate.is_open());
}

#[test]
fn extra_signals_saturate_at_zero() {
    let gate = CountdownGate::new(2).unwrap();
    let opened: Vec<bool> = (0..5).map(|_| gate.signal()).collect();
    assert_eq!(opened, vec![false, true, false, false, false]);
    assert_eq!(gate.count(), 0);
}

#[test]
fn wait_on_open_gate_returns_immediately() {
    let gate = CountdownGate::new(1).unwrap();
    gate.signal();

    let start = Instant::now();
    gate.wait();
    gate.wait_timeout(Duration::from_secs(5)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn workers_with_random_delays() {
    let gate = CountdownGate::new(3).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    let early_waiter = {
        let gate = gate.clone();
        let finished = finished.clone();
        thread::spawn(move || {
            gate.wait();
            assert_eq!(finished.load(Ordering::SeqCst), 3);
        })
    };

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let gate = gate.clone();
            let finished = finished.clone();
            let delay = thread_rng().gen_range(0..200);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay));
                finished.fetch_add(1, Ordering::SeqCst);
                gate.signal();
            })
        })
        .collect();

    gate.wait();
    assert_eq!(finished.load(Ordering::SeqCst), 3);

    for worker in workers {
        worker.join().unwrap();
    }
    early_waiter.join().unwrap();

    // issued after every signal landed
    gate.wait();
    assert_eq!(gate.count(), 0);
}

#[test]
fn cancelled_wait_leaves_count_alone() {
    let gate = CountdownGate::new(2).unwrap();
    let token = CancelToken::new();

    let waiter = {
        let gate = gate.clone();
        let options = WaitOptions::new().cancel_on(&token);
        thread::spawn(move || gate.wait_with(&options))
    };

    thread::sleep(Duration::from_millis(50));
    token.cancel();

    match waiter.join().unwrap() {
        Err(SyncError::Cancelled) => {}
        other => panic!("expected Cancelled, got {:?}", other),
    }
    assert_eq!(gate.count(), 2);

    gate.signal();
    gate.signal();
    gate.wait();
}

#[test]
fn cancelled_token_fails_fast_unless_open() {
    let gate = CountdownGate::new(1).unwrap();
    let token = CancelToken::new();
    token.cancel();
    let options = WaitOptions::new().cancel_on(&token);

    match gate.wait_with(&options) {
        Err(SyncError::Cancelled) => {}
        other => panic!("expected Cancelled, got {:?}", other),
    }

    gate.signal();
    gate.wait_with(&options).unwrap();
}

#[test]
fn timed_wait_expires() {
    let gate = CountdownGate::new(1).unwrap();

    let start = Instant::now();
    match gate.wait_timeout(Duration::from_millis(100)) {
        Err(SyncError::Timeout) => {}
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(gate.count(), 1);
}

#[test]
fn signal_guard_counts_down_on_panic() {
    let gate = CountdownGate::new(2).unwrap();

    let ok = {
        let gate = gate.clone();
        thread::spawn(move || {
            let _done = gate.signal_guard();
        })
    };
    let panicked = {
        let gate = gate.clone();
        thread::spawn(move || {
            let _done = gate.signal_guard();
            panic!("worker failed");
        })
    };

    ok.join().unwrap();
    assert!(panicked.join().is_err());
    gate.wait_timeout(Duration::from_secs(5)).unwrap();
}

#[tokio::test]
async fn many_signalers_many_waiters() {
    const N: usize = 64;
    let gate = CountdownGate::new(N).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let gate = gate.clone();
        tasks.push(tokio::task::spawn_blocking(move || gate.wait_timeout(Duration::from_secs(10))));
    }
    for _ in 0..N {
        let gate = gate.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            gate.signal();
            Ok(())
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(gate.count(), 0);
}

#[test]
fn unbounded_timeout_waits_like_forever() {
    let gate = CountdownGate::new(1).unwrap();

    let waiter = {
        let gate = gate.clone();
        thread::spawn(move || gate.wait_timeout(Duration::MAX))
    };
    thread::sleep(Duration::from_millis(20));
    gate.signal();
    waiter.join().unwrap().unwrap();

    // already open
    gate.wait_timeout(Duration::MAX).unwrap();
}
