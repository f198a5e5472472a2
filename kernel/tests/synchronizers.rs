mod common;

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

use common::{run, Trace};
use rtsched_kernel::{
    Condition, Criterion, KernelConfig, Mutex, Policy, Protocol, Semaphore, ThreadConfig,
    ThreadState, LOW, NORMAL,
};

fn rank(policy: Policy, r: i64) -> ThreadConfig {
    ThreadConfig::new(Criterion::new(policy, r))
}

#[test]
fn test_mutex_excludes_preempted_holders() {
    // One-tick quantum: holders get preempted inside the critical section
    let config = KernelConfig::new(Policy::RoundRobin).with_quantum(1_000);
    let report = run(1, config, |k| {
        let mutex = Arc::new(Mutex::new(&k));
        let inside = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicUsize::new(0));

        let mut threads = Vec::new();
        for _ in 0..3 {
            let (mutex, inside, counter, kernel) =
                (mutex.clone(), inside.clone(), counter.clone(), k.clone());
            threads.push(
                k.create_thread(rank(Policy::RoundRobin, NORMAL), move || {
                    for _ in 0..5 {
                        mutex.lock();
                        assert!(mutex.is_locked());
                        assert!(!inside.swap(true, Ordering::SeqCst), "two threads inside");
                        let seen = counter.load(Ordering::SeqCst);
                        kernel.platform().work(2);
                        counter.store(seen + 1, Ordering::SeqCst);
                        inside.store(false, Ordering::SeqCst);
                        mutex.unlock();
                    }
                    0
                })
                .unwrap(),
            );
        }
        for t in threads {
            k.join(t).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 15);
        assert!(!mutex.is_locked());
        0
    });
    report.assert_clean();
}

#[test]
fn test_semaphore_bounds_concurrent_holders() {
    let config = KernelConfig::new(Policy::RoundRobin).with_quantum(1_000);
    let report = run(1, config, |k| {
        let semaphore = Arc::new(Semaphore::new(&k, 2));
        let inside = Arc::new(AtomicIsize::new(0));
        let peak = Arc::new(AtomicIsize::new(0));

        let mut threads = Vec::new();
        for _ in 0..4 {
            let (semaphore, inside, peak, kernel) =
                (semaphore.clone(), inside.clone(), peak.clone(), k.clone());
            threads.push(
                k.create_thread(rank(Policy::RoundRobin, NORMAL), move || {
                    for _ in 0..3 {
                        semaphore.p();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        kernel.platform().work(3);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        semaphore.v();
                    }
                    0
                })
                .unwrap(),
            );
        }
        for t in threads {
            k.join(t).unwrap();
        }
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak {}", peak);
        assert_eq!(semaphore.value(), 2);
        0
    });
    report.assert_clean();
}

#[test]
fn test_semaphore_wakes_most_urgent_waiter_first() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, KernelConfig::new(Policy::Priority), move |k| {
        let me = k.running();
        k.set_priority(me, Criterion::new(Policy::Priority, LOW)).unwrap();

        let semaphore = Arc::new(Semaphore::new(&k, 0));
        let mut waiters = Vec::new();
        for r in [30, 10, 20] {
            let (semaphore, log) = (semaphore.clone(), log.clone());
            let config = rank(Policy::Priority, r).suspended();
            waiters.push(
                k.create_thread(config, move || {
                    semaphore.p();
                    log.push(r.to_string());
                    0
                })
                .unwrap(),
            );
        }
        // Block them in creation order, not rank order
        for &w in &waiters {
            k.resume(w);
            assert_eq!(k.state(w), Some(ThreadState::Waiting));
        }
        assert_eq!(semaphore.value(), -3);

        for _ in 0..3 {
            semaphore.v();
        }
        for w in waiters {
            k.join(w).unwrap();
        }
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["10", "20", "30"]);
}

#[test]
fn test_priority_change_reorders_waiters() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, KernelConfig::new(Policy::Priority), move |k| {
        let me = k.running();
        k.set_priority(me, Criterion::new(Policy::Priority, LOW)).unwrap();

        let semaphore = Arc::new(Semaphore::new(&k, 0));
        let mut waiters = Vec::new();
        for name in ["first", "second"] {
            let (semaphore, log) = (semaphore.clone(), log.clone());
            let r = if name == "first" { 20 } else { 30 };
            waiters.push(
                k.create_thread(rank(Policy::Priority, r), move || {
                    semaphore.p();
                    log.push(name);
                    0
                })
                .unwrap(),
            );
        }

        // Moves ahead of the other waiter while blocked
        k.set_priority(waiters[1], Criterion::new(Policy::Priority, 10))
            .unwrap();
        assert_eq!(k.state(waiters[1]), Some(ThreadState::Waiting));

        semaphore.v();
        assert_eq!(log.events(), ["second"]);
        semaphore.v();
        for w in waiters {
            k.join(w).unwrap();
        }
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["second", "first"]);
}

#[test]
fn test_destroying_a_waiter_gives_its_unit_back() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, KernelConfig::new(Policy::Priority), move |k| {
        let me = k.running();
        k.set_priority(me, Criterion::new(Policy::Priority, LOW)).unwrap();

        let semaphore = Arc::new(Semaphore::new(&k, 0));
        let (s, l) = (semaphore.clone(), log.clone());
        let waiter = k
            .create_thread(rank(Policy::Priority, 10), move || {
                s.p();
                l.push("woken");
                0
            })
            .unwrap();
        assert_eq!(k.state(waiter), Some(ThreadState::Waiting));
        assert_eq!(semaphore.value(), -1);

        k.destroy(waiter).unwrap();
        assert_eq!(k.state(waiter), None);
        assert_eq!(semaphore.value(), 0);

        // The next up is not swallowed by the destroyed waiter
        semaphore.v();
        assert_eq!(semaphore.value(), 1);
        let s = semaphore.clone();
        let taker = k
            .create_thread(rank(Policy::Priority, 10), move || {
                s.p();
                0
            })
            .unwrap();
        assert_eq!(k.state(taker), Some(ThreadState::Finishing));
        k.join(taker).unwrap();
        assert_eq!(semaphore.value(), 0);
        0
    });
    report.assert_clean();
    assert!(trace.events().is_empty());
}

#[test]
fn test_condition_signal_and_broadcast() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, KernelConfig::new(Policy::Priority), move |k| {
        let me = k.running();
        k.set_priority(me, Criterion::new(Policy::Priority, LOW)).unwrap();
        let condition = Arc::new(Condition::new(&k));

        // Nobody waits: the signal is lost
        condition.signal();

        let mut waiters = Vec::new();
        for r in [12, 10, 11] {
            let (condition, log) = (condition.clone(), log.clone());
            waiters.push(
                k.create_thread(rank(Policy::Priority, r), move || {
                    condition.wait();
                    log.push(r.to_string());
                    0
                })
                .unwrap(),
            );
        }
        for &w in &waiters {
            assert_eq!(k.state(w), Some(ThreadState::Waiting));
        }

        condition.signal();
        assert_eq!(log.events(), ["10"]);
        condition.broadcast();
        for w in waiters {
            k.join(w).unwrap();
        }
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["10", "11", "12"]);
}

#[test]
fn test_fcfs_never_preempts() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, KernelConfig::new(Policy::Fcfs), move |k| {
        let mutex = Arc::new(Mutex::with_protocol(&k, Protocol::None));
        mutex.lock();

        let (m, l) = (mutex.clone(), log.clone());
        let config = ThreadConfig::new(Criterion::fcfs(k.platform()));
        let waiter = k
            .create_thread(config, move || {
                m.lock();
                l.push("waiter");
                m.unlock();
                0
            })
            .unwrap();

        // Not preemptive: the new thread waits for MAIN to block
        log.push("main");
        mutex.unlock();
        log.push("unlocked");
        k.join(waiter).unwrap();
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["main", "unlocked", "waiter"]);
}
