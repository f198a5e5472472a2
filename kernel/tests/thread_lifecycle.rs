mod common;

use common::{run, Host, Trace};
use rtsched_kernel::{
    Criterion, Kernel, KernelConfig, Policy, SchedulerError, ThreadConfig, ThreadState, IDLE, ISR,
    NORMAL,
};

fn priority() -> KernelConfig {
    KernelConfig::new(Policy::Priority)
}

fn rank(r: i64) -> ThreadConfig {
    ThreadConfig::new(Criterion::new(Policy::Priority, r))
}

#[test]
fn test_join_returns_exit_status() {
    let report = run(1, priority(), |k| {
        let t = k.create_thread(rank(NORMAL), || 42).unwrap();
        assert_eq!(k.join(t), Ok(42));
        assert_eq!(k.state(t), Some(ThreadState::Finishing));

        // Joining a finished thread returns at once
        assert_eq!(k.join(t), Ok(42));
        0
    });
    report.assert_clean();
}

#[test]
fn test_ready_threads_run_in_rank_order() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, priority(), move |k| {
        let (a, b) = (log.clone(), log.clone());
        let low = k
            .create_thread(rank(10), move || {
                a.push("low");
                0
            })
            .unwrap();
        let high = k
            .create_thread(rank(5), move || {
                b.push("high");
                0
            })
            .unwrap();

        // MAIN outranks both: nothing ran yet
        assert!(log.events().is_empty());
        k.join(low).unwrap();
        k.join(high).unwrap();
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["high", "low"]);
}

#[test]
fn test_more_urgent_thread_preempts_creator() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, priority(), move |k| {
        let isr = log.clone();
        let t = k
            .create_thread(rank(ISR), move || {
                isr.push("isr");
                0
            })
            .unwrap();
        log.push("main");
        k.join(t).unwrap();
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["isr", "main"]);
}

#[test]
fn test_suspend_and_resume() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, priority(), move |k| {
        // Created suspended
        let w = log.clone();
        let worker = k
            .create_thread(rank(10).suspended(), move || {
                w.push("worker");
                0
            })
            .unwrap();
        assert_eq!(k.state(worker), Some(ThreadState::Suspended));
        k.resume(worker);
        assert_eq!(k.state(worker), Some(ThreadState::Ready));

        // Suspending a ready thread takes it out of the queue
        k.suspend(worker);
        assert_eq!(k.state(worker), Some(ThreadState::Suspended));
        k.yield_now();
        assert!(log.events().is_empty());

        k.resume(worker);
        k.join(worker).unwrap();
        assert_eq!(log.events(), ["worker"]);

        // A thread suspending itself runs again only once resumed
        let s = log.clone();
        let kernel = k.clone();
        let sleeper = k
            .create_thread(rank(ISR), move || {
                s.push("before");
                kernel.suspend(kernel.running());
                s.push("after");
                0
            })
            .unwrap();
        assert_eq!(k.state(sleeper), Some(ThreadState::Suspended));
        assert_eq!(log.events(), ["worker", "before"]);
        k.resume(sleeper);
        assert_eq!(log.events(), ["worker", "before", "after"]);
        k.join(sleeper).unwrap();
        0
    });
    report.assert_clean();
}

#[test]
fn test_pass_hands_over_to_a_specific_thread() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, priority(), move |k| {
        let (a, b) = (log.clone(), log.clone());
        let first = k
            .create_thread(rank(NORMAL), move || {
                a.push("first");
                0
            })
            .unwrap();
        let second = k
            .create_thread(rank(NORMAL), move || {
                b.push("second");
                0
            })
            .unwrap();

        k.pass(second);
        assert_eq!(log.events(), ["second"]);

        // Passing to a finished thread is ignored
        k.pass(second);
        k.join(first).unwrap();
        k.join(second).unwrap();
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["second", "first"]);
}

#[test]
fn test_yield_rotates_equal_ranks() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, priority(), move |k| {
        let mut threads = Vec::new();
        for name in ["a", "b"] {
            let log = log.clone();
            let kernel = k.clone();
            threads.push(
                k.create_thread(rank(NORMAL), move || {
                    for i in 0..3 {
                        log.push(format!("{}{}", name, i));
                        kernel.yield_now();
                    }
                    0
                })
                .unwrap(),
            );
        }
        for t in threads {
            k.join(t).unwrap();
        }
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["a0", "b0", "a1", "b1", "a2", "b2"]);
}

#[test]
fn test_round_robin_slices_equal_ranks() {
    let config = KernelConfig::new(Policy::RoundRobin).with_quantum(2_000);
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, config, move |k| {
        let mut threads = Vec::new();
        for name in ["a", "b"] {
            let log = log.clone();
            let kernel = k.clone();
            let config = ThreadConfig::new(Criterion::new(Policy::RoundRobin, NORMAL));
            threads.push(
                k.create_thread(config, move || {
                    for i in 0..3 {
                        log.push(format!("{}{}", name, i));
                        kernel.platform().work(2);
                    }
                    0
                })
                .unwrap(),
            );
        }
        for t in threads {
            k.join(t).unwrap();
        }
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["a0", "b0", "a1", "b1", "a2", "b2"]);
}

#[test]
fn test_destroy_and_introspection() {
    let report = run(1, priority(), |k| {
        let before = k.thread_count();
        let parked = k.create_thread(rank(10).suspended(), || 7).unwrap();
        assert_eq!(k.thread_count(), before + 1);
        k.destroy(parked).unwrap();
        assert_eq!(k.state(parked), None);
        assert_eq!(k.thread_count(), before);
        assert_eq!(
            k.destroy(parked),
            Err(SchedulerError::ThreadNotFound { thread: parked })
        );

        let done = k.create_thread(rank(10), || 3).unwrap();
        assert_eq!(k.join(done), Ok(3));
        let stats = k.stats(done).unwrap();
        assert_eq!(stats.dispatches, 1);
        k.destroy(done).unwrap();

        let snapshot = k.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot
            .iter()
            .any(|t| t.criterion.rank() == IDLE && t.state == ThreadState::Ready));
        assert!(snapshot
            .iter()
            .any(|t| t.id == k.running() && t.state == ThreadState::Running));
        0
    });
    report.assert_clean();
}

#[test]
fn test_destroyed_joiner_leaves_no_stale_join() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, priority(), move |k| {
        let l = log.clone();
        let target = k
            .create_thread(rank(10).suspended(), move || {
                l.push("target");
                1
            })
            .unwrap();
        let kernel = k.clone();
        let joiner = k
            .create_thread(rank(5), move || {
                let _ = kernel.join(target);
                0
            })
            .unwrap();

        // Let the joiner park on the target, then reclaim it
        k.yield_now();
        assert_eq!(k.state(joiner), Some(ThreadState::Suspended));
        k.destroy(joiner).unwrap();

        // The freed slot is handed out again
        let l = log.clone();
        let fresh = k
            .create_thread(rank(1).suspended(), move || {
                l.push("fresh");
                0
            })
            .unwrap();
        assert_eq!(fresh, joiner);

        k.resume(target);
        assert_eq!(k.join(target), Ok(1));
        assert_eq!(k.state(fresh), Some(ThreadState::Suspended));
        k.destroy(fresh).unwrap();
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["target"]);
}

#[test]
fn test_set_priority_reorders_ready_threads() {
    let trace = Trace::new();
    let log = trace.clone();
    let report = run(1, priority(), move |k| {
        let mut threads = Vec::new();
        for (name, r) in [("a", 30), ("b", 20), ("c", 10)] {
            let l = log.clone();
            threads.push(
                k.create_thread(rank(r), move || {
                    l.push(name);
                    0
                })
                .unwrap(),
            );
        }

        // Still behind MAIN, but now ahead of the others
        k.set_priority(threads[0], Criterion::new(Policy::Priority, 5))
            .unwrap();
        assert_eq!(k.priority(threads[0]), Some(5));
        assert!(log.events().is_empty());

        for t in threads {
            k.join(t).unwrap();
        }
        0
    });
    report.assert_clean();
    assert_eq!(trace.events(), ["a", "c", "b"]);
}

#[test]
fn test_policy_mismatch_is_rejected() {
    let kernel = Kernel::new(Host::new(1), priority()).unwrap();
    let config = ThreadConfig::new(Criterion::new(Policy::Fcfs, NORMAL));
    assert_eq!(
        kernel.create_thread(config, || 0),
        Err(SchedulerError::PolicyMismatch {
            expected: Policy::Priority,
            found: Policy::Fcfs,
        })
    );
}

#[test]
fn test_invalid_configuration_is_rejected() {
    assert!(matches!(
        Kernel::new(Host::new(0), priority()),
        Err(SchedulerError::InvalidConfiguration { .. })
    ));
    assert!(matches!(
        Kernel::new(
            Host::new(1),
            KernelConfig::new(Policy::RoundRobin).with_quantum(0)
        ),
        Err(SchedulerError::InvalidConfiguration { .. })
    ));
}
