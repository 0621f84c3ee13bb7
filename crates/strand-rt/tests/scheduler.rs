// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end scheduler behaviour: lifecycle, counting, nesting, fiber reuse.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use strand_rt::{Scheduler, SchedulerConfig, Task, MIN_FIBER_STACK_SIZE};

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::new(
        SchedulerConfig::default()
            .with_workers(workers)
            .with_fiber_stack_size(1024 * 1024),
    )
}

fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
    let counter = counter.clone();
    Task::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn begin_stop_without_tasks_terminates() {
    for workers in [1, 2, 4] {
        let sched = scheduler(workers);
        sched.begin().unwrap();
        sched.stop();
        let stats = sched.stats();
        assert_eq!(stats.workers, workers);
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.pending_tasks, 0);
        assert!(!sched.is_running());
    }
}

#[test]
fn task_enqueued_after_begin_runs_once() {
    for workers in [1, 3] {
        let sched = scheduler(workers);
        let counter = Arc::new(AtomicUsize::new(0));
        sched.begin().unwrap();
        sched.enqueue(counting_task(&counter));
        sched.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn every_task_runs_exactly_once() {
    let workers = 4;
    for k in [0, 1, workers, 10 * workers] {
        let sched = scheduler(workers);
        let counter = Arc::new(AtomicUsize::new(0));
        sched.begin().unwrap();
        for _ in 0..k {
            sched.enqueue(counting_task(&counter));
        }
        sched.stop();
        assert_eq!(counter.load(Ordering::SeqCst), k, "k = {}", k);
        assert_eq!(sched.stats().total_tasks, k as u64);
        assert_eq!(sched.stats().pending_tasks, 0);
    }
}

#[test]
fn nested_enqueue_completes_before_stop_returns() {
    let sched = scheduler(2);
    let outer = Arc::new(AtomicUsize::new(0));
    let inner = Arc::new(AtomicUsize::new(0));
    sched.begin().unwrap();

    let (handle, o, i) = (sched.clone(), outer.clone(), inner.clone());
    sched.enqueue(move || {
        o.fetch_add(1, Ordering::SeqCst);
        let i = i.clone();
        handle.enqueue(move || {
            i.fetch_add(1, Ordering::SeqCst);
        });
    });

    sched.stop();
    assert_eq!(outer.load(Ordering::SeqCst), 1);
    assert_eq!(inner.load(Ordering::SeqCst), 1);
}

fn fan_out(sched: Scheduler, depth: u32, leaves: Arc<AtomicUsize>) {
    if depth == 0 {
        leaves.fetch_add(1, Ordering::SeqCst);
        return;
    }
    for _ in 0..2 {
        let (s, l) = (sched.clone(), leaves.clone());
        sched.enqueue(move || fan_out(s, depth - 1, l));
    }
}

#[test]
fn recursive_fan_out_reaches_every_leaf() {
    let sched = scheduler(4);
    let leaves = Arc::new(AtomicUsize::new(0));
    sched.begin().unwrap();
    let (s, l) = (sched.clone(), leaves.clone());
    sched.enqueue(move || fan_out(s, 8, l));
    sched.stop();
    assert_eq!(leaves.load(Ordering::SeqCst), 256);
    // 1 + 2 + 4 + ... + 256
    assert_eq!(sched.stats().total_tasks, 511);
}

#[test]
fn fibers_are_reused_across_batches() {
    let workers = 4;
    let sched = scheduler(workers);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        sched.enqueue(counting_task(&counter));
    }
    sched.begin().unwrap();
    sched.stop();
    let first = sched.stats().fibers_created;
    assert!(first >= 1 && first <= workers, "created {}", first);

    sched.begin().unwrap();
    for _ in 0..100 {
        sched.enqueue(counting_task(&counter));
    }
    sched.stop();

    let stats = sched.stats();
    assert_eq!(counter.load(Ordering::SeqCst), 200);
    assert!(stats.fibers_created <= workers, "created {}", stats.fibers_created);
    assert_eq!(stats.idle_fibers, stats.fibers_created);
}

#[test]
fn enqueue_from_foreign_threads_while_running() {
    let sched = scheduler(3);
    let counter = Arc::new(AtomicUsize::new(0));
    sched.begin().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let (sched, counter) = (sched.clone(), counter.clone());
            thread::spawn(move || {
                for _ in 0..50 {
                    sched.enqueue(counting_task(&counter));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    sched.stop();
    assert_eq!(counter.load(Ordering::SeqCst), 200);
}

#[test]
fn begin_and_stop_can_repeat() {
    let sched = scheduler(2);
    let counter = Arc::new(AtomicUsize::new(0));
    for round in 1..=3 {
        sched.begin().unwrap();
        for _ in 0..10 {
            sched.enqueue(counting_task(&counter));
        }
        sched.stop();
        assert_eq!(counter.load(Ordering::SeqCst), round * 10);
    }
}

#[test]
fn task_panic_is_resumed_by_stop() {
    let sched = scheduler(2);
    let counter = Arc::new(AtomicUsize::new(0));
    sched.begin().unwrap();
    for _ in 0..5 {
        sched.enqueue(counting_task(&counter));
    }
    sched.enqueue(|| panic!("boom"));
    for _ in 0..5 {
        sched.enqueue(counting_task(&counter));
    }

    let err = panic::catch_unwind(AssertUnwindSafe(|| sched.stop())).unwrap_err();
    assert_eq!(err.downcast_ref::<&str>(), Some(&"boom"));
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert!(!sched.is_running());

    // Still usable afterwards, with the panic consumed.
    sched.begin().unwrap();
    sched.enqueue(counting_task(&counter));
    sched.stop();
    assert_eq!(counter.load(Ordering::SeqCst), 11);
}

#[test]
fn task_panic_unwinds_on_smallest_stack() {
    let sched = Scheduler::new(
        SchedulerConfig::default()
            .with_workers(1)
            .with_fiber_stack_size(MIN_FIBER_STACK_SIZE),
    );
    let counter = Arc::new(AtomicUsize::new(0));
    sched.begin().unwrap();
    sched.enqueue(counting_task(&counter));
    sched.enqueue(|| panic!("boom"));
    sched.enqueue(counting_task(&counter));

    let err = panic::catch_unwind(AssertUnwindSafe(|| sched.stop())).unwrap_err();
    assert_eq!(err.downcast_ref::<&str>(), Some(&"boom"));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(sched.stats().fibers_created, 1);
}

#[test]
fn begin_inside_a_task_is_rejected() {
    let sched = scheduler(1);
    sched.begin().unwrap();
    let inner = sched.clone();
    sched.enqueue(move || {
        let _ = inner.begin();
    });

    let err = panic::catch_unwind(AssertUnwindSafe(|| sched.stop())).unwrap_err();
    let message = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or_default();
    assert!(message.contains("inside a fiber"), "got {:?}", message);
}

#[test]
fn independent_schedulers_coexist() {
    let a = scheduler(2);
    let b = scheduler(2);
    let hits = Arc::new(AtomicUsize::new(0));
    a.begin().unwrap();
    b.begin().unwrap();
    for _ in 0..20 {
        a.enqueue(counting_task(&hits));
        b.enqueue(counting_task(&hits));
    }
    a.stop();
    b.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 40);
}
