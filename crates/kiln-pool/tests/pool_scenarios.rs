//! End-to-end pool scenarios: completion counting across thread counts,
//! futures (including waits that start before the work is submitted),
//! nested waits on a single worker and scratch-arena use from tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kiln_pool::{Future, SubmitError, ThreadPool};
use kiln_test_utils::{small_pool, small_pool_config, thread_counts, CountingTask, RecordingTask};
use proptest::prelude::*;

// ── Completion ───────────────────────────────────────────────────────

#[test]
fn every_increment_observed_after_wait() {
    for threads in thread_counts() {
        for n in [0usize, 1, 7, 100, 3000] {
            let mut pool = small_pool(threads);
            let counter = Arc::new(AtomicUsize::new(0));
            for _ in 0..n {
                let counter = Arc::clone(&counter);
                pool.add(move |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
            }
            pool.wait();
            assert_eq!(
                counter.load(Ordering::Relaxed),
                n,
                "{n} tasks on {threads} threads"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn stats_account_for_every_task(threads in 1usize..4, n in 0usize..400) {
        let mut pool = small_pool(threads);
        for _ in 0..n {
            pool.add(|_| {}).unwrap();
        }
        pool.wait();
        let stats = pool.stats();
        prop_assert_eq!(stats.submitted, n as u64);
        prop_assert_eq!(stats.finished(), n as u64);
        prop_assert!(stats.stolen <= n as u64);
    }
}

#[test]
fn results_collected_over_channel() {
    let mut pool = small_pool(4);
    let (tx, rx) = crossbeam_channel::unbounded();
    for i in 0..256u64 {
        let tx = tx.clone();
        pool.add(move |_| tx.send(i * i).unwrap()).unwrap();
    }
    drop(tx);
    pool.wait();
    let mut squares: Vec<u64> = rx.iter().collect();
    squares.sort_unstable();
    assert_eq!(squares, (0..256u64).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn tasks_can_submit_more_work() {
    let mut pool = small_pool(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let outer = Arc::clone(&counter);
    pool.add(move |ctx| {
        for _ in 0..50 {
            let counter = Arc::clone(&outer);
            ctx.pool()
                .add(move |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
    })
    .unwrap();
    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), 50);
}

// ── Futures ──────────────────────────────────────────────────────────

#[test]
fn future_waited_before_work_is_added() {
    let pool = small_pool(2);
    let handle = pool.handle().clone();
    let future = Arc::new(Future::new(&handle));

    let waiter = {
        let future = Arc::clone(&future);
        let handle = handle.clone();
        thread::spawn(move || {
            let mut ctx = handle.external_context().unwrap();
            future.wait(&mut ctx);
            future.is_done()
        })
    };

    thread::sleep(Duration::from_millis(20));
    let signal = Arc::clone(&future);
    pool.add(move |_| signal.signal()).unwrap();
    assert!(waiter.join().unwrap());
}

#[test]
fn single_worker_nested_wait_does_not_deadlock() {
    let mut pool = small_pool(1);
    let (tx, rx) = crossbeam_channel::bounded(1);
    pool.add(move |ctx| {
        let inner = Arc::new(Future::new(ctx.pool()));
        let signal = Arc::clone(&inner);
        ctx.pool().add(move |_| signal.signal()).unwrap();
        inner.wait(ctx);
        tx.send(ctx.thread_index()).unwrap();
    })
    .unwrap();
    let index = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(index <= 1);
    pool.wait();
}

#[test]
fn many_futures_across_workers() {
    let mut pool = small_pool(3);
    let futures: Vec<Arc<Future>> = (0..64)
        .map(|_| Arc::new(Future::new(pool.handle())))
        .collect();
    for future in &futures {
        let future = Arc::clone(future);
        pool.add(move |_| future.signal()).unwrap();
    }
    for future in &futures {
        future.wait(pool.context());
        assert!(future.is_done());
    }
}

// ── Shared tasks ─────────────────────────────────────────────────────

#[test]
fn arc_tasks_release_their_reference() {
    let mut pool = small_pool(2);
    let task = Arc::new(CountingTask::new());
    for _ in 0..40 {
        pool.add_arc(Arc::clone(&task)).unwrap();
    }
    pool.wait();
    assert_eq!(task.runs(), 40);
    assert_eq!(Arc::strong_count(&task), 1);
}

#[test]
fn pointer_task_sees_worker_indices() {
    let mut pool = small_pool(2);
    let task = RecordingTask::new();
    for _ in 0..20 {
        // SAFETY: `task` outlives the `wait` below.
        unsafe { pool.add_ptr(std::ptr::NonNull::from(&task)) }.unwrap();
    }
    pool.wait();
    let seen = task.seen();
    assert_eq!(seen.len(), 20);
    assert!(seen.iter().all(|&index| index <= 2));
}

// ── Scratch memory ───────────────────────────────────────────────────

#[test]
fn task_scratch_is_released_after_each_task() {
    let mut pool = small_pool(1);
    let (tx, rx) = crossbeam_channel::unbounded();
    for _ in 0..10 {
        let tx = tx.clone();
        pool.add(move |ctx| {
            let before = ctx.arena().pos();
            {
                let scope = ctx.scope();
                let buf = scope.alloc_slice_copy(&[1u32; 256]).unwrap();
                assert_eq!(buf.iter().sum::<u32>(), 256);
            }
            tx.send((before, ctx.arena().pos())).unwrap();
        })
        .unwrap();
    }
    drop(tx);
    pool.wait();
    for (before, after) in rx.iter() {
        assert_eq!(before, after);
    }
}

#[test]
fn large_closures_survive_the_queue() {
    let mut pool = small_pool(2);
    let (tx, rx) = crossbeam_channel::unbounded();
    for seed in 0..32u8 {
        let tx = tx.clone();
        let block = [seed; 600];
        pool.add(move |_| {
            tx.send(block.iter().all(|&b| b == seed)).unwrap();
        })
        .unwrap();
    }
    drop(tx);
    pool.wait();
    assert_eq!(rx.iter().filter(|&ok| ok).count(), 32);
}

// ── Degenerate pools ─────────────────────────────────────────────────

#[test]
fn zero_thread_pool_rejects_work_but_waits() {
    let mut pool = ThreadPool::new(small_pool_config(0)).unwrap();
    assert_eq!(pool.add(|_| {}), Err(SubmitError::NoWorkers));
    pool.wait();
    let report = pool.shutdown();
    assert_eq!(report.workers_joined, 0);
}

#[test]
fn shutdown_drains_pending_work() {
    let mut pool = small_pool(2);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..500 {
        let counter = Arc::clone(&counter);
        pool.add(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    let report = pool.shutdown();
    assert_eq!(counter.load(Ordering::Relaxed), 500);
    assert_eq!(report.workers_joined, 2);
    assert_eq!(report.tasks_executed, 500);
}
