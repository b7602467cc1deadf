//! The worker-thread pool and its shared submission handle.
//!
//! # Queue protocol
//!
//! One mutex guards the task queue and is held only while a task is
//! encoded into it or decoded out of it; task bodies always run unlocked.
//! Two condition variables split the wake-ups: `work_available` wakes idle
//! workers, `drained` wakes threads blocked in [`ThreadPool::wait`].
//!
//! A task is counted as active from the moment it is popped (under the
//! lock) until it has finished running, so "queue empty and nothing
//! active" checked under the lock means every submitted task has completed.
//! Tasks run by a waiting thread (self-stealing) are counted the same way.

use std::any::Any;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use kiln_arena::{Arena, ArenaConfig, ArenaError};
use kiln_ring::RingBuffer;
use tracing::{debug, trace, warn};

use crate::config::{PoolConfig, WorkerHook};
use crate::context::WorkerContext;
use crate::error::{PoolError, SubmitError};
use crate::stats::{PoolStats, StatsCounters};
use crate::task::{
    call_arc, call_closure, call_ref, InlineBuf, PoppedTask, RawTaskFn, Task, TaskHeader,
    TaskQueue, HEADER_SIZE, PAYLOAD_ALIGN,
};

// ── Shared state ─────────────────────────────────────────────────

struct Shared {
    queue: Mutex<TaskQueue>,
    work_available: Condvar,
    drained: Condvar,
    active: AtomicUsize,
    shutdown: AtomicBool,
    /// Next free thread index. Starts at 1 (the owner is 0) and is bumped
    /// by each worker once it is ready, so during startup it doubles as
    /// the readiness barrier. External contexts take indices from it after.
    ids: AtomicUsize,
    failed: AtomicUsize,
    thread_count: usize,
    queue_capacity: usize,
    arena: ArenaConfig,
    submit_timeout: Option<Duration>,
    on_worker_start: Option<WorkerHook>,
    on_worker_stop: Option<WorkerHook>,
    stats: StatsCounters,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_task(
        &self,
        header: TaskHeader,
        payload: &[MaybeUninit<u8>],
    ) -> Result<(), SubmitError> {
        if self.thread_count == 0 {
            return Err(SubmitError::NoWorkers);
        }
        let max = self.queue_capacity.saturating_sub(HEADER_SIZE);
        if payload.len() > max {
            return Err(SubmitError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        let encoded = header.encode();
        let started = Instant::now();
        loop {
            {
                let mut queue = self.lock_queue();
                if self.shutdown.load(Ordering::Acquire) {
                    return Err(SubmitError::Shutdown);
                }
                if queue.push_vectored(&[&encoded[..], payload]).is_ok() {
                    StatsCounters::bump(&self.stats.submitted);
                    drop(queue);
                    self.work_available.notify_one();
                    return Ok(());
                }
            }
            if let Some(timeout) = self.submit_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(SubmitError::QueueFull { waited });
                }
            }
            thread::yield_now();
        }
    }

    /// Pop and run tasks on the calling thread until the queue is empty.
    fn steal(&self, ctx: &mut WorkerContext) -> usize {
        let mut inline = InlineBuf::new();
        let mut count = 0;
        loop {
            let task = {
                let mut queue = self.lock_queue();
                if queue.is_empty() {
                    return count;
                }
                self.active.fetch_add(1, Ordering::AcqRel);
                // SAFETY: the queue is non-empty and holds only whole tasks.
                unsafe { PoppedTask::pop(&mut queue, &mut inline, ctx.arena()) }
            };
            StatsCounters::bump(&self.stats.stolen);
            self.execute(task, &mut inline, ctx);
            self.finish_one();
            count += 1;
        }
    }

    fn work_loop(&self, ctx: &mut WorkerContext) {
        let mut inline = InlineBuf::new();
        loop {
            let task = {
                let mut queue = self.lock_queue();
                while queue.is_empty() && !self.shutdown.load(Ordering::Acquire) {
                    queue = self
                        .work_available
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                // Shutting down: leave once the queue is drained.
                if queue.is_empty() {
                    return;
                }
                self.active.fetch_add(1, Ordering::AcqRel);
                // SAFETY: the queue is non-empty and holds only whole tasks.
                unsafe { PoppedTask::pop(&mut queue, &mut inline, ctx.arena()) }
            };
            self.execute(task, &mut inline, ctx);
            self.finish_one();
        }
    }

    fn execute(&self, task: PoppedTask, inline: &mut InlineBuf, ctx: &mut WorkerContext) {
        if task.used_heap() {
            StatsCounters::bump(&self.stats.heap_fallbacks);
            warn!(
                thread = ctx.thread_index(),
                "scratch arena exhausted, task payload decoded on the heap"
            );
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(inline, ctx)));
        match outcome {
            Ok(()) => StatsCounters::bump(&self.stats.executed),
            Err(payload) => {
                StatsCounters::bump(&self.stats.panicked);
                warn!(
                    thread = ctx.thread_index(),
                    panic = panic_message(&*payload),
                    "task panicked"
                );
            }
        }
    }

    fn finish_one(&self) {
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "active task count underflow");
        let queue = self.lock_queue();
        if queue.is_empty() && self.active.load(Ordering::Acquire) == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut queue = self.lock_queue();
        while !queue.is_empty() || self.active.load(Ordering::Acquire) > 0 {
            queue = self
                .drained
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn signal_shutdown(&self) {
        {
            let _queue = self.lock_queue();
            self.shutdown.store(true, Ordering::Release);
        }
        self.work_available.notify_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn worker_main(shared: Arc<Shared>, index: usize) {
    let arena = match Arena::with_config(&shared.arena) {
        Ok(arena) => arena,
        Err(err) => {
            warn!(index, %err, "worker arena creation failed");
            shared.failed.fetch_add(1, Ordering::AcqRel);
            return;
        }
    };
    let mut ctx = WorkerContext::new(
        arena,
        index,
        PoolHandle {
            shared: Arc::clone(&shared),
        },
    );
    if let Some(hook) = shared.on_worker_start.clone() {
        if panic::catch_unwind(AssertUnwindSafe(|| hook(&mut ctx))).is_err() {
            warn!(index, "worker start hook panicked");
            shared.failed.fetch_add(1, Ordering::AcqRel);
            return;
        }
    }
    shared.ids.fetch_add(1, Ordering::AcqRel);
    trace!(index, "worker ready");

    shared.work_loop(&mut ctx);

    if let Some(hook) = shared.on_worker_stop.clone() {
        hook(&mut ctx);
    }
    trace!(index, "worker stopped");
}

// ── PoolHandle ───────────────────────────────────────────────────

/// Cloneable submission handle, usable from any thread (including from
/// inside tasks via [`WorkerContext::pool`]).
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// Submit a closure. Its captured state is copied into the queue by
    /// value; no heap allocation happens per task.
    ///
    /// Spins while the queue is transiently full, up to the configured
    /// `submit_timeout`. On error the closure is dropped without running.
    ///
    /// Closures must not require more than 16-byte alignment (checked at
    /// compile time).
    pub fn add<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce(&mut WorkerContext) + Send + 'static,
    {
        const {
            assert!(
                mem::align_of::<F>() <= PAYLOAD_ALIGN,
                "task closures must not require more than 16-byte alignment"
            )
        };
        let task = ManuallyDrop::new(task);
        // SAFETY: any value's bytes, padding included, are valid as
        // `MaybeUninit<u8>`; the slice lives no longer than `task`.
        let bytes = unsafe {
            slice::from_raw_parts(
                (&*task as *const F).cast::<MaybeUninit<u8>>(),
                mem::size_of::<F>(),
            )
        };
        let header = TaskHeader::inline(call_closure::<F>, bytes.len());
        match self.shared.push_task(header, bytes) {
            // Ownership moved into the queue.
            Ok(()) => Ok(()),
            Err(err) => {
                drop(ManuallyDrop::into_inner(task));
                Err(err)
            }
        }
    }

    /// Submit a shared task. The pool holds one strong reference until the
    /// task has run.
    pub fn add_arc<T>(&self, task: Arc<T>) -> Result<(), SubmitError>
    where
        T: Task + Send + 'static,
    {
        let raw = Arc::into_raw(task);
        // SAFETY: `Arc::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw.cast_mut()) };
        let result = self
            .shared
            .push_task(TaskHeader::pointer(call_arc::<T>, ptr.cast()), &[]);
        if result.is_err() {
            // SAFETY: the reference leaked above was never enqueued.
            drop(unsafe { Arc::from_raw(raw) });
        }
        result
    }

    /// Submit a task by pointer. Only the pointer is enqueued.
    ///
    /// # Safety
    ///
    /// `task` must stay valid until the task has run, for example until a
    /// [`Future`](crate::Future) it signals has been waited on, or until
    /// [`ThreadPool::wait`] returns.
    pub unsafe fn add_ptr<T: Task>(&self, task: NonNull<T>) -> Result<(), SubmitError> {
        self.shared
            .push_task(TaskHeader::pointer(call_ref::<T>, task.cast()), &[])
    }

    /// Submit a raw entry point with a payload copied into the queue.
    ///
    /// `run` receives a pointer to a 16-byte-aligned copy of `payload`,
    /// valid for the duration of the call.
    ///
    /// # Safety
    ///
    /// `run` must be sound to call with that pointer from any thread.
    pub unsafe fn add_raw(&self, run: RawTaskFn, payload: &[u8]) -> Result<(), SubmitError> {
        // SAFETY: initialised bytes are valid `MaybeUninit<u8>`.
        let bytes = unsafe {
            slice::from_raw_parts(payload.as_ptr().cast::<MaybeUninit<u8>>(), payload.len())
        };
        self.shared
            .push_task(TaskHeader::inline(run, payload.len()), bytes)
    }

    /// Build a context, with its own scratch arena, for a thread the pool
    /// does not own. Such a thread can then wait on futures or run pending
    /// tasks.
    pub fn external_context(&self) -> Result<WorkerContext, ArenaError> {
        let arena = Arena::with_config(&self.shared.arena)?;
        let index = self.shared.ids.fetch_add(1, Ordering::AcqRel);
        Ok(WorkerContext::new(arena, index, self.clone()))
    }

    pub(crate) fn steal(&self, ctx: &mut WorkerContext) -> usize {
        self.shared.steal(ctx)
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count
    }

    /// Usable queue size in bytes.
    pub fn queue_capacity(&self) -> usize {
        self.shared.queue_capacity
    }

    /// Largest inline payload a single task can carry.
    pub fn max_payload(&self) -> usize {
        self.shared.queue_capacity.saturating_sub(HEADER_SIZE)
    }

    /// Whether the pool has begun shutting down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Snapshot of the task counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats.snapshot()
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("thread_count", &self.shared.thread_count)
            .field("queue_capacity", &self.shared.queue_capacity)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ── ShutdownReport ───────────────────────────────────────────────

/// Summary of a pool shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Total time spent in the shutdown sequence.
    pub total_ms: u64,
    /// Time spent draining outstanding tasks.
    pub drain_ms: u64,
    /// Worker threads joined cleanly.
    pub workers_joined: usize,
    /// Worker threads that exited by panicking (outside any task).
    pub workers_panicked: usize,
    /// Tasks that ran to completion over the pool's lifetime.
    pub tasks_executed: u64,
    /// Tasks that panicked over the pool's lifetime.
    pub tasks_panicked: u64,
}

// ── ThreadPool ───────────────────────────────────────────────────

/// A fixed set of worker threads consuming tasks from one shared queue.
///
/// The owning thread keeps a [`WorkerContext`] of its own (index 0) so it
/// can use a scratch arena and help drain the queue in
/// [`wait`](ThreadPool::wait). Dropping the pool waits for every queued
/// task, then stops and joins the workers.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use kiln_pool::{PoolConfig, ThreadPool};
///
/// let mut pool = ThreadPool::new(PoolConfig::new(2)).unwrap();
/// let hits = Arc::new(AtomicUsize::new(0));
/// for _ in 0..100 {
///     let hits = Arc::clone(&hits);
///     pool.add(move |_ctx| {
///         hits.fetch_add(1, Ordering::Relaxed);
///     })
///     .unwrap();
/// }
/// pool.wait();
/// assert_eq!(hits.load(Ordering::Relaxed), 100);
/// ```
pub struct ThreadPool {
    handle: PoolHandle,
    owner: WorkerContext,
    workers: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl ThreadPool {
    /// Validate `config`, spawn the workers and wait until all of them are
    /// ready (bounded by `config.startup_timeout`).
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let thread_count = config.thread_count;
        let queue_request = if thread_count > 0 {
            config.queue_capacity
        } else {
            1
        };
        let queue = RingBuffer::with_fill(queue_request, MaybeUninit::uninit())?;
        let arena = config.arena_config();
        let owner_arena = Arena::with_config(&arena)?;

        let shared = Arc::new(Shared {
            queue_capacity: queue.capacity(),
            queue: Mutex::new(queue),
            work_available: Condvar::new(),
            drained: Condvar::new(),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            ids: AtomicUsize::new(1),
            failed: AtomicUsize::new(0),
            thread_count,
            arena,
            submit_timeout: config.submit_timeout,
            on_worker_start: config.on_worker_start,
            on_worker_stop: config.on_worker_stop,
            stats: StatsCounters::default(),
        });
        let handle = PoolHandle { shared };
        let mut pool = Self {
            owner: WorkerContext::new(owner_arena, 0, handle.clone()),
            handle,
            workers: Vec::with_capacity(thread_count),
            stopped: false,
        };
        pool.start(config.startup_timeout)?;
        Ok(pool)
    }

    fn start(&mut self, timeout: Duration) -> Result<(), PoolError> {
        let shared = Arc::clone(&self.handle.shared);
        let expected = shared.thread_count;
        for index in 1..=expected {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("kiln-worker-{index}"))
                .spawn(move || worker_main(worker_shared, index));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(source) => {
                    self.shutdown();
                    return Err(PoolError::Spawn { index, source });
                }
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            let ready = shared.ids.load(Ordering::Acquire) - 1;
            let failed = shared.failed.load(Ordering::Acquire);
            if ready + failed >= expected {
                if failed > 0 {
                    self.shutdown();
                    return Err(PoolError::WorkerInit { failed });
                }
                break;
            }
            if Instant::now() >= deadline {
                // Stuck workers cannot be joined; detach them. They exit on
                // their own once they reach the work loop.
                shared.signal_shutdown();
                self.workers.clear();
                self.stopped = true;
                return Err(PoolError::StartupTimeout {
                    ready,
                    expected,
                    timeout,
                });
            }
            thread::yield_now();
        }

        debug!(
            threads = expected,
            queue_capacity = shared.queue_capacity,
            "thread pool started"
        );
        Ok(())
    }

    /// The submission handle shared by this pool's contexts.
    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    /// See [`PoolHandle::add`].
    pub fn add<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce(&mut WorkerContext) + Send + 'static,
    {
        self.handle.add(task)
    }

    /// See [`PoolHandle::add_arc`].
    pub fn add_arc<T>(&self, task: Arc<T>) -> Result<(), SubmitError>
    where
        T: Task + Send + 'static,
    {
        self.handle.add_arc(task)
    }

    /// See [`PoolHandle::add_ptr`].
    ///
    /// # Safety
    ///
    /// As for [`PoolHandle::add_ptr`].
    pub unsafe fn add_ptr<T: Task>(&self, task: NonNull<T>) -> Result<(), SubmitError> {
        // SAFETY: forwarded; the caller upholds the contract.
        unsafe { self.handle.add_ptr(task) }
    }

    /// See [`PoolHandle::add_raw`].
    ///
    /// # Safety
    ///
    /// As for [`PoolHandle::add_raw`].
    pub unsafe fn add_raw(&self, run: RawTaskFn, payload: &[u8]) -> Result<(), SubmitError> {
        // SAFETY: forwarded; the caller upholds the contract.
        unsafe { self.handle.add_raw(run, payload) }
    }

    /// The owner thread's context (thread index 0).
    pub fn context(&mut self) -> &mut WorkerContext {
        &mut self.owner
    }

    /// The owner thread's scratch arena.
    pub fn arena(&self) -> &Arena {
        self.owner.arena()
    }

    /// Block until every submitted task has finished.
    ///
    /// The calling thread first runs queued tasks itself, then sleeps until
    /// the workers are idle. Returns immediately for a pool with no workers.
    pub fn wait(&mut self) {
        let shared = Arc::clone(&self.handle.shared);
        if shared.thread_count == 0 {
            return;
        }
        shared.steal(&mut self.owner);
        shared.wait_idle();
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.handle.thread_count()
    }

    /// Snapshot of the task counters.
    pub fn stats(&self) -> PoolStats {
        self.handle.stats()
    }

    /// Drain the queue, stop the workers and join them.
    ///
    /// Idempotent: later calls return an empty report.
    ///
    /// # Panics
    ///
    /// Panics if tasks are still counted as active after every worker has
    /// been joined (another thread is still running tasks through an
    /// external context).
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.stopped {
            return ShutdownReport::default();
        }
        let start = Instant::now();
        self.wait();
        let drain_ms = start.elapsed().as_millis() as u64;
        self.stopped = true;

        let shared = Arc::clone(&self.handle.shared);
        shared.signal_shutdown();

        let mut workers_joined = 0;
        let mut workers_panicked = 0;
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(()) => workers_joined += 1,
                Err(_) => workers_panicked += 1,
            }
        }
        assert_eq!(
            shared.active.load(Ordering::Acquire),
            0,
            "tasks still active after all workers joined"
        );

        let stats = shared.stats.snapshot();
        let report = ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            drain_ms,
            workers_joined,
            workers_panicked,
            tasks_executed: stats.executed,
            tasks_panicked: stats.panicked,
        };
        debug!(
            workers_joined,
            workers_panicked,
            tasks_executed = stats.executed,
            total_ms = report.total_ms,
            "thread pool stopped"
        );
        report
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("handle", &self.handle)
            .field("workers", &self.workers.len())
            .field("stopped", &self.stopped)
            .finish()
    }
}
