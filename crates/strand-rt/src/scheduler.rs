// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fiber-based job scheduler.
//!
//! N worker threads (the thread calling `begin`/`stop` is worker 0) share
//! one LIFO task pool. Each worker converts its thread into a background
//! fiber, borrows a fiber from the idle list, and lets that fiber drain the
//! pool before switching back. Idle workers park on a condvar until a task
//! is enqueued or the scheduler is stopping with nothing left in flight.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use strand_fiber::{is_thread_converted, yield_to_thread, Fiber, FiberError};

use crate::binding;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::pool::{FiberArena, FiberId};
use crate::queue::TaskPool;
use crate::sync::lock;
use crate::task::Task;
use crate::worker::SlaveWorker;

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Handle to a scheduler. Cheap to clone; tasks capture a clone to
/// enqueue follow-up work.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) shared: Arc<Shared>,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Configured worker threads, including worker 0.
    pub workers: usize,
    /// Tasks ever enqueued.
    pub total_tasks: u64,
    /// Enqueued and not yet finished.
    pub pending_tasks: usize,
    /// Waiting in the pool, not yet pulled by a fiber.
    pub queued_tasks: usize,
    /// Pool fibers created so far. Never shrinks.
    pub fibers_created: usize,
    /// Pool fibers currently parked on the idle list.
    pub idle_fibers: usize,
}

/// State shared between handles, worker threads and pool fibers.
pub(crate) struct Shared {
    config: Mutex<SchedulerConfig>,
    tasks: TaskPool,
    fibers: FiberArena,
    total: AtomicU64,
    pending: AtomicUsize,
    running: AtomicBool,
    stopping: AtomicBool,
    /// Parks idle workers. Notified under the lock so no wakeup is lost.
    work_available: (Mutex<()>, Condvar),
    /// Join handles of workers 1..N.
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// First task panic since the last `stop`.
    panic: Mutex<Option<PanicPayload>>,
}

impl Scheduler {
    /// A scheduler that is not running yet. The config is validated by
    /// [`begin`](Self::begin).
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Mutex::new(config),
                tasks: TaskPool::new(),
                fibers: FiberArena::new(),
                total: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                work_available: (Mutex::new(()), Condvar::new()),
                workers: Mutex::new(Vec::new()),
                panic: Mutex::new(None),
            }),
        }
    }

    /// Validate and store a new configuration.
    ///
    /// # Panics
    ///
    /// If the scheduler is running.
    pub fn setup_config(&self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        assert!(
            !self.is_running(),
            "setup_config: scheduler is running; stop it first"
        );
        config.validate()?;
        *lock(&self.shared.config) = config;
        Ok(())
    }

    pub fn config(&self) -> SchedulerConfig {
        lock(&self.shared.config).clone()
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.shared.config).worker_threads
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Register as the process-wide scheduler behind
    /// [`schedule_parallel`](crate::schedule_parallel).
    ///
    /// # Panics
    ///
    /// If any scheduler is already bound.
    pub fn bind(&self) {
        binding::bind(&self.shared);
    }

    /// # Panics
    ///
    /// If this scheduler is not the bound one.
    pub fn unbind(&self) {
        binding::unbind(&self.shared);
    }

    /// The bound scheduler.
    ///
    /// # Panics
    ///
    /// If no scheduler is bound.
    pub fn bound() -> Scheduler {
        Self::try_bound().unwrap_or_else(|| panic!("bound: no scheduler is bound"))
    }

    pub fn try_bound() -> Option<Scheduler> {
        binding::bound().map(|shared| Scheduler { shared })
    }

    /// Start workers 1..N on new threads, then run one drain pass on the
    /// calling thread as worker 0.
    ///
    /// Workers hold the scheduler alive until [`stop`](Self::stop).
    ///
    /// # Panics
    ///
    /// If the scheduler is already running, or the calling thread runs as
    /// a fiber (e.g. from inside a task).
    #[tracing::instrument(skip(self), fields(workers = tracing::field::Empty))]
    pub fn begin(&self) -> Result<(), SchedulerError> {
        assert!(
            !is_thread_converted(),
            "begin: cannot be called from inside a fiber"
        );
        let config = self.config();
        config.validate()?;
        assert!(
            !self.shared.running.swap(true, Ordering::AcqRel),
            "begin: scheduler is already running"
        );
        self.shared.stopping.store(false, Ordering::Release);
        tracing::Span::current().record("workers", config.worker_threads);

        for index in 1..config.worker_threads {
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("strand-worker-{}", index))
                .spawn(move || worker_main(shared, index));
            match spawned {
                Ok(handle) => lock(&self.shared.workers).push(handle),
                Err(source) => {
                    self.abort_start();
                    return Err(SchedulerError::Spawn { index, source });
                }
            }
        }

        let mut worker = match SlaveWorker::initialize(self.shared.clone(), 0) {
            Ok(worker) => worker,
            Err(err) => {
                self.abort_start();
                return Err(err.into());
            }
        };
        worker.run_pass();
        drop(worker);

        tracing::debug!(
            workers = config.worker_threads,
            pending = self.shared.pending(),
            "scheduler started"
        );
        Ok(())
    }

    /// Help drain on the calling thread until no task is pending, then
    /// join workers 1..N.
    ///
    /// Every task enqueued before this returns, nested ones included, has
    /// run exactly once. If any task panicked, the first panic is resumed
    /// here once all workers are joined.
    ///
    /// # Panics
    ///
    /// If the scheduler is not running or the calling thread runs as a
    /// fiber.
    #[tracing::instrument(skip(self))]
    pub fn stop(&self) {
        assert!(
            !is_thread_converted(),
            "stop: cannot be called from inside a fiber"
        );
        assert!(self.is_running(), "stop: scheduler is not running");

        self.shared.stopping.store(true, Ordering::Release);
        self.shared.notify_all();

        match SlaveWorker::initialize(self.shared.clone(), 0) {
            Ok(mut worker) => worker.run(),
            Err(err) => {
                tracing::warn!(error = %err, "worker 0 could not convert; draining on the thread");
                self.shared.run_without_fibers();
            }
        }

        self.join_workers();
        self.shared.stopping.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);

        let stats = self.stats();
        tracing::debug!(
            total = stats.total_tasks,
            fibers = stats.fibers_created,
            "scheduler stopped"
        );

        if let Some(payload) = lock(&self.shared.panic).take() {
            panic::resume_unwind(payload);
        }
    }

    /// Queue `task`. Callable from any thread or task, running or not;
    /// tasks enqueued before `begin` run once it starts.
    pub fn enqueue(&self, task: impl Into<Task>) {
        self.shared.enqueue(task.into());
    }

    pub fn stats(&self) -> SchedulerStats {
        let shared = &self.shared;
        SchedulerStats {
            workers: self.worker_count(),
            total_tasks: shared.total.load(Ordering::Acquire),
            pending_tasks: shared.pending(),
            queued_tasks: shared.tasks.len(),
            fibers_created: shared.fibers.created(),
            idle_fibers: shared.fibers.idle(),
        }
    }

    /// Undo a partial `begin`: stop and join whatever was spawned.
    fn abort_start(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.notify_all();
        self.join_workers();
        self.shared.stopping.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
    }

    fn join_workers(&self) {
        let handles: Vec<_> = lock(&self.shared.workers).drain(..).collect();
        for handle in handles {
            if let Err(payload) = handle.join() {
                self.shared.record_panic(payload);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    pub(crate) fn enqueue(&self, task: Task) {
        self.total.fetch_add(1, Ordering::AcqRel);
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tasks.push(task);

        let (mutex, cvar) = &self.work_available;
        let _guard = lock(mutex);
        cvar.notify_one();
    }

    /// Most recently enqueued task, if any.
    pub(crate) fn pull_task(&self) -> Option<Task> {
        self.tasks.pop()
    }

    pub(crate) fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// An idle pool fiber, or a new one if the idle list is empty.
    pub(crate) fn acquire_idle_fiber(self: &Arc<Self>) -> Result<FiberId, FiberError> {
        if let Some(id) = self.fibers.pop_idle() {
            return Ok(id);
        }
        let stack_size = lock(&self.config).fiber_stack_size;
        let weak = Arc::downgrade(self);
        let fiber = Fiber::new(stack_size, move || loop {
            if let Some(shared) = weak.upgrade() {
                let ran = shared.drain();
                tracing::trace!(ran, "pool fiber drained");
            }
            yield_to_thread();
        })?;
        let id = self.fibers.insert(fiber);
        tracing::trace!(?id, stack_size, "pool fiber created");
        Ok(id)
    }

    pub(crate) fn fiber(&self, id: FiberId) -> Arc<Fiber> {
        self.fibers.get(id)
    }

    pub(crate) fn release_fiber(&self, id: FiberId) {
        self.fibers.release(id);
    }

    /// Run tasks until the pool is empty and return how many ran. Out of
    /// line: pool fibers call this after every resume, possibly on a
    /// different thread.
    #[inline(never)]
    pub(crate) fn drain(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pull_task() {
            self.run_task(task);
            ran += 1;
        }
        ran
    }

    fn run_task(&self, task: Task) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            tracing::error!(panic = panic_message(&*payload), "task panicked");
            self.record_panic(payload);
        }
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1
            && self.stopping.load(Ordering::Acquire)
        {
            self.notify_all();
        }
    }

    fn record_panic(&self, payload: PanicPayload) {
        let mut slot = lock(&self.panic);
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    /// Park until there is a task to pull. `false` once the scheduler is
    /// stopping and nothing is pending.
    pub(crate) fn wait_for_work(&self) -> bool {
        let (mutex, cvar) = &self.work_available;
        let mut guard = lock(mutex);
        loop {
            if self.has_tasks() {
                return true;
            }
            if self.stopping.load(Ordering::Acquire) && self.pending() == 0 {
                return false;
            }
            guard = cvar.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Worker loop for a thread that could not be converted.
    pub(crate) fn run_without_fibers(&self) {
        loop {
            let ran = self.drain();
            tracing::trace!(ran, "drained without fibers");
            if !self.wait_for_work() {
                break;
            }
        }
    }

    fn notify_all(&self) {
        let (mutex, cvar) = &self.work_available;
        let _guard = lock(mutex);
        cvar.notify_all();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        binding::forget(self);
    }
}

/// Entry point of worker threads 1..N.
fn worker_main(shared: Arc<Shared>, index: usize) {
    let span = tracing::debug_span!("worker", index);
    let _enter = span.enter();

    match SlaveWorker::initialize(shared.clone(), index) {
        Ok(mut worker) => worker.run(),
        Err(err) => {
            tracing::error!(error = %err, "worker could not convert; draining on the thread");
            shared.run_without_fibers();
        }
    }
    tracing::debug!("worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
