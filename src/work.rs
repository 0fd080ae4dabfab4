use derive_more::Debug;
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    cell::RefCell,
    collections::VecDeque,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread,
};
use thiserror::Error;

/// Error kind for scheduler operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkError {
    /// The context was disposed; no further dispatch is possible.
    #[error("work context has been disposed")]
    Disposed,
    /// `dispose` was called on a context constructed as non-disposable.
    #[error("work context is not disposable")]
    NotDisposable,
    /// The OS refused to start a dedicated worker thread.
    #[error("failed to spawn dedicated worker thread")]
    Spawn(#[from] io::Error),
}

/// How a thread waits for exclusive-section quiescence.
///
/// Exclusive sections are expected to be short, so the default is a plain
/// busy-spin, trading CPU for latency. [`SpinPolicy::Backoff`] bounds the
/// burn with exponentially growing pauses that degrade into yielding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpinPolicy {
    /// Unconditional busy-spin.
    #[default]
    Spin,
    /// Bounded exponential backoff, then cooperative yielding.
    Backoff,
}

const BACKOFF_SPIN_LIMIT: u32 = 6;

#[derive(Debug)]
struct Backoff {
    policy: SpinPolicy,
    step: u32,
}

impl Backoff {
    fn new(policy: SpinPolicy) -> Self {
        Self { policy, step: 0 }
    }

    fn snooze(&mut self) {
        match self.policy {
            SpinPolicy::Spin => core::hint::spin_loop(),
            SpinPolicy::Backoff => {
                if self.step <= BACKOFF_SPIN_LIMIT {
                    for _ in 0..1_u32 << self.step {
                        core::hint::spin_loop();
                    }
                    self.step += 1;
                } else {
                    thread::yield_now();
                }
            }
        }
    }
}

/// Construction-time configuration of a [`WorkContext`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Initial capacity hint for the pending-work queue.
    pub queue_capacity: usize,
    /// Number of dedicated worker threads, started lazily as work arrives.
    /// Zero means every enqueue is dispatched to the rayon fallback pool
    /// instead.
    pub dedicated_threads: usize,
    /// Whether [`WorkContext::dispose`] is permitted. Dropping the context
    /// shuts its workers down regardless.
    pub disposable: bool,
    /// Wait policy for exclusive-section quiescence.
    pub spin_policy: SpinPolicy,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            dedicated_threads: thread::available_parallelism().map_or(1, usize::from),
            disposable: true,
            spin_policy: SpinPolicy::default(),
        }
    }
}

type Action = Box<dyn FnOnce() + Send + 'static>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Per-worker slot naming the item this thread is currently executing,
    /// populated (and restored) by the scheduler around each execution.
    static CURRENT_WORK: RefCell<Option<Work>> = const { RefCell::new(None) };
}

/// A single schedulable unit of work: a cloneable handle observing one
/// enqueued action.
///
/// Lifecycle: created ([`WorkContext::add_work`]) → enqueued
/// ([`Work::start`]) → executing → done (terminal, idempotent, observable
/// from any thread via [`Work::done`]). A body panic is caught by the
/// executing worker and recorded as the item's fault; it never crashes the
/// dispatcher and [`Work::wait`] never rethrows it.
#[must_use]
#[derive(Debug, Clone)]
pub struct Work {
    inner: Arc<WorkInner>,
}

#[derive(Debug)]
struct WorkInner {
    id: u64,
    exclusive: bool,
    context: Weak<ContextInner>,
    #[debug(skip)]
    action: Mutex<Option<Action>>,
    done: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl Work {
    /// Process-unique identifier of this item.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether this item demands sole execution within its context.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.inner.exclusive
    }

    /// Whether the item has finished executing (successfully or faulted).
    #[must_use]
    pub fn done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// The recorded panic message, if the body faulted.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        self.inner.fault.lock().clone()
    }

    /// The item the calling thread is currently executing, if the call
    /// originates from inside a scheduled action.
    #[must_use]
    pub fn current() -> Option<Work> {
        CURRENT_WORK.with(|cell| cell.borrow().clone())
    }

    /// Enqueues the item for execution.
    ///
    /// # Errors
    /// If the owning context has been disposed or dropped, or a worker
    /// thread could not be started.
    pub fn start(&self) -> Result<(), WorkError> {
        let context = self.inner.context.upgrade().ok_or(WorkError::Disposed)?;
        context.schedule(self.clone())
    }

    /// Blocks until the item is done, cooperatively draining the context's
    /// queue: rather than merely sleeping, the calling thread executes
    /// pending items one at a time until this item's done flag is observed.
    ///
    /// # Errors
    /// If the context is disposed before the item completes.
    pub fn wait(&self) -> Result<(), WorkError> {
        let Some(context) = self.inner.context.upgrade() else {
            return if self.done() {
                Ok(())
            } else {
                Err(WorkError::Disposed)
            };
        };
        while !self.done() {
            if !context.do_one_work()? {
                thread::yield_now();
            }
        }
        Ok(())
    }

    /// Runs the body exactly once; later calls are no-ops. Faults are
    /// recorded, the done flag is always set.
    fn run(&self) {
        let Some(action) = self.inner.action.lock().take() else {
            return;
        };
        let previous = CURRENT_WORK.with(|cell| cell.replace(Some(self.clone())));
        let outcome = catch_unwind(AssertUnwindSafe(action));
        CURRENT_WORK.with(|cell| *cell.borrow_mut() = previous);
        if let Err(payload) = outcome {
            *self.inner.fault.lock() = Some(fault_message(payload.as_ref()));
        }
        self.inner.done.store(true, Ordering::Release);
    }
}

fn fault_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "work item panicked".to_owned()
    }
}

/// An in-process work dispatcher: a FIFO queue of pending [`Work`] items
/// served by lazily started dedicated worker threads, with a rayon fallback
/// when configured with none.
///
/// Ordinary items run with no coordination beyond the queue itself; an
/// exclusive item first waits for quiescence of all other in-flight work in
/// the context and holds off new executions for its duration. Enqueue order
/// is FIFO across producers, but completion order across multiple workers is
/// first-available-worker, not deterministic.
#[must_use]
#[derive(Debug)]
pub struct WorkContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    id: u64,
    queue: Mutex<VecDeque<Work>>,
    /// Wakes idle dedicated workers on new work or shutdown.
    signal: Condvar,
    alive: AtomicBool,
    disposable: bool,
    /// The context-wide "exclusion requested" flag.
    wait_request: AtomicBool,
    /// Threads currently inside the dispatch path (dedicated or cooperative).
    active_total: AtomicUsize,
    active_dedicated: AtomicUsize,
    /// Dedicated threads started so far; each is started at most once.
    started: AtomicUsize,
    dedicated: usize,
    spin_policy: SpinPolicy,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkContext {
    /// A context with the given configuration. Dedicated threads are not
    /// started until work is scheduled.
    pub fn new(config: ContextConfig) -> Self {
        let ContextConfig {
            queue_capacity,
            dedicated_threads,
            disposable,
            spin_policy,
        } = config;
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                queue: Mutex::new(VecDeque::with_capacity(queue_capacity)),
                signal: Condvar::new(),
                alive: AtomicBool::new(true),
                disposable,
                wait_request: AtomicBool::new(false),
                active_total: AtomicUsize::new(0),
                active_dedicated: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                dedicated: dedicated_threads,
                spin_policy,
                threads: Mutex::new(Vec::with_capacity(dedicated_threads)),
            }),
        }
    }

    /// A default-configured context with exactly `count` dedicated threads.
    pub fn with_dedicated_threads(count: usize) -> Self {
        Self::new(ContextConfig {
            dedicated_threads: count,
            ..ContextConfig::default()
        })
    }

    /// Process-unique identifier of this context.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Creates a work item bound to this context without enqueuing it.
    pub fn add_work(&self, action: impl FnOnce() + Send + 'static, exclusive: bool) -> Work {
        Work {
            inner: Arc::new(WorkInner {
                id: NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed),
                exclusive,
                context: Arc::downgrade(&self.inner),
                action: Mutex::new(Some(Box::new(action))),
                done: AtomicBool::new(false),
                fault: Mutex::new(None),
            }),
        }
    }

    /// Dequeues and executes at most one pending item on the calling thread,
    /// honoring the exclusion protocol. Returns whether an item was run.
    ///
    /// # Errors
    /// If the context has been disposed.
    pub fn do_one_work(&self) -> Result<bool, WorkError> {
        self.inner.do_one_work()
    }

    /// The number of threads currently inside this context's dispatch path,
    /// including the executing worker itself when read from a work body.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.active_total.load(Ordering::Acquire)
    }

    /// Like [`WorkContext::active_workers`], counting only dedicated worker
    /// threads.
    #[must_use]
    pub fn active_dedicated_workers(&self) -> usize {
        self.inner.active_dedicated.load(Ordering::Acquire)
    }

    /// Whether the context still accepts work.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Marks the context inactive, wakes every dedicated worker until it
    /// observes the shutdown, and joins them. Further dispatch attempts
    /// return [`WorkError::Disposed`].
    ///
    /// # Errors
    /// If the context was constructed as non-disposable.
    pub fn dispose(&self) -> Result<(), WorkError> {
        if !self.inner.disposable {
            return Err(WorkError::NotDisposable);
        }
        self.inner.shutdown();
        Ok(())
    }
}

impl Default for WorkContext {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl Drop for WorkContext {
    fn drop(&mut self) {
        // Threads must never outlive the handle, disposable or not.
        self.inner.shutdown();
    }
}

impl ContextInner {
    fn schedule(self: &Arc<Self>, work: Work) -> Result<(), WorkError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(WorkError::Disposed);
        }
        self.queue.lock().push_back(work);
        if self.dedicated == 0 {
            let context = Arc::clone(self);
            rayon::spawn(move || {
                let _ = context.do_one_work();
            });
            return Ok(());
        }
        loop {
            let started = self.started.load(Ordering::Acquire);
            if started >= self.dedicated {
                // All dedicated threads exist; capacity pressure is absorbed
                // by waking an idle one.
                self.signal.notify_one();
                return Ok(());
            }
            if self
                .started
                .compare_exchange(started, started + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let context = Arc::clone(self);
                let handle = thread::Builder::new()
                    .name(format!("needlework-ctx{}-worker{started}", self.id))
                    .spawn(move || context.worker_loop());
                match handle {
                    Ok(handle) => {
                        self.threads.lock().push(handle);
                        return Ok(());
                    }
                    Err(error) => {
                        self.started.fetch_sub(1, Ordering::AcqRel);
                        return Err(WorkError::Spawn(error));
                    }
                }
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        self.active_total.fetch_add(1, Ordering::AcqRel);
        self.active_dedicated.fetch_add(1, Ordering::AcqRel);
        loop {
            if !self.alive.load(Ordering::Acquire) {
                break;
            }
            // Checked both before dequeuing the next item and, via the next
            // loop turn, after executing one.
            self.honor_exclusion();
            let item = self.queue.lock().pop_front();
            match item {
                Some(work) => self.execute(&work),
                None => {
                    self.active_dedicated.fetch_sub(1, Ordering::AcqRel);
                    self.active_total.fetch_sub(1, Ordering::AcqRel);
                    let mut queue = self.queue.lock();
                    if queue.is_empty() && self.alive.load(Ordering::Acquire) {
                        self.signal.wait(&mut queue);
                    }
                    drop(queue);
                    self.active_total.fetch_add(1, Ordering::AcqRel);
                    self.active_dedicated.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
        self.active_dedicated.fetch_sub(1, Ordering::AcqRel);
        self.active_total.fetch_sub(1, Ordering::AcqRel);
    }

    /// Parks the calling worker outside the active count while an exclusive
    /// item is (or is about to be) running.
    fn honor_exclusion(&self) {
        if self.wait_request.load(Ordering::Acquire) {
            self.active_total.fetch_sub(1, Ordering::AcqRel);
            let mut backoff = Backoff::new(self.spin_policy);
            while self.wait_request.load(Ordering::Acquire) {
                backoff.snooze();
            }
            self.active_total.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn do_one_work(&self) -> Result<bool, WorkError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(WorkError::Disposed);
        }
        let mut backoff = Backoff::new(self.spin_policy);
        while self.wait_request.load(Ordering::Acquire) {
            backoff.snooze();
        }
        self.active_total.fetch_add(1, Ordering::AcqRel);
        let item = self.queue.lock().pop_front();
        let executed = match item {
            Some(work) => {
                self.execute(&work);
                true
            }
            None => false,
        };
        self.active_total.fetch_sub(1, Ordering::AcqRel);
        Ok(executed)
    }

    fn execute(&self, work: &Work) {
        if !work.inner.exclusive {
            work.run();
            return;
        }
        let mut backoff = Backoff::new(self.spin_policy);
        // Claim the exclusion flag. A second worker that dequeued an
        // exclusive item concurrently steps out of the active count while it
        // waits its turn, so the holder's quiescence check can pass.
        while self
            .wait_request
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.active_total.fetch_sub(1, Ordering::AcqRel);
            while self.wait_request.load(Ordering::Acquire) {
                backoff.snooze();
            }
            self.active_total.fetch_add(1, Ordering::AcqRel);
        }
        // Quiescence: every other in-flight worker must drain or park.
        while self.active_total.load(Ordering::Acquire) != 1 {
            backoff.snooze();
        }
        work.run();
        self.wait_request.store(false, Ordering::Release);
    }

    fn shutdown(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in &handles {
            while !handle.is_finished() {
                self.signal.notify_all();
                thread::yield_now();
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
    }
}
