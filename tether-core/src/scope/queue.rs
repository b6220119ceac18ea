//! Task Queues and Deferral
//!
//! The scope tree keeps three queues: the async queue drained at the start
//! of every digest pass, the apply queue flushed inside one coalesced
//! `apply`, and the post-digest queue run once a digest settles.
//!
//! Work that must happen "later" (the digest scheduled by `eval_async`, the
//! coalesced apply flush) goes through a [`Defer`] implementation. The tree
//! never sleeps or spawns on its own.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::Scope;
use crate::error::{Error, Result};

/// Work queued against a scope.
pub type Task = Box<dyn FnOnce(&Scope) -> Result<()> + Send>;

/// Work run after a digest settles.
pub type PostDigestTask = Box<dyn FnOnce() -> Result<()> + Send>;

/// A job handed to a [`Defer`] implementation.
pub type DeferredJob = Box<dyn FnOnce() + Send>;

/// A task together with the scope that queued it.
pub(crate) struct ScopedTask {
    pub scope: Scope,
    pub task: Task,
}

impl ScopedTask {
    pub(crate) fn run(self) {
        if let Err(err) = (self.task)(&self.scope) {
            self.scope.handle_error(err);
        }
    }
}

/// A FIFO shared by the whole tree. The lock is only held to push or pop,
/// never while a task runs.
pub(crate) struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Push and report whether the queue was empty before.
    pub(crate) fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        let was_empty = items.is_empty();
        items.push_back(item);
        was_empty
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Cancels a deferred job. Dropping the handle does not cancel.
pub struct TaskHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl TaskHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Box::new(cancel),
        }
    }

    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskHandle")
    }
}

/// Runs jobs at some later point.
pub trait Defer: Send + Sync {
    fn defer(&self, delay: Duration, job: DeferredJob) -> TaskHandle;
}

/// Deferral driven by the host: jobs run when [`ManualDefer::flush`] is
/// called, in the order they were deferred. Delays are ignored.
#[derive(Clone, Default)]
pub struct ManualDefer {
    jobs: Arc<Mutex<VecDeque<(u64, DeferredJob)>>>,
    next_id: Arc<AtomicU64>,
}

impl ManualDefer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting.
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Run jobs until none are left, including jobs deferred by the jobs
    /// themselves. Returns how many ran.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.jobs.lock().pop_front();
            let Some((id, job)) = next else {
                return ran;
            };
            trace!(job = id, "running deferred job");
            job();
            ran += 1;
        }
    }
}

impl Defer for ManualDefer {
    fn defer(&self, _delay: Duration, job: DeferredJob) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.jobs.lock().push_back((id, job));
        let jobs = Arc::clone(&self.jobs);
        TaskHandle::new(move || {
            jobs.lock().retain(|(queued, _)| *queued != id);
        })
    }
}

impl fmt::Debug for ManualDefer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualDefer")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Deferral on a tokio runtime: each job is a spawned task that sleeps for
/// its delay, and cancelling aborts the task.
///
/// Phases must not overlap, so the runtime should drive the tree from one
/// thread (a current-thread runtime or a `LocalSet`).
#[derive(Clone, Debug)]
pub struct TokioDefer {
    handle: tokio::runtime::Handle,
}

impl TokioDefer {
    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::Scheduler(err.to_string()))?;
        Ok(Self { handle })
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Defer for TokioDefer {
    fn defer(&self, delay: Duration, job: DeferredJob) -> TaskHandle {
        let task = self.handle.spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            job();
        });
        TaskHandle::new(move || task.abort())
    }
}
