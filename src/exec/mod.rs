//! Fixed-size worker pool and blocking task handles.
//!
//! The pool drains a single shared FIFO queue, so tasks start in submission
//! order. That ordering is load-bearing: graph tasks block on their inputs'
//! handles, and because every input was submitted (hence dequeued) earlier,
//! the earliest unfinished task always has completed inputs and can run to
//! completion. No pool size ≥ 1 can deadlock under that discipline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};

use crate::{RgError, RgResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of worker threads draining one FIFO task queue.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    /// Pool with `size.max(1)` worker threads.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..size)
            .map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("retrograd-worker-{}", index))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
            size,
        }
    }

    /// Pool sized to the host's logical processor count.
    pub fn with_default_size() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task and return its handle. A panicking task completes its
    /// handle with an execution error instead of hanging its waiters.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> RgResult<T> + Send + 'static,
    {
        let handle = TaskHandle::pending();
        let promise = handle.clone();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|_| Err(RgError::Execution("task panicked".into())));
            promise.complete(result);
        });
        let rejected = match &self.sender {
            Some(sender) => sender.send(job).is_err(),
            None => true,
        };
        if rejected {
            handle.complete(Err(RgError::Execution("worker pool is shut down".into())));
        }
        handle
    }

    /// Drain the queue and join every worker. Called by `Drop`.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("running", &self.sender.is_some())
            .finish()
    }
}

enum TaskState<T> {
    Pending,
    Done(RgResult<T>),
}

struct TaskInner<T> {
    state: Mutex<TaskState<T>>,
    ready: Condvar,
}

/// A multi-consumer blocking future: any number of clones may [`wait`] for
/// the result, each receiving its own copy.
///
/// [`wait`]: TaskHandle::wait
pub struct TaskHandle<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(TaskInner {
                state: Mutex::new(TaskState::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// A handle that is already resolved; used for constants and bindings.
    pub fn completed(value: T) -> Self {
        let handle = Self::pending();
        handle.complete(Ok(value));
        handle
    }

    /// Resolve the handle. The first completion wins; later ones are
    /// ignored.
    pub(crate) fn complete(&self, result: RgResult<T>) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Done(result);
            self.inner.ready.notify_all();
        }
    }

    /// Block until the task resolves and return a copy of its result.
    pub fn wait(&self) -> RgResult<T> {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match &*state {
                TaskState::Done(result) => return result.clone(),
                TaskState::Pending => {
                    state = self
                        .inner
                        .ready
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
    }

    /// The result, if the task has already resolved.
    pub fn try_get(&self) -> Option<RgResult<T>> {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            TaskState::Done(result) => Some(result.clone()),
            TaskState::Pending => None,
        }
    }
}
