//! Fixed-size worker pool
//!
//! A set of worker threads pulls tasks from a single FIFO queue. `submit`
//! hands back a [`TaskHandle`] future that resolves to the task's result;
//! handles may be awaited in any order. Tasks in this engine are coarse (one
//! per vector batch), so a shared FIFO queue is sufficient and no
//! work-stealing is attempted.
//!
//! [`WorkerPool::scope`] layers structured parallelism on top: tasks
//! submitted inside a scope may borrow from the caller's stack, and the
//! scope does not return until every one of them has finished.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of worker threads with a FIFO task queue.
///
/// Dropping the pool is a shutdown barrier: the queue is closed, already
/// queued tasks are drained, and every worker is joined.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with `threads` workers.
    ///
    /// `threads == 0` selects the hardware parallelism (floor 1).
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|v| v.get())
                .unwrap_or(1)
        } else {
            threads
        };

        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads)
            .map(|idx| {
                let rx: Receiver<Job> = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("quiver-worker-{idx}"))
                    .spawn(move || worker_loop(rx))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task, returning a future for its result.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.push(Box::new(move || {
            let _ = tx.send(task());
        }));
        TaskHandle { rx }
    }

    /// Run `f` with a [`Scope`] whose tasks may borrow from the enclosing
    /// stack frame. All tasks submitted through the scope have completed by
    /// the time this returns.
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Scope<'_, 'env>) -> R,
    {
        let scope = Scope {
            pool: self,
            pending: Arc::new(Pending::default()),
            env: std::marker::PhantomData,
        };
        // The barrier must hold even if `f` unwinds, otherwise a still-running
        // task could observe a dead borrow.
        let result = catch_unwind(AssertUnwindSafe(|| f(&scope)));
        scope.pending.wait_zero();
        match result {
            Ok(r) => r,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    fn push(&self, job: Job) {
        self.sender
            .as_ref()
            .expect("worker pool already shut down")
            .send(job)
            .expect("worker pool queue closed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the remaining queue and exit.
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("worker task panicked");
        }
    }
}

/// Future for a submitted task's result.
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes and return its result.
    ///
    /// # Panics
    ///
    /// Panics if the task itself panicked.
    pub fn wait(self) -> T {
        self.rx.recv().expect("worker task panicked")
    }
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Pending {
    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn wait_zero(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }
}

/// Decrements the pending counter even when the task unwinds.
struct CompletionGuard(Arc<Pending>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Handle for submitting borrow-carrying tasks; see [`WorkerPool::scope`].
pub struct Scope<'scope, 'env> {
    pool: &'scope WorkerPool,
    pending: Arc<Pending>,
    env: std::marker::PhantomData<&'env mut &'env ()>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    /// Queue a task that may borrow from `'env`.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'static,
    {
        self.pending.increment();
        let guard = CompletionGuard(Arc::clone(&self.pending));
        let (tx, rx) = bounded(1);
        let job: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            let _guard = guard;
            let _ = tx.send(task());
        });
        // SAFETY: `scope` blocks until the pending counter drains to zero, so
        // this closure cannot run after `'env` ends. The transmute only erases
        // that lifetime.
        let job: Job = unsafe { std::mem::transmute(job) };
        self.pool.push(job);
        TaskHandle { rx }
    }
}
