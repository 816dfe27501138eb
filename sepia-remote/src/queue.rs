//! # Worker Queue
//!
//! A single-threaded serializing executor. All call-state transitions and
//! user callbacks in this crate run here, which is what makes the call types
//! lock-light: no two callbacks for the same call ever run concurrently.
//!
//! The queue is fed from any thread and drained in FIFO order by one
//! dedicated worker thread.
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use tokio::sync::{mpsc, oneshot};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A cloneable handle to the worker thread. The thread exits once every
/// handle has been dropped and the backlog is drained.
#[derive(Clone)]
pub struct WorkerQueue {
    tx: mpsc::UnboundedSender<Task>,
    worker_thread: Arc<OnceLock<ThreadId>>,
}

impl WorkerQueue {
    /// Spawns the worker thread and returns a handle to it.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let worker_thread = Arc::new(OnceLock::new());
        let id_slot = Arc::clone(&worker_thread);
        thread::Builder::new()
            .name("sepia-worker".into())
            .spawn(move || {
                let _ = id_slot.set(thread::current().id());
                while let Some(task) = rx.blocking_recv() {
                    task();
                }
            })
            .expect("failed to spawn worker queue thread");
        Self { tx, worker_thread }
    }

    /// Submits a task to run after everything already queued. Tasks submitted
    /// after the queue has shut down are silently dropped.
    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(task));
    }

    /// Runs `task` on the queue and blocks the caller until it has finished,
    /// returning its result. Used for tests and synchronous teardown.
    ///
    /// Calling this from the worker thread itself would deadlock and is a
    /// fatal misuse.
    pub fn enqueue_blocking<T: Send + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> T {
        assert!(
            !self.is_worker_thread(),
            "enqueue_blocking called from the worker queue itself"
        );
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(move || {
            let _ = done_tx.send(task());
        });
        done_rx
            .blocking_recv()
            .expect("worker queue shut down before the task ran")
    }

    /// Whether the current thread is the queue's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        self.worker_thread.get().copied() == Some(thread::current().id())
    }
}
