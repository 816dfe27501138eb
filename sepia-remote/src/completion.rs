//! # Completion Tag
//!
//! A [`Completion`] represents one outstanding asynchronous operation handed
//! to the transport. When the transport takes the operation off its internal
//! queue it fills in the tag's message/status slots and calls
//! [`Completion::complete`], which re-posts the tag's handler onto the worker
//! queue.
//!
//! The call side can [`Completion::cancel`] the tag (the handler will never
//! run) and [`Completion::wait_until_off_queue`] for the transport to be done
//! with it. The wait is the one intentionally blocking primitive in this
//! crate; it is what makes synchronous call teardown possible.
use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;
use tonic::Status;

use crate::queue::WorkerQueue;

/// The message and status slots a transport fills in before completing a tag.
#[derive(Default)]
pub struct CompletionData {
    message: Option<Bytes>,
    status: Option<Status>,
}

impl CompletionData {
    /// Takes the response buffer out of the tag, if the transport stored one.
    pub fn take_message(&mut self) -> Option<Bytes> {
        self.message.take()
    }

    /// Takes the terminal status out of the tag, if the transport stored one.
    pub fn take_status(&mut self) -> Option<Status> {
        self.status.take()
    }
}

type Handler = Box<dyn FnOnce(bool, &mut CompletionData) + Send + 'static>;

/// A shared handle to one outstanding transport operation.
///
/// The transport holds one clone, the issuing call holds another. Every tag
/// handed to a transport must eventually be completed exactly once, even
/// after cancellation; completing a tag twice is a fatal contract violation.
#[derive(Clone)]
pub struct Completion {
    shared: Arc<Shared>,
}

struct Shared {
    queue: WorkerQueue,
    handler: Mutex<Option<Handler>>,
    data: Mutex<CompletionData>,
    off_queue: Mutex<bool>,
    off_queue_signal: Condvar,
}

impl Completion {
    /// Creates a tag whose handler runs on `queue` once the transport
    /// completes the operation.
    pub fn new(
        queue: &WorkerQueue,
        handler: impl FnOnce(bool, &mut CompletionData) + Send + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: queue.clone(),
                handler: Mutex::new(Some(Box::new(handler))),
                data: Mutex::new(CompletionData::default()),
                off_queue: Mutex::new(false),
                off_queue_signal: Condvar::new(),
            }),
        }
    }

    /// Stores the response buffer for the handler to pick up.
    pub fn set_message(&self, message: Bytes) {
        self.shared.data.lock().unwrap().message = Some(message);
    }

    /// Stores the terminal status for the handler to pick up.
    pub fn set_status(&self, status: Status) {
        self.shared.data.lock().unwrap().status = Some(status);
    }

    /// Called by the transport once the operation has come off its queue.
    ///
    /// Unblocks any [`wait_until_off_queue`](Self::wait_until_off_queue)
    /// caller first, then dispatches the handler onto the worker queue. The
    /// dispatch re-checks the handler slot at run time, so a cancellation
    /// that lands in between still suppresses it.
    pub fn complete(&self, ok: bool) {
        {
            let mut off = self.shared.off_queue.lock().unwrap();
            assert!(!*off, "completion completed twice");
            *off = true;
            self.shared.off_queue_signal.notify_all();
        }
        let shared = Arc::clone(&self.shared);
        self.shared.queue.enqueue(move || {
            let handler = shared.handler.lock().unwrap().take();
            if let Some(handler) = handler {
                let mut data = shared.data.lock().unwrap();
                handler(ok, &mut data);
            }
        });
    }

    /// Prevents the handler from ever running. The transport still owns the
    /// operation and will still complete the tag.
    pub fn cancel(&self) {
        self.shared.handler.lock().unwrap().take();
    }

    /// Blocks until the transport has completed this tag.
    ///
    /// The off-queue signal is raised before the handler is dispatched, so
    /// waiting from the worker thread itself cannot deadlock.
    pub fn wait_until_off_queue(&self) {
        let mut off = self.shared.off_queue.lock().unwrap();
        while !*off {
            off = self.shared.off_queue_signal.wait(off).unwrap();
        }
    }
}
