//! # Unary Call
//!
//! Drives a single request / single response exchange. `start` registers the
//! one "finish" completion up front; the transport's combined call path
//! handles the request and response internally, so the finish completion is
//! the only event the call ever sees.
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tonic::Status;
use tonic::metadata::MetadataMap;
use tracing::debug;

use crate::completion::{Completion, CompletionData};
use crate::queue::WorkerQueue;
use crate::transport::UnaryChannel;

/// The terminal callback: response buffer plus final status.
pub type UnaryCallback = Box<dyn FnOnce(Bytes, Status) + Send + 'static>;

/// A single request / single response call.
///
/// Drive it from the worker queue: `start` once, then either let the
/// terminal callback fire or `cancel` before dropping.
pub struct UnaryCall<C: UnaryChannel> {
    inner: Arc<UnaryInner<C>>,
}

struct UnaryInner<C> {
    channel: Mutex<C>,
    queue: WorkerQueue,
    state: Mutex<UnaryState>,
}

struct UnaryState {
    started: bool,
    finish_completion: Option<Completion>,
    callback: Option<UnaryCallback>,
}

impl<C: UnaryChannel> UnaryCall<C> {
    /// Wraps a transport channel. The request buffer was moved into the
    /// channel when it was created; it is sent when the call starts.
    pub fn new(channel: C, queue: WorkerQueue) -> Self {
        Self {
            inner: Arc::new(UnaryInner {
                channel: Mutex::new(channel),
                queue,
                state: Mutex::new(UnaryState {
                    started: false,
                    finish_completion: None,
                    callback: None,
                }),
            }),
        }
    }

    /// Begins the exchange. `callback` is invoked exactly once on the worker
    /// queue with the response buffer and the final status, unless the call
    /// is cancelled first, in which case it is never invoked.
    ///
    /// Starting a call twice is a fatal misuse.
    pub fn start(&mut self, callback: impl FnOnce(Bytes, Status) + Send + 'static) {
        let completion = {
            let mut state = self.inner.state.lock().unwrap();
            assert!(!state.started, "unary call started twice");
            state.started = true;
            state.callback = Some(Box::new(callback));

            let inner = Arc::clone(&self.inner);
            let completion = Completion::new(&self.inner.queue, move |ok, data| {
                inner.on_finish(ok, data);
            });
            state.finish_completion = Some(completion.clone());
            completion
        };

        let mut channel = self.inner.channel.lock().unwrap();
        channel.start_call();
        channel.finish(completion);
    }

    /// Aborts the exchange. No-op if nothing is pending (never started, or
    /// already finished). Otherwise blocks until the in-flight completion has
    /// drained from the transport; once this returns, the terminal callback
    /// will not fire. Idempotent.
    pub fn cancel(&mut self) {
        let completion = self.inner.state.lock().unwrap().finish_completion.take();
        let Some(completion) = completion else {
            return;
        };
        debug!("cancelling unary call");
        self.inner.channel.lock().unwrap().try_cancel();
        completion.cancel();
        // This blocks.
        completion.wait_until_off_queue();
    }

    /// The server's initial metadata. Only meaningful once the call has been
    /// started; empty before the response arrives.
    pub fn response_headers(&self) -> MetadataMap {
        self.inner.channel.lock().unwrap().response_headers()
    }
}

impl<C> UnaryInner<C> {
    fn on_finish(&self, _ok: bool, data: &mut CompletionData) {
        // The status slot is a strict superset of the low-level ok flag; both
        // values of the flag finalize the call the same way.
        let callback = {
            let mut state = self.state.lock().unwrap();
            // The callback may drop the call; the pending handle must already
            // be clear by then.
            state.finish_completion = None;
            state.callback.take()
        };
        let Some(callback) = callback else { return };

        let message = data.take_message().unwrap_or_default();
        let status = data
            .take_status()
            .unwrap_or_else(|| Status::unavailable("call terminated by the transport"));
        debug!(code = ?status.code(), "unary call finished");
        callback(message, status);
    }
}

impl<C: UnaryChannel> Drop for UnaryCall<C> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let state = self.inner.state.lock().unwrap();
        assert!(
            state.finish_completion.is_none(),
            "unary call dropped with a completion pending; cancel() first"
        );
    }
}
