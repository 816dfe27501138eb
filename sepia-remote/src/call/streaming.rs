//! # Streaming Reader
//!
//! Drives a single request followed by an unbounded sequence of server
//! responses. The full chain of transport operations is:
//! write -> read -> [read...] -> finish, with never more than one completion
//! in flight.
//!
//! A failed read is not an error in itself: it is the transport's way of
//! saying the server is done sending, normally or otherwise. The reader then
//! issues a finish to learn the terminal status and delivers it together
//! with every response accumulated so far, in receipt order.
use std::mem;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tonic::Status;
use tonic::metadata::MetadataMap;
use tracing::debug;

use crate::completion::{Completion, CompletionData};
use crate::queue::WorkerQueue;
use crate::transport::StreamingChannel;

/// The terminal callback: final status plus the accumulated responses.
pub type StreamingCallback = Box<dyn FnOnce(Status, Vec<Bytes>) + Send + 'static>;

/// A single request / response stream call.
///
/// Drive it from the worker queue: `start` once, then either let the
/// terminal callback fire or `cancel` before dropping.
pub struct StreamingReader<C: StreamingChannel> {
    inner: Arc<ReaderInner<C>>,
}

struct ReaderInner<C> {
    channel: Mutex<C>,
    queue: WorkerQueue,
    state: Mutex<ReaderState>,
}

struct ReaderState {
    phase: Phase,
    completion: Option<Completion>,
    callback: Option<StreamingCallback>,
    request: Option<Bytes>,
    responses: Vec<Bytes>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Writing,
    Reading,
    Finishing,
    Finished,
}

impl<C: StreamingChannel> StreamingReader<C> {
    /// Wraps a transport channel and the request to send. The request buffer
    /// is consumed by the single write issued from `start`.
    pub fn new(channel: C, request: Bytes, queue: WorkerQueue) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                channel: Mutex::new(channel),
                queue,
                state: Mutex::new(ReaderState {
                    phase: Phase::Created,
                    completion: None,
                    callback: None,
                    request: Some(request),
                    responses: Vec::new(),
                }),
            }),
        }
    }

    /// Begins the call and writes the request as the last client message.
    /// `callback` is invoked exactly once on the worker queue with the final
    /// status and the responses in receipt order, unless the call is
    /// cancelled first, in which case it is never invoked.
    ///
    /// Starting a reader twice is a fatal misuse.
    pub fn start(&mut self, callback: impl FnOnce(Status, Vec<Bytes>) + Send + 'static) {
        let (request, completion) = {
            let mut state = self.inner.state.lock().unwrap();
            assert!(
                state.phase == Phase::Created,
                "streaming reader started twice"
            );
            state.phase = Phase::Writing;
            state.callback = Some(Box::new(callback));
            let request = state.request.take().expect("request buffer already consumed");
            let completion = ReaderInner::register_completion(&self.inner, &mut state);
            (request, completion)
        };

        let mut channel = self.inner.channel.lock().unwrap();
        channel.start_call();
        channel.write_last(request, completion);
    }

    /// Aborts the stream. No-op if nothing is pending. Otherwise requests
    /// transport cancellation, drains the in-flight completion, then issues
    /// and drains a finish so the transport releases the call's resources.
    /// Blocks until both are off the transport queue; once this returns, the
    /// terminal callback will not fire. Idempotent.
    pub fn cancel(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        let Some(completion) = state.completion.take() else {
            return;
        };
        debug!(phase = ?state.phase, "cancelling streaming call");
        state.phase = Phase::Finished;

        let mut channel = self.inner.channel.lock().unwrap();
        channel.try_cancel();
        completion.cancel();
        // This blocks.
        completion.wait_until_off_queue();

        // Nobody is interested in the outcome of this finish; it only exists
        // to release the transport's call resources.
        let finish_completion = Completion::new(&self.inner.queue, |_, _| {});
        channel.finish(finish_completion.clone());
        finish_completion.cancel();
        finish_completion.wait_until_off_queue();
    }

    /// The server's initial metadata. Only meaningful once the stream has
    /// been started; empty before it opens.
    pub fn response_headers(&self) -> MetadataMap {
        self.inner.channel.lock().unwrap().response_headers()
    }
}

impl<C: StreamingChannel> ReaderInner<C> {
    fn register_completion(inner: &Arc<Self>, state: &mut ReaderState) -> Completion {
        assert!(
            state.completion.is_none(),
            "creating a completion while the previous one is pending"
        );
        let handler_inner = Arc::clone(inner);
        let completion = Completion::new(&inner.queue, move |ok, data| {
            ReaderInner::on_completion(&handler_inner, ok, data);
        });
        state.completion = Some(completion.clone());
        completion
    }

    fn on_completion(inner: &Arc<Self>, ok: bool, data: &mut CompletionData) {
        let mut deliver = None;
        {
            let mut state = inner.state.lock().unwrap();
            state.completion = None;

            match (state.phase, ok) {
                (Phase::Writing, true) => {
                    state.phase = Phase::Reading;
                    Self::issue_read(inner, &mut state);
                }
                (Phase::Reading, true) => {
                    let response = data.take_message().expect("read completed without a message");
                    state.responses.push(response);
                    Self::issue_read(inner, &mut state);
                }
                (Phase::Writing, false) | (Phase::Reading, false) => {
                    // The server is done sending; fetch the terminal status.
                    state.phase = Phase::Finishing;
                    Self::issue_finish(inner, &mut state);
                }
                (Phase::Finishing, _) => {
                    state.phase = Phase::Finished;
                    let callback = state
                        .callback
                        .take()
                        .expect("streaming reader finished without a callback");
                    let status = data
                        .take_status()
                        .unwrap_or_else(|| Status::unavailable("call terminated by the transport"));
                    let responses = mem::take(&mut state.responses);
                    // The callback may drop the reader; the pending handle is
                    // already clear.
                    deliver = Some((callback, status, responses));
                }
                (Phase::Created, _) | (Phase::Finished, _) => {
                    unreachable!("completion fired with no operation in flight")
                }
            }
        }
        if let Some((callback, status, responses)) = deliver {
            debug!(responses = responses.len(), code = ?status.code(), "stream finished");
            callback(status, responses);
        }
    }

    fn issue_read(inner: &Arc<Self>, state: &mut ReaderState) {
        let completion = Self::register_completion(inner, state);
        inner.channel.lock().unwrap().read(completion);
    }

    fn issue_finish(inner: &Arc<Self>, state: &mut ReaderState) {
        let completion = Self::register_completion(inner, state);
        inner.channel.lock().unwrap().finish(completion);
    }
}

impl<C: StreamingChannel> Drop for StreamingReader<C> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let state = self.inner.state.lock().unwrap();
        assert!(
            state.completion.is_none(),
            "streaming reader dropped with a completion pending; cancel() first"
        );
    }
}
