//! Test doubles for the transport seam.
//!
//! Operations issued by the calls pile up in a [`FakeTransport`] until the
//! test force-finishes them with chosen results, mirroring how the real
//! driver surfaces completions from its own queue. `keep_polling` arms the
//! cancellation path: once armed, `try_cancel` flushes everything pending,
//! the way the real transport surfaces aborted operations.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sepia_remote::call::{StreamingReader, UnaryCall};
use sepia_remote::completion::Completion;
use sepia_remote::queue::WorkerQueue;
use sepia_remote::transport::{StreamingChannel, UnaryChannel};
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    WriteLast,
    Read,
    Finish,
}

#[derive(Clone, Copy, Debug)]
pub enum CompletionResult {
    Ok,
    Error,
}

pub struct PendingOp {
    pub op: Op,
    pub completion: Completion,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
    pending: Mutex<VecDeque<PendingOp>>,
    arrived: Condvar,
    polling: AtomicBool,
    cancelled: AtomicBool,
}

impl FakeTransport {
    /// Arms the cancellation path: from now on `try_cancel` flushes every
    /// pending operation, and operations issued afterwards complete
    /// immediately.
    pub fn keep_polling(&self) {
        self.inner.polling.store(true, Ordering::SeqCst);
    }

    fn submit(&self, op: Op, completion: Completion) {
        let flushing = self.inner.polling.load(Ordering::SeqCst)
            && self.inner.cancelled.load(Ordering::SeqCst);
        if flushing {
            Self::flush_one(op, &completion);
            return;
        }
        self.inner.pending.lock().unwrap().push_back(PendingOp { op, completion });
        self.inner.arrived.notify_all();
    }

    fn on_cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if !self.inner.polling.load(Ordering::SeqCst) {
            return;
        }
        let drained: Vec<PendingOp> = self.inner.pending.lock().unwrap().drain(..).collect();
        for pending in drained {
            Self::flush_one(pending.op, &pending.completion);
        }
    }

    fn flush_one(op: Op, completion: &Completion) {
        match op {
            Op::WriteLast | Op::Read => completion.complete(false),
            Op::Finish => {
                completion.set_status(Status::cancelled("call cancelled"));
                completion.complete(true);
            }
        }
    }

    fn take_next(&self) -> PendingOp {
        let deadline = Duration::from_secs(5);
        let mut pending = self.inner.pending.lock().unwrap();
        loop {
            if let Some(op) = pending.pop_front() {
                return op;
            }
            let (guard, timeout) = self
                .inner
                .arrived
                .wait_timeout(pending, deadline)
                .unwrap();
            pending = guard;
            if timeout.timed_out() {
                panic!("no transport operation arrived within {deadline:?}");
            }
        }
    }
}

fn fake_headers() -> MetadataMap {
    let mut headers = MetadataMap::new();
    headers.insert("x-sepia-backend", "test".parse().unwrap());
    headers
}

pub struct FakeUnaryChannel {
    transport: FakeTransport,
    headers: MetadataMap,
}

impl UnaryChannel for FakeUnaryChannel {
    fn start_call(&mut self) {}

    fn finish(&mut self, completion: Completion) {
        self.transport.submit(Op::Finish, completion);
    }

    fn try_cancel(&mut self) {
        self.transport.on_cancel();
    }

    fn response_headers(&self) -> MetadataMap {
        self.headers.clone()
    }
}

pub struct FakeStreamingChannel {
    transport: FakeTransport,
    headers: MetadataMap,
}

impl StreamingChannel for FakeStreamingChannel {
    fn start_call(&mut self) {}

    fn write_last(&mut self, _request: Bytes, completion: Completion) {
        self.transport.submit(Op::WriteLast, completion);
    }

    fn read(&mut self, completion: Completion) {
        self.transport.submit(Op::Read, completion);
    }

    fn finish(&mut self, completion: Completion) {
        self.transport.submit(Op::Finish, completion);
    }

    fn try_cancel(&mut self) {
        self.transport.on_cancel();
    }

    fn response_headers(&self) -> MetadataMap {
        self.headers.clone()
    }
}

/// Bundles the worker queue and the fake transport, and builds calls bound
/// to them.
pub struct CallTester {
    pub queue: WorkerQueue,
    pub transport: FakeTransport,
}

impl CallTester {
    pub fn new() -> Self {
        Self {
            queue: WorkerQueue::start(),
            transport: FakeTransport::default(),
        }
    }

    pub fn create_unary_call(&self) -> UnaryCall<FakeUnaryChannel> {
        let channel = FakeUnaryChannel {
            transport: self.transport.clone(),
            headers: fake_headers(),
        };
        UnaryCall::new(channel, self.queue.clone())
    }

    pub fn create_streaming_reader(&self) -> StreamingReader<FakeStreamingChannel> {
        let channel = FakeStreamingChannel {
            transport: self.transport.clone(),
            headers: fake_headers(),
        };
        StreamingReader::new(channel, Bytes::from_static(b"request"), self.queue.clone())
    }

    pub fn keep_polling(&self) {
        self.transport.keep_polling();
    }

    /// Completes the next pending operations with the given results, in
    /// order, then drains the worker queue so every handler has run.
    pub fn force_finish(&self, results: &[(Op, CompletionResult)]) {
        for &(op, result) in results {
            let pending = self.transport.take_next();
            assert_eq!(pending.op, op, "unexpected transport operation");
            match (op, result) {
                (Op::WriteLast, CompletionResult::Ok) => pending.completion.complete(true),
                (Op::Read, CompletionResult::Ok) => {
                    pending.completion.set_message(Bytes::from_static(b"response"));
                    pending.completion.complete(true);
                }
                (Op::Finish, CompletionResult::Ok) => {
                    pending.completion.set_message(Bytes::from_static(b"response"));
                    pending.completion.set_status(Status::new(Code::Ok, ""));
                    pending.completion.complete(true);
                }
                (Op::Finish, CompletionResult::Error) => {
                    pending
                        .completion
                        .set_status(Status::unavailable("simulated transport error"));
                    pending.completion.complete(false);
                }
                (_, CompletionResult::Error) => pending.completion.complete(false),
            }
        }
        self.drain();
    }

    /// Completes the next pending operation, which must be a read, with the
    /// given payload.
    pub fn force_read(&self, payload: &'static [u8]) {
        let pending = self.transport.take_next();
        assert_eq!(pending.op, Op::Read, "unexpected transport operation");
        pending.completion.set_message(Bytes::from_static(payload));
        pending.completion.complete(true);
    }

    /// Blocks until everything queued so far has run on the worker thread.
    pub fn drain(&self) {
        self.queue.enqueue_blocking(|| {});
    }
}
