//! # gRPC Connection
//!
//! Owns an established `tonic` channel and mints transport channels for the
//! call types. The tag-based operations the calls issue are bridged onto the
//! tokio runtime here: each operation runs as (part of) a spawned task and
//! completes its tag when the underlying future resolves.
//!
//! A cancelled operation completes its tag with `ok = false`, which is what
//! lets `cancel()` on a call drain synchronously even though the transport
//! itself is fully asynchronous.
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::uri::PathAndQuery;
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tonic::{
    Code, Request, Status, Streaming,
    client::Grpc,
    metadata::MetadataMap,
    transport::{Channel, Endpoint},
};
use tracing::debug;

use super::codec::BytesCodec;
use crate::call::{StreamingReader, UnaryCall};
use crate::completion::Completion;
use crate::queue::WorkerQueue;
use crate::transport::{StreamingChannel, UnaryChannel};

/// Errors that can occur when connecting to a gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
}

/// Errors that can occur when creating a call.
#[derive(Debug, thiserror::Error)]
pub enum CreateCallError {
    #[error("Invalid RPC path '{0}': {1}")]
    InvalidRpcPath(String, #[source] http::uri::InvalidUri),
}

/// A connection to the backend, shared by every call created from it.
pub struct GrpcConnection {
    channel: Channel,
    queue: WorkerQueue,
    runtime: Handle,
    metadata: MetadataMap,
}

impl GrpcConnection {
    /// Connects to a gRPC server.
    ///
    /// # Arguments
    ///
    /// * `addr` - The server URI (e.g., `http://localhost:50051`).
    /// * `queue` - The worker queue call callbacks will run on.
    pub async fn connect(addr: &str, queue: WorkerQueue) -> Result<Self, ConnectError> {
        let endpoint = Endpoint::new(addr.to_string())
            .map_err(|e| ConnectError::InvalidUrl(addr.to_string(), e))?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ConnectError::ConnectionFailed(addr.to_string(), e))?;

        debug!(addr, "transport connected");
        Ok(Self::from_channel(channel, queue))
    }

    /// Wraps an already-established channel. Must be called from within a
    /// tokio runtime; the calls created from this connection are driven on
    /// that runtime.
    pub fn from_channel(channel: Channel, queue: WorkerQueue) -> Self {
        Self {
            channel,
            queue,
            runtime: Handle::current(),
            metadata: MetadataMap::new(),
        }
    }

    /// Client metadata attached to every call created from this connection.
    pub fn set_call_metadata(&mut self, metadata: MetadataMap) {
        self.metadata = metadata;
    }

    /// Creates a unary call for `path` carrying `request`. The call is inert
    /// until started.
    pub fn create_unary_call(
        &self,
        path: &str,
        request: Bytes,
    ) -> Result<UnaryCall<GrpcUnaryChannel>, CreateCallError> {
        let channel = GrpcUnaryChannel {
            grpc: Grpc::new(self.channel.clone()),
            path: rpc_path(path)?,
            request: Some(request),
            metadata: self.metadata.clone(),
            runtime: self.runtime.clone(),
            cancelled: Arc::new(Notify::new()),
            headers: Arc::new(Mutex::new(MetadataMap::new())),
        };
        Ok(UnaryCall::new(channel, self.queue.clone()))
    }

    /// Creates a streaming reader for `path` carrying `request`. The reader
    /// is inert until started.
    pub fn create_streaming_reader(
        &self,
        path: &str,
        request: Bytes,
    ) -> Result<StreamingReader<GrpcStreamingChannel>, CreateCallError> {
        let channel = GrpcStreamingChannel::spawn(
            Grpc::new(self.channel.clone()),
            rpc_path(path)?,
            self.metadata.clone(),
            &self.runtime,
        );
        Ok(StreamingReader::new(channel, request, self.queue.clone()))
    }
}

fn rpc_path(path: &str) -> Result<PathAndQuery, CreateCallError> {
    PathAndQuery::from_str(path).map_err(|e| CreateCallError::InvalidRpcPath(path.to_string(), e))
}

/// Drives one unary exchange on the tokio runtime.
pub struct GrpcUnaryChannel {
    grpc: Grpc<Channel>,
    path: PathAndQuery,
    request: Option<Bytes>,
    metadata: MetadataMap,
    runtime: Handle,
    cancelled: Arc<Notify>,
    headers: Arc<Mutex<MetadataMap>>,
}

impl UnaryChannel for GrpcUnaryChannel {
    fn start_call(&mut self) {}

    fn finish(&mut self, completion: Completion) {
        let mut grpc = self.grpc.clone();
        let path = self.path.clone();
        let metadata = self.metadata.clone();
        let request = self.request.take().expect("unary request already consumed");
        let cancelled = Arc::clone(&self.cancelled);
        let headers = Arc::clone(&self.headers);

        self.runtime.spawn(async move {
            let exchange = async {
                grpc.ready()
                    .await
                    .map_err(|e| Status::unavailable(format!("transport not ready: {e}")))?;
                let mut request = Request::new(request);
                *request.metadata_mut() = metadata;
                grpc.unary(request, path, BytesCodec).await
            };
            tokio::select! {
                _ = cancelled.notified() => completion.complete(false),
                result = exchange => {
                    match result {
                        Ok(response) => {
                            *headers.lock().unwrap() = response.metadata().clone();
                            completion.set_message(response.into_inner());
                            completion.set_status(Status::new(Code::Ok, ""));
                        }
                        // The exchange ran; the status tells the rest of the
                        // story, transport failures included.
                        Err(status) => completion.set_status(status),
                    }
                    completion.complete(true);
                }
            }
        });
    }

    fn try_cancel(&mut self) {
        self.cancelled.notify_one();
    }

    fn response_headers(&self) -> MetadataMap {
        self.headers.lock().unwrap().clone()
    }
}

enum StreamOp {
    WriteLast {
        request: Bytes,
        completion: Completion,
    },
    Read {
        completion: Completion,
    },
    Finish {
        completion: Completion,
    },
}

/// Drives one response-stream exchange. Operations are serialized through a
/// dedicated task that owns the live `Streaming` half.
pub struct GrpcStreamingChannel {
    ops: mpsc::UnboundedSender<StreamOp>,
    cancelled: Arc<Notify>,
    headers: Arc<Mutex<MetadataMap>>,
}

impl GrpcStreamingChannel {
    fn spawn(
        grpc: Grpc<Channel>,
        path: PathAndQuery,
        metadata: MetadataMap,
        runtime: &Handle,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(Notify::new());
        let headers = Arc::new(Mutex::new(MetadataMap::new()));
        runtime.spawn(drive(
            grpc,
            path,
            metadata,
            ops_rx,
            Arc::clone(&cancelled),
            Arc::clone(&headers),
        ));
        Self {
            ops: ops_tx,
            cancelled,
            headers,
        }
    }

    fn submit(&self, op: StreamOp) {
        if let Err(mpsc::error::SendError(op)) = self.ops.send(op) {
            // The driver task is gone; the tag still has to surface.
            match op {
                StreamOp::WriteLast { completion, .. } | StreamOp::Read { completion } => {
                    completion.complete(false)
                }
                StreamOp::Finish { completion } => {
                    completion.set_status(Status::unavailable("call driver terminated"));
                    completion.complete(true);
                }
            }
        }
    }
}

impl StreamingChannel for GrpcStreamingChannel {
    fn start_call(&mut self) {}

    fn write_last(&mut self, request: Bytes, completion: Completion) {
        // Initial metadata rides with the request in a single write.
        self.submit(StreamOp::WriteLast {
            request,
            completion,
        });
    }

    fn read(&mut self, completion: Completion) {
        self.submit(StreamOp::Read { completion });
    }

    fn finish(&mut self, completion: Completion) {
        self.submit(StreamOp::Finish { completion });
    }

    fn try_cancel(&mut self) {
        self.cancelled.notify_one();
    }

    fn response_headers(&self) -> MetadataMap {
        self.headers.lock().unwrap().clone()
    }
}

async fn drive(
    mut grpc: Grpc<Channel>,
    path: PathAndQuery,
    metadata: MetadataMap,
    mut ops: mpsc::UnboundedReceiver<StreamOp>,
    cancelled: Arc<Notify>,
    headers: Arc<Mutex<MetadataMap>>,
) {
    let mut stream: Option<Streaming<Bytes>> = None;
    let mut terminal_status: Option<Status> = None;
    let mut cancel_requested = false;

    loop {
        let op = tokio::select! {
            _ = cancelled.notified(), if !cancel_requested => {
                cancel_requested = true;
                // Dropping the stream aborts the call on the wire.
                stream = None;
                continue;
            }
            op = ops.recv() => match op {
                Some(op) => op,
                None => return,
            },
        };

        match op {
            StreamOp::WriteLast {
                request,
                completion,
            } => {
                if cancel_requested {
                    completion.complete(false);
                    continue;
                }
                let open = async {
                    grpc.ready()
                        .await
                        .map_err(|e| Status::unavailable(format!("transport not ready: {e}")))?;
                    let mut request = Request::new(request);
                    *request.metadata_mut() = metadata.clone();
                    grpc.server_streaming(request, path.clone(), BytesCodec).await
                };
                tokio::select! {
                    _ = cancelled.notified() => {
                        cancel_requested = true;
                        completion.complete(false);
                    }
                    result = open => match result {
                        Ok(response) => {
                            *headers.lock().unwrap() = response.metadata().clone();
                            stream = Some(response.into_inner());
                            completion.complete(true);
                        }
                        Err(status) => {
                            terminal_status = Some(status);
                            completion.complete(false);
                        }
                    },
                }
            }
            StreamOp::Read { completion } => {
                if cancel_requested {
                    completion.complete(false);
                    continue;
                }
                let Some(active) = stream.as_mut() else {
                    completion.complete(false);
                    continue;
                };
                let mut drop_stream = false;
                tokio::select! {
                    _ = cancelled.notified() => {
                        cancel_requested = true;
                        drop_stream = true;
                        completion.complete(false);
                    }
                    message = active.message() => match message {
                        Ok(Some(response)) => {
                            completion.set_message(response);
                            completion.complete(true);
                        }
                        Ok(None) => {
                            terminal_status = Some(Status::new(Code::Ok, ""));
                            completion.complete(false);
                        }
                        Err(status) => {
                            terminal_status = Some(status);
                            completion.complete(false);
                        }
                    },
                }
                if drop_stream {
                    stream = None;
                }
            }
            StreamOp::Finish { completion } => {
                stream = None;
                let status = terminal_status.take().unwrap_or_else(|| {
                    if cancel_requested {
                        Status::cancelled("call cancelled")
                    } else {
                        Status::new(Code::Ok, "")
                    }
                });
                completion.set_status(status);
                completion.complete(true);
            }
        }
    }
}
