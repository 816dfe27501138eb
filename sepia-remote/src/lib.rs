//! # Sepia Remote
//!
//! `sepia-remote` is the lowest networking layer of the Sepia storage client.
//! It adapts a raw, completion-tag-based transport into two safe call shapes
//! on which the rest of the client protocol is built:
//!
//! * **[`call::UnaryCall`]:** a single request followed by a single response.
//! * **[`call::StreamingReader`]:** a single request followed by an unbounded
//!   sequence of responses, terminated when the server closes the stream.
//!
//! Payloads are opaque [`bytes::Bytes`] buffers; serialization belongs to the
//! layers above.
//!
//! ## Threading model
//!
//! Every call-state transition and every user callback runs on a single
//! serializing [`queue::WorkerQueue`]. Transport completions are re-posted
//! onto it from the transport's own threads, so call state never needs
//! fine-grained locking from the caller's point of view. The one deliberate
//! blocking point is `cancel()`, which waits for the in-flight completion to
//! drain so the owner can tear a call down synchronously.
//!
//! ## Key components
//!
//! * **[`completion::Completion`]:** one outstanding asynchronous transport
//!   operation. There is never more than one per call.
//! * **[`transport`]:** the traits a transport must implement to drive calls;
//!   [`grpc`] provides the tonic-backed implementation.
//! * **[`connectivity::ConnectivityMonitor`]:** network reachability fan-out,
//!   feeding the retry decisions made above this layer.
//!
//! ## Re-exports
//!
//! This crate re-exports `bytes` and `tonic` to ensure that consumers use
//! compatible versions of these underlying dependencies.
pub mod call;
pub mod completion;
pub mod connectivity;
pub mod grpc;
pub mod logging;
pub mod queue;
pub mod transport;

// Re-exports
pub use bytes;
pub use tonic;
