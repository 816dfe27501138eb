//! # Call Shapes
//!
//! The two call abstractions the client protocol is built on. Both own their
//! transport channel exclusively, keep at most one completion in flight at
//! any instant, and report their outcome through a terminal callback that
//! fires exactly once on the worker queue.
//!
//! Cancellation is a silent, synchronous path: once `cancel()` returns, the
//! terminal callback is guaranteed never to fire, and the call can be
//! dropped. Dropping a call while a completion is still pending is a fatal
//! ownership bug, not a recoverable error.
pub mod streaming;
pub mod unary;

pub use streaming::StreamingReader;
pub use unary::UnaryCall;
