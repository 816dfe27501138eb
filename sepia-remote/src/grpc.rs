//! # gRPC Transport Driver
//!
//! The production implementation of the [`crate::transport`] traits on top
//! of `tonic`. Payloads stay opaque end to end: the codec moves raw bytes in
//! and out of the gRPC framing without interpreting them, and everything
//! schema-aware lives in the layers above.
pub mod codec;
pub mod connection;
