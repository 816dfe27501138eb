//! # Transport Seam
//!
//! The traits a transport implementation must provide for the call types to
//! drive it. The production implementation lives in [`crate::grpc`]; tests
//! substitute fakes that complete tags on demand.
//!
//! ## Contract
//!
//! * Every [`Completion`] handed to a channel is eventually completed exactly
//!   once, including after `try_cancel`.
//! * After `try_cancel`, pending read/write completions surface promptly with
//!   `ok = false`.
//! * `finish` always fills the tag's status slot with the call's terminal
//!   status and completes it with `ok = true`.
use bytes::Bytes;
use tonic::metadata::MetadataMap;

use crate::completion::Completion;

/// The transport side of a single request / single response exchange.
pub trait UnaryChannel: Send + 'static {
    /// Begins the call. The request buffer was handed to the channel at
    /// construction and rides the transport's combined call path.
    fn start_call(&mut self);

    /// Registers the single completion that fires when the exchange is over,
    /// successfully or not.
    fn finish(&mut self, completion: Completion);

    /// Asks the transport to abort the exchange. Best effort.
    fn try_cancel(&mut self);

    /// The server's initial metadata. Empty until the response has arrived.
    fn response_headers(&self) -> MetadataMap;
}

/// The transport side of a single request / response stream exchange.
pub trait StreamingChannel: Send + 'static {
    /// Begins the call. Initial metadata is corked: it is sent together with
    /// the request in a single network write.
    fn start_call(&mut self);

    /// Writes the request as the last (and only) client message.
    fn write_last(&mut self, request: Bytes, completion: Completion);

    /// Requests the next server message. At most one read is in flight at a
    /// time. A read completed with `ok = false` means the server is done
    /// sending.
    fn read(&mut self, completion: Completion);

    /// Retrieves the terminal status once the stream is over.
    fn finish(&mut self, completion: Completion);

    /// Asks the transport to abort the stream. Best effort.
    fn try_cancel(&mut self);

    /// The server's initial metadata. Empty until the stream has opened.
    fn response_headers(&self) -> MetadataMap;
}
