//! # Server Module
//!
//! - [`exchange`]: the transport seam ([`IncomingRequest`], [`ResponseSink`]) and the in-memory
//!   [`MemorySink`] used by tests
//! - [`http_server`]: the `tiny_http` transport on the worker pool
//! - [`service`]: [`ServerBuilder`] (build phase) and [`App`] (serve phase)

pub mod exchange;
pub mod http_server;
pub mod service;

pub use exchange::{
    BodyWriter, Headers, IncomingRequest, MemorySink, RecordedResponse, ResponseProbe,
    ResponseSink,
};
pub use http_server::{HttpServer, ServerHandle, TinySink};
pub use service::{App, ServerBuilder};
