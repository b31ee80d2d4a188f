//! # Dispatcher Module
//!
//! The [`Dispatcher`] owns the sealed [`RouteTable`](crate::router::RouteTable) and runs every
//! request through the same steps:
//!
//! 1. resolve `(method, path, headers)` against the table
//! 2. on a single match, extract parameters into a [`RequestContext`](crate::RequestContext)
//! 3. invoke the handler, converting errors and panics into an [`Outcome`](crate::Outcome)
//! 4. render the outcome: renderer headers, status line, body, close
//!
//! No match, an ambiguous match, or a verb without routes falls through to the resource
//! matchers (reads only) and finally to the not-found response. A verb without any routes gets
//! `405` unless resources can still answer it.
//!
//! ## Error Handling
//!
//! - extraction and handler errors are classified as `400` or `500` and rendered with the route's
//!   default renderer
//! - a success response whose rendering fails before the status is written becomes a `500`
//! - a failure while rendering the error itself is logged and the sink is closed
//! - handler panics are caught and reported as internal errors of type `panic`

mod core;

pub use core::{Dispatcher, METHOD_NOT_ALLOWED};
