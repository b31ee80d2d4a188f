//! # Router Module
//!
//! The router turns path templates into matchers and resolves each request to at most one route.
//!
//! ## Overview
//!
//! - **[`CompiledPattern`]** - a template like `/users/:id` split into literal and placeholder
//!   segments; matching requires the same segment count and equal literals
//! - **[`RouteRegistry`]** - the build-phase collection; rejects exact duplicates only
//! - **[`RouteTable`]** - the sealed, read-only table consulted by the dispatcher
//!
//! ## Lifecycle
//!
//! ```rust
//! use http::Method;
//! use pinhttp::router::{Resolution, RouteOptions, RouteRegistry};
//! use pinhttp::{HandlerResult, RequestContext, ResponseDescriptor, server::Headers};
//! use std::sync::Arc;
//!
//! fn empty(_ctx: &RequestContext) -> HandlerResult {
//!     Ok(ResponseDescriptor::ok_empty())
//! }
//!
//! let mut registry = RouteRegistry::new();
//! registry
//!     .register(
//!         Method::GET,
//!         "/users/:id",
//!         RouteOptions::default(),
//!         Arc::new(empty),
//!     )
//!     .unwrap();
//! let table = registry.seal();
//!
//! match table.resolve(&Method::GET, "/users/42/", &Headers::new()) {
//!     Resolution::Matched(m) => assert_eq!(m.get_path_param("id"), Some("42")),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! ## Resolution Rules
//!
//! 1. A verb with no routes at all resolves to [`Resolution::MethodNotAllowed`].
//! 2. Every route of the verb is tested; routes with a content filter must also accept the
//!    request's `Accept` (GET, HEAD, DELETE, OPTIONS) or `Content-Type` (other verbs).
//!    `Accept` ranges such as `*/*` and `text/*` count, and `q=0` refuses a type.
//! 3. Several matches that are content variants of one template resolve to the variant the
//!    `Accept` header prefers most, the earliest registered on a tie.
//! 4. Any other multiple match is [`Resolution::Ambiguous`], never an arbitrary pick.

mod core;
mod pattern;

pub use core::{
    media_type, ContentFilter, Resolution, Route, RouteMatch, RouteOptions, RouteRegistry,
    RouteTable,
};
pub use pattern::{split_segments, CompiledPattern, ParamVec, Segment, MAX_INLINE_PARAMS};
