//! # pinhttp
//!
//! **pinhttp** is a small, synchronous HTTP service framework. Handlers are plain functions of a
//! [`RequestContext`] returning a [`ResponseDescriptor`]; the framework takes care of routing,
//! parameter extraction, error classification and rendering.
//!
//! ## Overview
//!
//! - **[`router`]** - path templates like `/users/:id` compiled into segment matchers, a build-phase
//!   [`RouteRegistry`](router::RouteRegistry) and the sealed [`RouteTable`](router::RouteTable)
//! - **[`dispatcher`]** - one request end to end: resolution (ambiguity, 405, fallbacks),
//!   extraction, invocation under `catch_unwind`, rendering and close
//! - **[`extract`]** - query, JSON, form and multipart parameters, converters and [`FileField`]
//! - **[`render`]** - JSON, TEXT, HTML, DOWNLOAD, FILE, NULL and PASSING renderers
//! - **[`error`]** - [`BadRequest`], [`HandlerError`] and the [`Outcome`] the renderer sees
//! - **[`sse`]** - keep-open Server-Sent Events streams
//! - **[`static_files`]** - external folder and bundled resources
//! - **[`server`]** - the transport seam, the `tiny_http` transport and [`ServerBuilder`]
//! - **[`worker_pool`]**, **[`runtime_config`]**, **[`logging`]**
//!
//! ## Request Flow
//!
//! ```text
//! acceptor ──▶ worker pool ──▶ Dispatcher::dispatch
//!                                ├─ RouteTable::resolve ─▶ Matched ─▶ RequestParts::extract
//!                                │                                    └─▶ Handler::handle
//!                                │                                        └─▶ Outcome ─▶ Renderer
//!                                ├─ MethodNotAllowed ─▶ 405
//!                                └─ NoMatch/Ambiguous ─▶ resources ─▶ 404
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pinhttp::runtime_config::ServerConfig;
//! use pinhttp::{RequestContext, ResponseDescriptor, ServerBuilder};
//!
//! let app = ServerBuilder::new(ServerConfig::default().with_port(8080))
//!     .get("/hello/:name", |ctx: &RequestContext| {
//!         let name = ctx.path_param("name").unwrap_or("world");
//!         Ok(ResponseDescriptor::ok_text(format!("hello {name}")))
//!     })
//!     .build()?;
//! let handle = app.start()?;
//! handle.join().ok();
//! # Ok::<(), pinhttp::InitializationError>(())
//! ```
//!
//! ## Two Phases
//!
//! Routes exist only on [`ServerBuilder`]. [`ServerBuilder::build`] consumes it and returns an
//! [`App`], whose routing table is immutable and shared by every worker without locks.

pub mod dispatcher;
pub mod error;
pub mod extract;
mod handler;
pub mod ids;
pub mod json;
pub mod logging;
pub mod render;
pub mod response;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod sse;
pub mod static_files;
pub mod worker_pool;

pub use dispatcher::Dispatcher;
pub use error::{BadRequest, DuplicateRouteError, HandlerError, InitializationError, Outcome};
pub use extract::{FileField, RequestContext};
pub use handler::{Handler, HandlerResult};
pub use ids::RequestId;
pub use json::{EnumAdapter, EnumRegistry, JsonContext};
pub use render::{Payload, RendererKind};
pub use response::ResponseDescriptor;
pub use runtime_config::ServerConfig;
pub use server::{App, ServerBuilder, ServerHandle};
pub use sse::EventStream;
