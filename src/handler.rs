//! Handler contract.
//!
//! A handler receives the per-request [`RequestContext`] and returns a [`ResponseDescriptor`] or a
//! [`HandlerError`]. Closures with the matching signature implement [`Handler`] directly:
//!
//! ```rust
//! use pinhttp::{Handler, HandlerResult, RequestContext, ResponseDescriptor};
//!
//! fn hello(ctx: &RequestContext) -> HandlerResult {
//!     let name = ctx.path_param("name").unwrap_or("world");
//!     Ok(ResponseDescriptor::ok_text(format!("hello {name}")))
//! }
//!
//! fn takes_handler(_h: impl Handler) {}
//! takes_handler(hello);
//! ```

use crate::error::HandlerError;
use crate::extract::RequestContext;
use crate::response::ResponseDescriptor;

pub type HandlerResult = Result<ResponseDescriptor, HandlerError>;

pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: &RequestContext) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, ctx: &RequestContext) -> HandlerResult {
        self(ctx)
    }
}
