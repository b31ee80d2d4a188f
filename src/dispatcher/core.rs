//! Dispatcher core module - the request path from resolution to close.

use crate::error::{HandlerError, Outcome};
use crate::extract::{ExtractOptions, RequestContext, RequestParts};
use crate::ids::RequestId;
use crate::json::JsonContext;
use crate::render::{RendererKind, Renderers, ResponseHead};
use crate::response::ResponseDescriptor;
use crate::router::{Resolution, RouteMatch, RouteTable};
use crate::server::{BodyWriter, IncomingRequest, ResponseSink};
use crate::static_files::{not_found_response, ResourceMatcher};
use http::Method;
use serde_json::json;
use std::any::type_name;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info_span, warn};

/// Type identifier of the 405 payload.
pub const METHOD_NOT_ALLOWED: &str = "METHOD_NOT_ALLOWED";

/// Routes one request end to end: resolution, extraction, invocation, rendering, close.
///
/// Shared by all workers behind an `Arc`; it holds no per-request state.
pub struct Dispatcher {
    table: RouteTable,
    renderers: Renderers,
    json: Arc<JsonContext>,
    resources: Vec<Arc<dyn ResourceMatcher>>,
    /// App context without slashes, e.g. `shop` for `/shop/...`.
    app_context: Option<String>,
    extract: ExtractOptions,
}

impl Dispatcher {
    #[must_use]
    pub fn new(table: RouteTable) -> Self {
        Self {
            table,
            renderers: Renderers::new(),
            json: Arc::new(JsonContext::new()),
            resources: Vec::new(),
            app_context: None,
            extract: ExtractOptions::default(),
        }
    }

    #[must_use]
    pub fn with_renderers(mut self, renderers: Renderers) -> Self {
        self.renderers = renderers;
        self
    }

    #[must_use]
    pub fn with_json(mut self, json: Arc<JsonContext>) -> Self {
        self.json = json;
        self
    }

    /// Append a fallback matcher; matchers are consulted in insertion order.
    #[must_use]
    pub fn with_resource(mut self, matcher: Arc<dyn ResourceMatcher>) -> Self {
        self.resources.push(matcher);
        self
    }

    #[must_use]
    pub fn with_app_context(mut self, context: Option<&str>) -> Self {
        self.app_context = context
            .map(|c| c.trim_matches('/').to_owned())
            .filter(|c| !c.is_empty());
        self
    }

    #[must_use]
    pub fn with_extract_options(mut self, options: ExtractOptions) -> Self {
        self.extract = options;
        self
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    #[inline]
    #[must_use]
    pub fn json(&self) -> &Arc<JsonContext> {
        &self.json
    }

    /// Serve one request. Never panics and never returns an error: every failure becomes a
    /// response or, when even that fails, a log line.
    pub fn dispatch(&self, request: IncomingRequest, sink: Box<dyn ResponseSink>) {
        let request_id = RequestId::from_headers(&request.headers);
        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
        );
        let _guard = span.enter();
        let start = Instant::now();

        let Ok(method) = Method::from_bytes(request.method.as_bytes()) else {
            self.method_not_allowed(&request.method, sink);
            return;
        };

        if let Some(location) = self.context_redirect(&request) {
            debug!(location = %location, "Redirecting to app context root");
            let redirect = ResponseDescriptor::ok_empty()
                .with_status(301)
                .with_header("Location", location)
                .with_renderer(RendererKind::Null);
            self.render_outcome(Outcome::Success(redirect), RendererKind::Json, sink);
            return;
        }

        match self.table.resolve(&method, &request.path, &request.headers) {
            Resolution::Matched(route_match) => {
                self.invoke(route_match, method, request, request_id, sink);
            }
            Resolution::MethodNotAllowed if !self.serves_resources(&method) => {
                self.method_not_allowed(method.as_str(), sink);
            }
            Resolution::MethodNotAllowed | Resolution::NoMatch | Resolution::Ambiguous(_) => {
                self.fallback(&method, &request, sink);
            }
        }

        debug!(
            elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
            "Request dispatched"
        );
    }

    fn invoke(
        &self,
        route_match: RouteMatch,
        method: Method,
        request: IncomingRequest,
        request_id: RequestId,
        sink: Box<dyn ResponseSink>,
    ) {
        let RouteMatch { route, path_params } = route_match;
        let default_renderer = route.default_renderer();
        debug!(template = %route.template(), params = ?path_params, "Route matched");

        let parts = match RequestParts::extract(request, method, path_params, request_id, &self.extract)
        {
            Ok(parts) => parts,
            Err(err) => {
                let outcome = Outcome::from(Err(err));
                log_outcome(&outcome);
                self.render_outcome(outcome, default_renderer, sink);
                return;
            }
        };

        let ctx = RequestContext::new(parts, Arc::clone(&self.json), sink);
        let enums = self.json.enter();
        let result = panic::catch_unwind(AssertUnwindSafe(|| route.handler().handle(&ctx)))
            .unwrap_or_else(|payload| {
                let err = HandlerError::from_panic(payload);
                error!(template = %route.template(), error = %err, "Handler panicked");
                Err(err)
            });
        drop(enums);
        let outcome = Outcome::from(result);
        log_outcome(&outcome);

        match ctx.take_sink() {
            Some(sink) => self.render_outcome(outcome, default_renderer, sink),
            None => {
                if !matches!(&outcome, Outcome::Success(d) if d.is_keep_open()) {
                    warn!(
                        template = %route.template(),
                        "Handler claimed the response stream but did not return keep-open; result dropped"
                    );
                }
            }
        }
    }

    /// Render any outcome on `sink` and, unless the response is keep-open, close it.
    ///
    /// A failure on the success path before the status went out is replaced by an internal error
    /// response. A failure while rendering an error is only logged.
    pub fn render_outcome(
        &self,
        outcome: Outcome,
        default_renderer: RendererKind,
        mut sink: Box<dyn ResponseSink>,
    ) {
        let success = matches!(outcome, Outcome::Success(_));
        let descriptor = outcome.into_descriptor();
        let keep_open = descriptor.is_keep_open();

        if let Err(err) = self.render(descriptor, default_renderer, sink.as_mut()) {
            if success && !sink.status_sent() {
                error!(error = %err, "Response render failed; sending internal error");
                sink.headers_mut().clear();
                let fallback = Outcome::Internal {
                    type_name: type_name::<io::Error>().to_owned(),
                    message: err.to_string(),
                };
                if let Err(second) =
                    self.render(fallback.into_descriptor(), default_renderer, sink.as_mut())
                {
                    error!(error = %second, "Rendering the internal error failed");
                }
            } else {
                error!(
                    error = %err,
                    status_sent = sink.status_sent(),
                    "Response render failed"
                );
            }
        }

        if keep_open {
            if sink.status_sent() {
                debug!("Keep-open response left to the handler");
            } else {
                warn!("Keep-open response without an open stream");
            }
            return;
        }
        if let Err(err) = sink.close() {
            debug!(error = %err, "Closing the response failed");
        }
    }

    fn render(
        &self,
        descriptor: ResponseDescriptor,
        default_renderer: RendererKind,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<()> {
        let kind = descriptor.renderer().unwrap_or(default_renderer);
        let renderer = self.renderers.get(kind);
        let (parts, payload) = descriptor.into_parts();

        if !sink.status_sent() {
            let headers = sink.headers_mut();
            for (name, value) in parts.headers.iter() {
                headers.add(name, value);
            }
            let head = ResponseHead {
                status: parts.status,
                file_name: parts.file_name.as_deref(),
            };
            renderer.change_headers(&head, headers);
        }
        if !parts.keep_open {
            sink.send_status(parts.status)?;
        }
        let mut body = BodyWriter::new(sink);
        renderer.render(payload, &mut body, &self.json)
    }

    fn method_not_allowed(&self, method: &str, sink: Box<dyn ResponseSink>) {
        debug!(method = %method, "No route registered for method");
        let allow = self
            .table
            .methods()
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let descriptor = ResponseDescriptor::json(
            405,
            json!({
                "type": METHOD_NOT_ALLOWED,
                "message": format!("Method {method} is not allowed"),
            }),
        )
        .with_header("Allow", allow)
        .with_renderer(RendererKind::Json);
        self.render_outcome(Outcome::Success(descriptor), RendererKind::Json, sink);
    }

    /// Resource matchers only answer reads.
    fn serves_resources(&self, method: &Method) -> bool {
        !self.resources.is_empty() && is_read(method)
    }

    fn fallback(&self, method: &Method, request: &IncomingRequest, sink: Box<dyn ResponseSink>) {
        let uri = request.request_uri();
        if is_read(method) {
            if let Some(path) = self.strip_context(&request.path) {
                for matcher in &self.resources {
                    if let Some(descriptor) = matcher.lookup(path) {
                        debug!(path = %path, "Served by resource fallback");
                        self.render_outcome(Outcome::Success(descriptor), RendererKind::Json, sink);
                        return;
                    }
                }
            }
        }
        debug!(uri = %uri, "No route or resource matched");
        let descriptor = not_found_response(&uri, &request.headers);
        self.render_outcome(Outcome::Success(descriptor), RendererKind::Json, sink);
    }

    /// Path below the app context, keeping its leading `/`; `None` when outside the context.
    fn strip_context<'a>(&self, path: &'a str) -> Option<&'a str> {
        match &self.app_context {
            None => Some(path),
            Some(ctx) => {
                let rest = path.strip_prefix('/')?.strip_prefix(ctx.as_str())?;
                if rest.starts_with('/') {
                    Some(rest)
                } else {
                    None
                }
            }
        }
    }

    /// `/ctx` redirects to `/ctx/`.
    fn context_redirect(&self, request: &IncomingRequest) -> Option<String> {
        let ctx = self.app_context.as_deref()?;
        if request.path.strip_prefix('/') != Some(ctx) {
            return None;
        }
        Some(match &request.query {
            Some(q) => format!("/{ctx}/?{q}"),
            None => format!("/{ctx}/"),
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.table.len())
            .field("renderers", &self.renderers)
            .field("resources", &self.resources.len())
            .field("app_context", &self.app_context)
            .field("extract", &self.extract)
            .finish()
    }
}

fn is_read(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn log_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Success(d) => debug!(status = d.status(), "Handler succeeded"),
        Outcome::BadRequest(err) => {
            warn!(message_key = err.message_key(), error = %err, "Bad request");
        }
        Outcome::Internal { type_name, message } => {
            error!(error_type = %type_name, error = %message, "Internal error");
        }
    }
}
