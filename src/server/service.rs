//! Build phase and serve phase.
//!
//! [`ServerBuilder`] collects routes and settings. [`ServerBuilder::build`] validates everything,
//! seals the routing table and returns an [`App`], which has no way to add routes. The app either
//! runs on the `tiny_http` transport via [`App::start`] or is driven directly through
//! [`App::dispatch`].
//!
//! ```rust
//! use pinhttp::runtime_config::ServerConfig;
//! use pinhttp::server::{IncomingRequest, MemorySink, ServerBuilder};
//! use pinhttp::ResponseDescriptor;
//!
//! let app = ServerBuilder::new(ServerConfig::default())
//!     .get("/hello", |_ctx: &pinhttp::RequestContext| Ok(ResponseDescriptor::ok_text("hi")))
//!     .build()
//!     .unwrap();
//!
//! let (sink, probe) = MemorySink::new();
//! app.dispatch(IncomingRequest::new("GET", "/hello"), Box::new(sink));
//! assert_eq!(probe.snapshot().body_text(), "hi");
//! ```

use super::exchange::{IncomingRequest, ResponseSink};
use super::http_server::{HttpServer, ServerHandle};
use crate::dispatcher::Dispatcher;
use crate::error::InitializationError;
use crate::extract::{ExtractOptions, RequestContext};
use crate::handler::{Handler, HandlerResult};
use crate::json::JsonContext;
use crate::render::{Renderer, Renderers};
use crate::router::{CompiledPattern, RouteOptions, RouteRegistry, Segment};
use crate::runtime_config::{is_restricted_charset, ServerConfig};
use crate::static_files::{BundledResources, ExternalFolder};
use http::Method;
use std::sync::Arc;
use tracing::{error, info};

pub struct ServerBuilder {
    config: ServerConfig,
    registry: RouteRegistry,
    errors: Vec<InitializationError>,
    json: JsonContext,
    renderers: Renderers,
    bundled: BundledResources,
}

impl ServerBuilder {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: RouteRegistry::new(),
            errors: Vec::new(),
            json: JsonContext::new(),
            renderers: Renderers::new(),
            bundled: BundledResources::new(),
        }
    }

    #[must_use]
    pub fn route<F>(self, method: Method, template: &str, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route_handler(method, template, RouteOptions::default(), handler)
    }

    /// Register a route with a content-type filter or a default renderer.
    #[must_use]
    pub fn route_with<F>(
        self,
        method: Method,
        template: &str,
        options: RouteOptions,
        handler: F,
    ) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route_handler(method, template, options, handler)
    }

    /// Register any [`Handler`] implementation.
    #[must_use]
    pub fn route_handler<H: Handler>(
        mut self,
        method: Method,
        template: &str,
        options: RouteOptions,
        handler: H,
    ) -> Self {
        if self.config.restricted_charset && !literals_in_charset(template) {
            self.errors.push(InitializationError::InvalidCharset {
                path: template.to_owned(),
            });
            return self;
        }
        let full = self.prefixed(template);
        if let Err(e) = self
            .registry
            .register(method, &full, options, Arc::new(handler))
        {
            self.errors.push(e.into());
        }
        self
    }

    /// Register a route for a method given by name, e.g. `"PROPFIND"`.
    #[must_use]
    pub fn on<F>(mut self, method: &str, template: &str, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        match Method::from_bytes(method.as_bytes()) {
            Ok(m) => self.route(m, template, handler),
            Err(_) => {
                self.errors
                    .push(InitializationError::InvalidMethod(method.to_owned()));
                self
            }
        }
    }

    #[must_use]
    pub fn get<F>(self, template: &str, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::GET, template, handler)
    }

    #[must_use]
    pub fn post<F>(self, template: &str, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::POST, template, handler)
    }

    #[must_use]
    pub fn put<F>(self, template: &str, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::PUT, template, handler)
    }

    #[must_use]
    pub fn delete<F>(self, template: &str, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::DELETE, template, handler)
    }

    #[must_use]
    pub fn patch<F>(self, template: &str, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::PATCH, template, handler)
    }

    #[must_use]
    pub fn json_context(mut self, json: JsonContext) -> Self {
        self.json = json;
        self
    }

    /// Replace the built-in renderer of `renderer.kind()`.
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderers.register(renderer);
        self
    }

    /// In-memory resources served after the external folder.
    #[must_use]
    pub fn bundled(mut self, resources: BundledResources) -> Self {
        self.bundled = resources;
        self
    }

    /// Validate the configuration and the collected routes, then seal the routing table.
    ///
    /// # Errors
    ///
    /// The first configuration error, or the first route registration error. Every
    /// registration error is logged.
    pub fn build(self) -> Result<App, InitializationError> {
        self.config.validate()?;
        let mut errors = self.errors.into_iter();
        if let Some(first) = errors.next() {
            error!(error = %first, "Route registration failed");
            for err in errors {
                error!(error = %err, "Route registration failed");
            }
            return Err(first);
        }

        let config = self.config;
        let mut dispatcher = Dispatcher::new(self.registry.seal())
            .with_renderers(self.renderers)
            .with_json(Arc::new(self.json))
            .with_app_context(config.app_context.as_deref())
            .with_extract_options(ExtractOptions {
                upload_support: config.upload_support,
            });
        if let Some(folder) = &config.external_folder {
            let folder = ExternalFolder::new(folder)?;
            info!(folder = %folder.base_dir().display(), "Serving external folder");
            dispatcher = dispatcher.with_resource(Arc::new(folder));
        }
        if !self.bundled.is_empty() {
            info!(resources = self.bundled.len(), "Serving bundled resources");
            dispatcher = dispatcher.with_resource(Arc::new(self.bundled));
        }

        Ok(App {
            config,
            dispatcher: Arc::new(dispatcher),
        })
    }

    fn prefixed(&self, template: &str) -> String {
        let template = template.trim_start_matches('/');
        match self.config.app_context.as_deref() {
            Some(ctx) => format!("/{}/{template}", ctx.trim_matches('/')),
            None => format!("/{template}"),
        }
    }
}

fn literals_in_charset(template: &str) -> bool {
    CompiledPattern::compile(template)
        .segments()
        .iter()
        .all(|segment| match segment {
            Segment::Literal(s) => is_restricted_charset(s),
            Segment::Param(_) => true,
        })
}

/// A sealed application, ready to serve.
#[derive(Debug, Clone)]
pub struct App {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl App {
    /// Serve one request on `sink`.
    pub fn dispatch(&self, request: IncomingRequest, sink: Box<dyn ResponseSink>) {
        self.dispatcher.dispatch(request, sink);
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve on a worker pool.
    ///
    /// # Errors
    ///
    /// See [`HttpServer::start`].
    pub fn start(&self) -> Result<ServerHandle, InitializationError> {
        HttpServer::new(Arc::clone(&self.dispatcher), self.config.worker_pool())
            .start(self.config.socket_addr())
    }
}
