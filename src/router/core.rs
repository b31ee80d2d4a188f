//! Route registry and the immutable routing table.
//!
//! Routes are collected in a [`RouteRegistry`] during startup. [`RouteRegistry::seal`] consumes the
//! registry and produces a [`RouteTable`], which has no mutating methods and is shared across
//! worker threads behind an `Arc`.

use crate::error::DuplicateRouteError;
use crate::handler::Handler;
use crate::render::RendererKind;
use crate::server::Headers;
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::pattern::{CompiledPattern, ParamVec};

/// Per-route options supplied at registration.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Media types this route answers; empty means no filtering.
    pub content_types: Vec<String>,
    /// Renderer used when the handler does not pick one (JSON when unset).
    pub renderer: Option<RendererKind>,
}

impl RouteOptions {
    #[must_use]
    pub fn content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn renderer(mut self, kind: RendererKind) -> Self {
        self.renderer = Some(kind);
        self
    }
}

/// Case-insensitive set of media types a route is restricted to.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    types: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            types: types
                .into_iter()
                .map(|t| media_type(t.as_ref()).to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[must_use]
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Same media types, in any order.
    #[must_use]
    pub fn same_types(&self, other: &ContentFilter) -> bool {
        self.types.len() == other.types.len()
            && self.types.iter().all(|t| other.types.contains(t))
    }

    /// Test the request against the filter.
    ///
    /// Bodyless methods negotiate on `Accept`, where `*/*` and `type/*` ranges apply and `q=0`
    /// refuses a type. The other methods dispatch on `Content-Type`, matched exactly. A request
    /// without the relevant header passes.
    #[must_use]
    pub fn accepts(&self, method: &Method, headers: &Headers) -> bool {
        if self.is_empty() {
            return true;
        }
        if negotiates_on_accept(method) {
            let ranges = accept_ranges(headers);
            return ranges.is_empty() || self.preference(&ranges).is_some_and(|(q, _)| q > 0);
        }
        let mut offered = headers
            .get_all("content-type")
            .flat_map(|v| v.split(','))
            .map(media_type)
            .filter(|t| !t.is_empty())
            .peekable();
        if offered.peek().is_none() {
            return true;
        }
        offered.any(|t| self.types.iter().any(|f| f.eq_ignore_ascii_case(t)))
    }

    /// Best `(quality, specificity)` any of the filter's types gets from the `Accept` ranges.
    ///
    /// Each type takes its quality from the most specific range covering it. Qualities are in
    /// thousandths.
    fn preference(&self, ranges: &[AcceptRange<'_>]) -> Option<(u16, u8)> {
        self.types
            .iter()
            .filter_map(|ty| {
                let mut best: Option<(u8, u16)> = None;
                for range in ranges {
                    if let Some(spec) = range.covers(ty) {
                        if best.map_or(true, |(s, _)| spec > s) {
                            best = Some((spec, range.quality));
                        }
                    }
                }
                best.map(|(spec, q)| (q, spec))
            })
            .max()
    }
}

/// One entry of an `Accept` header.
#[derive(Debug, Clone, Copy)]
struct AcceptRange<'a> {
    media: &'a str,
    quality: u16,
}

impl AcceptRange<'_> {
    /// Specificity of the match: 2 exact, 1 `type/*`, 0 `*/*`.
    fn covers(&self, ty: &str) -> Option<u8> {
        if self.media == "*/*" || self.media == "*" {
            return Some(0);
        }
        if let Some(main) = self.media.strip_suffix("/*") {
            let prefix_len = main.len();
            return (ty.len() > prefix_len
                && ty.as_bytes()[prefix_len] == b'/'
                && ty[..prefix_len].eq_ignore_ascii_case(main))
            .then_some(1);
        }
        self.media.eq_ignore_ascii_case(ty).then_some(2)
    }
}

fn accept_ranges(headers: &Headers) -> Vec<AcceptRange<'_>> {
    headers
        .get_all("accept")
        .flat_map(|v| v.split(','))
        .filter_map(|entry| {
            let media = media_type(entry);
            if media.is_empty() {
                return None;
            }
            Some(AcceptRange {
                media,
                quality: quality_param(entry),
            })
        })
        .collect()
}

/// `q` parameter in thousandths; absent or unreadable means 1.
fn quality_param(entry: &str) -> u16 {
    entry
        .split(';')
        .skip(1)
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("q"))
        .and_then(|(_, v)| v.trim().parse::<f32>().ok())
        .map_or(1000, |q| (q.clamp(0.0, 1.0) * 1000.0).round() as u16)
}

fn negotiates_on_accept(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::DELETE, Method::OPTIONS].contains(method)
}

/// Media type without parameters: `text/html; charset=utf-8` → `text/html`.
#[must_use]
pub fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or("").trim()
}

/// A registered route.
pub struct Route {
    method: Method,
    pattern: CompiledPattern,
    filter: ContentFilter,
    renderer: RendererKind,
    handler: Arc<dyn Handler>,
}

impl Route {
    #[inline]
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    #[must_use]
    pub fn template(&self) -> &str {
        self.pattern.template()
    }

    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    #[inline]
    #[must_use]
    pub fn content_filter(&self) -> &ContentFilter {
        &self.filter
    }

    /// Renderer applied when the handler's descriptor does not name one.
    #[inline]
    #[must_use]
    pub fn default_renderer(&self) -> RendererKind {
        self.renderer
    }

    #[inline]
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template())
            .field("content_types", &self.filter.types())
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

/// Result of successfully matching a request to exactly one route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Captures bound to the route's parameter names, in declaration order.
    pub path_params: ParamVec,
}

impl RouteMatch {
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// What the table decided for a request.
#[derive(Debug)]
pub enum Resolution {
    Matched(RouteMatch),
    /// No route matched the path and content filter.
    NoMatch,
    /// More than one route matched; treated like `NoMatch` by the dispatcher.
    Ambiguous(Vec<Arc<Route>>),
    /// There is no route at all for the verb.
    MethodNotAllowed,
}

/// Build-phase route collection.
#[derive(Default)]
pub struct RouteRegistry {
    routes: Vec<Route>,
}

impl RouteRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRouteError`] when a route with the same method, the same template
    /// shape and the same content-type filter is already registered. Templates that merely overlap (`/users/:id` and
    /// `/users/active`) are accepted.
    pub fn register(
        &mut self,
        method: Method,
        template: &str,
        options: RouteOptions,
        handler: Arc<dyn Handler>,
    ) -> Result<(), DuplicateRouteError> {
        let pattern = CompiledPattern::compile(template);
        let filter = ContentFilter::new(&options.content_types);
        if self.routes.iter().any(|r| {
            r.method == method && r.pattern.same_shape(&pattern) && r.filter.same_types(&filter)
        }) {
            return Err(DuplicateRouteError {
                method: method.to_string(),
                template: template.to_owned(),
            });
        }
        debug!(
            method = %method,
            template = %template,
            content_types = ?options.content_types,
            "Route registered"
        );
        self.routes.push(Route {
            method,
            pattern,
            filter,
            renderer: options.renderer.unwrap_or_default(),
            handler,
        });
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn templates(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.routes.iter().map(|r| (&r.method, r.template()))
    }

    /// End the build phase.
    #[must_use]
    pub fn seal(self) -> RouteTable {
        let mut by_method: HashMap<Method, Vec<Arc<Route>>> = HashMap::new();
        let mut order = Vec::new();
        let total = self.routes.len();
        for route in self.routes {
            if !by_method.contains_key(&route.method) {
                order.push(route.method.clone());
            }
            by_method
                .entry(route.method.clone())
                .or_default()
                .push(Arc::new(route));
        }
        info!(
            routes_count = total,
            methods = ?order.iter().map(Method::as_str).collect::<Vec<_>>(),
            "Routing table sealed"
        );
        RouteTable {
            by_method,
            methods: order,
            total,
        }
    }
}

/// Serve-phase routing table, read-only.
pub struct RouteTable {
    by_method: HashMap<Method, Vec<Arc<Route>>>,
    methods: Vec<Method>,
    total: usize,
}

impl RouteTable {
    #[inline]
    #[must_use]
    pub fn has_method(&self, method: &Method) -> bool {
        self.by_method.contains_key(method)
    }

    /// Verbs with at least one route, in first-registration order.
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Routes for a verb in registration order.
    #[must_use]
    pub fn routes_for(&self, method: &Method) -> &[Arc<Route>] {
        self.by_method.get(method).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a request to a single route.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str, headers: &Headers) -> Resolution {
        let Some(candidates) = self.by_method.get(method) else {
            return Resolution::MethodNotAllowed;
        };

        let mut found: Vec<RouteMatch> = Vec::new();
        for route in candidates {
            let Some(path_params) = route.pattern.match_path(path) else {
                continue;
            };
            if !route.filter.accepts(method, headers) {
                continue;
            }
            found.push(RouteMatch {
                route: Arc::clone(route),
                path_params,
            });
        }

        let variants_of_one_template = found.len() > 1
            && found[1..]
                .iter()
                .all(|m| m.route.pattern.same_shape(&found[0].route.pattern));
        if variants_of_one_template {
            let pick = select_variant(method, headers, &found);
            let m = found.swap_remove(pick);
            debug!(
                method = %method,
                path = %path,
                template = %m.route.template(),
                content_types = ?m.route.filter.types(),
                "Content variant selected"
            );
            return Resolution::Matched(m);
        }

        let mut found = found.into_iter();
        match (found.next(), found.len()) {
            (Some(m), 0) => {
                debug!(
                    method = %method,
                    path = %path,
                    template = %m.route.template(),
                    "Route matched"
                );
                Resolution::Matched(m)
            }
            (Some(m), _) => {
                let routes: Vec<Arc<Route>> = std::iter::once(m)
                    .chain(found)
                    .map(|m| m.route)
                    .collect();
                warn!(
                    method = %method,
                    path = %path,
                    templates = ?routes.iter().map(|r| r.template()).collect::<Vec<_>>(),
                    "Ambiguous routes matched, ignoring all of them"
                );
                Resolution::Ambiguous(routes)
            }
            (None, _) => Resolution::NoMatch,
        }
    }
}

/// Index of the variant to serve among routes sharing one template: highest `Accept`
/// preference, then registration order. An unfiltered variant ranks below any filtered one that
/// accepted the request.
fn select_variant(method: &Method, headers: &Headers, variants: &[RouteMatch]) -> usize {
    let ranges = if negotiates_on_accept(method) {
        accept_ranges(headers)
    } else {
        Vec::new()
    };
    if ranges.is_empty() {
        return 0;
    }
    let mut best = (0, (0, 0));
    for (idx, m) in variants.iter().enumerate() {
        let score = m.route.filter.preference(&ranges).unwrap_or((0, 0));
        if score > best.1 {
            best = (idx, score);
        }
    }
    best.0
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("methods", &self.methods)
            .field("total", &self.total)
            .finish()
    }
}
