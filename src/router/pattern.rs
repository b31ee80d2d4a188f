//! Path template compilation.
//!
//! A template such as `/users/:id/posts` becomes a sequence of [`Segment`]s. Matching compares
//! segment counts first, then each literal by equality; placeholders accept any single segment.

use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::Arc;

/// Maximum number of path parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Path parameters in declaration order.
///
/// Names are shared with the compiled pattern, values are per request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(Arc<str>),
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    template: String,
    segments: Vec<Segment>,
    param_names: Vec<Arc<str>>,
}

/// Split a path into segments after dropping leading and trailing slashes.
///
/// `/` and the empty string have no segments; inner empty segments (`/a//b`) are kept.
pub fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_matches('/');
    let mut parts = trimmed.split('/');
    if trimmed.is_empty() {
        // consume the single "" produced by splitting an empty string
        parts.next();
    }
    parts
}

impl CompiledPattern {
    /// Compile a template; `:name` segments become named captures.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pinhttp::router::CompiledPattern;
    ///
    /// let p = CompiledPattern::compile("/hello4/:param1");
    /// let params = p.match_path("/hello4/world/").unwrap();
    /// assert_eq!(params[0].1, "world");
    /// ```
    #[must_use]
    pub fn compile(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut param_names = Vec::new();
        for raw in split_segments(template) {
            match raw.strip_prefix(':') {
                Some(name) if !name.is_empty() => {
                    let name: Arc<str> = Arc::from(name);
                    param_names.push(Arc::clone(&name));
                    segments.push(Segment::Param(name));
                }
                _ => segments.push(Segment::Literal(raw.to_owned())),
            }
        }
        Self {
            template: template.to_owned(),
            segments,
            param_names,
        }
    }

    /// The template as written at registration.
    #[inline]
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    #[must_use]
    pub fn param_names(&self) -> &[Arc<str>] {
        &self.param_names
    }

    /// Same literals at the same positions; placeholders compare equal whatever their names.
    #[must_use]
    pub fn same_shape(&self, other: &CompiledPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    _ => false,
                })
    }

    /// Match a request path and bind captures by name.
    ///
    /// Segments are percent-decoded before comparison; malformed escapes are compared verbatim.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<ParamVec> {
        let mut params = ParamVec::new();
        let mut remaining = self.segments.iter();
        for raw in split_segments(path) {
            let segment = remaining.next()?;
            let decoded = decode_segment(raw);
            match segment {
                Segment::Literal(lit) => {
                    if lit.as_str() != decoded.as_ref() {
                        return None;
                    }
                }
                Segment::Param(name) => params.push((Arc::clone(name), decoded.into_owned())),
            }
        }
        if remaining.next().is_some() {
            return None;
        }
        Some(params)
    }

    /// Equivalent regular expression, for diagnostics.
    #[must_use]
    pub fn to_regex_source(&self) -> String {
        let mut out = String::from("^");
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(lit) => out.push_str(&regex::escape(lit)),
                Segment::Param(name) => {
                    out.push_str("(?P<");
                    out.push_str(name);
                    out.push_str(">[^/]*)");
                }
            }
        }
        out.push_str("/?$");
        out
    }
}

fn decode_segment(raw: &str) -> Cow<'_, str> {
    if !raw.contains('%') {
        return Cow::Borrowed(raw);
    }
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}
