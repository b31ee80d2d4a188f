//! Handler results.
//!
//! A [`ResponseDescriptor`] carries the status, the payload, an optional renderer override, extra
//! headers and the keep-open flag. Renderer selection falls back to the route's default (JSON
//! unless registered otherwise) when the descriptor does not name one.
//!
//! ```rust
//! use pinhttp::ResponseDescriptor;
//! use serde_json::json;
//!
//! let found = ResponseDescriptor::from_option(Some(json!({"id": 1})));
//! assert_eq!(found.status(), 200);
//! let missing = ResponseDescriptor::from_option(None::<serde_json::Value>);
//! assert_eq!(missing.status(), 404);
//! ```

use crate::error::HandlerError;
use crate::render::{Payload, RendererKind, CONTENT_TYPE};
use crate::server::Headers;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::type_name;
use std::io::{Cursor, Read};

#[derive(Debug)]
pub struct ResponseDescriptor {
    status: u16,
    payload: Payload,
    renderer: Option<RendererKind>,
    keep_open: bool,
    headers: Headers,
    file_name: Option<String>,
}

/// Descriptor fields without the payload, consumed by the render pipeline.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    pub status: u16,
    pub renderer: Option<RendererKind>,
    pub keep_open: bool,
    pub headers: Headers,
    pub file_name: Option<String>,
}

impl ResponseDescriptor {
    pub fn new(status: u16, payload: impl Into<Payload>) -> Self {
        Self {
            status,
            payload: payload.into(),
            renderer: None,
            keep_open: false,
            headers: Headers::new(),
            file_name: None,
        }
    }

    /// JSON payload with no renderer preference.
    #[must_use]
    pub fn json(status: u16, value: Value) -> Self {
        Self::new(status, Payload::Json(value))
    }

    /// 200 with any payload, rendered with the route's default renderer.
    pub fn ok(payload: impl Into<Payload>) -> Self {
        Self::new(200, payload)
    }

    /// 200 with a serialisable value.
    ///
    /// # Errors
    ///
    /// Serialisation failures become internal errors.
    pub fn ok_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HandlerError> {
        Ok(Self::json(200, serde_json::to_value(value)?).with_renderer(RendererKind::Json))
    }

    pub fn ok_text(text: impl Into<String>) -> Self {
        Self::new(200, Payload::Text(text.into())).with_renderer(RendererKind::Text)
    }

    pub fn ok_html(html: impl Into<String>) -> Self {
        Self::new(200, Payload::Text(html.into())).with_renderer(RendererKind::Html)
    }

    /// 200 with no body.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::new(200, Payload::Null)
    }

    pub fn created(payload: impl Into<Payload>) -> Self {
        Self::new(201, payload)
    }

    /// 404 with a null payload.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(404, Payload::Null)
    }

    /// 404 with `{"type": .., "message": ..}`.
    pub fn not_found_msg(type_name: &str, message: impl Into<String>) -> Self {
        Self::json(404, json!({ "type": type_name, "message": message.into() }))
    }

    /// 400 describing `err` as `{"type": <error type>, "message": <display>}`.
    pub fn bad_request_from<E: std::error::Error + 'static>(err: &E) -> Self {
        Self::bad_request_msg(type_name::<E>(), err.to_string())
    }

    pub fn bad_request_msg(type_name: &str, message: impl Into<String>) -> Self {
        Self::json(400, json!({ "type": type_name, "message": message.into() }))
    }

    pub fn internal_error(type_name: &str, message: impl Into<String>) -> Self {
        Self::json(500, json!({ "type": type_name, "message": message.into() }))
    }

    /// 200 with the value, or 404 with a null payload.
    pub fn from_option<T: Into<Payload>>(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::ok(v),
            None => Self::not_found(),
        }
    }

    /// Forced download streaming `reader`.
    pub fn ok_download(reader: impl Read + Send + 'static, file_name: impl Into<String>) -> Self {
        Self::new(200, Payload::Reader(Box::new(reader)))
            .with_renderer(RendererKind::Download)
            .with_download_name(file_name)
    }

    /// Forced download of an in-memory text.
    pub fn ok_download_text(text: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self::ok_download(Cursor::new(text.into().into_bytes()), file_name)
    }

    /// Inline file; the content type comes from `file_name`'s extension.
    pub fn ok_file(reader: impl Read + Send + 'static, file_name: impl Into<String>) -> Self {
        Self::new(200, Payload::Reader(Box::new(reader)))
            .with_renderer(RendererKind::File)
            .with_download_name(file_name)
    }

    /// The handler streams the response itself (event streams); the dispatcher writes nothing.
    #[must_use]
    pub fn keep_open() -> Self {
        let mut d = Self::new(200, Payload::Null).with_renderer(RendererKind::Null);
        d.keep_open = true;
        d
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Extra header, applied before the renderer adjusts headers.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Explicit content type; only survives renderers that leave `Content-Type` alone.
    #[must_use]
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.headers.set(CONTENT_TYPE, content_type);
        self
    }

    #[must_use]
    pub fn with_download_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, kind: RendererKind) -> Self {
        self.renderer = Some(kind);
        self
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[inline]
    #[must_use]
    pub fn renderer(&self) -> Option<RendererKind> {
        self.renderer
    }

    #[inline]
    #[must_use]
    pub fn is_keep_open(&self) -> bool {
        self.keep_open
    }

    #[inline]
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    #[must_use]
    pub fn into_parts(self) -> (ResponseParts, Payload) {
        (
            ResponseParts {
                status: self.status,
                renderer: self.renderer,
                keep_open: self.keep_open,
                headers: self.headers,
                file_name: self.file_name,
            },
            self.payload,
        )
    }
}
