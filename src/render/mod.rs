//! # Render Module
//!
//! Renderers turn a response payload into bytes and set the headers that go with them.
//!
//! ## Renderer Kinds
//!
//! | Kind | Headers | Body |
//! |------|---------|------|
//! | [`Json`](RendererKind::Json) | `Content-Type: application/json; charset=utf-8` | payload serialised through the [`JsonContext`] |
//! | [`Text`](RendererKind::Text) | `Content-Type: text/plain; charset=utf-8` | payload as text |
//! | [`Html`](RendererKind::Html) | `Content-Type: text/html; charset=utf-8` | payload as text |
//! | [`Download`](RendererKind::Download) | `application/force-download` and `Content-Disposition` | bytes copied verbatim |
//! | [`File`](RendererKind::File) | MIME type from the file extension | bytes copied verbatim |
//! | [`Null`](RendererKind::Null) | none | nothing |
//! | [`Passing`](RendererKind::Passing) | none, the handler sets them | payload as text |
//!
//! A null payload always produces an empty body.
//!
//! ## Pipeline
//!
//! The dispatcher calls [`Renderer::change_headers`] before the status line is written and
//! [`Renderer::render`] after it. Renderers never see the transport directly, only an
//! `io::Write` over the response body.

mod mime;
mod renderers;

pub use mime::from_file_name as mime_from_file_name;
pub use renderers::{
    DownloadRenderer, FileRenderer, JsonRenderer, NullRenderer, PassingRenderer, TextRenderer,
};

use crate::json::JsonContext;
use crate::server::Headers;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const APPLICATION_JSON_UTF8: &str = "application/json; charset=utf-8";
pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML_UTF8: &str = "text/html; charset=utf-8";
pub const APPLICATION_FORCE_DOWNLOAD: &str = "application/force-download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RendererKind {
    #[default]
    Json,
    Text,
    Html,
    Download,
    File,
    Null,
    Passing,
}

impl RendererKind {
    pub const ALL: [RendererKind; 7] = [
        RendererKind::Json,
        RendererKind::Text,
        RendererKind::Html,
        RendererKind::Download,
        RendererKind::File,
        RendererKind::Null,
        RendererKind::Passing,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RendererKind::Json => "JSON",
            RendererKind::Text => "TEXT",
            RendererKind::Html => "HTML",
            RendererKind::Download => "DOWNLOAD",
            RendererKind::File => "FILE",
            RendererKind::Null => "NULL",
            RendererKind::Passing => "PASSING",
        }
    }
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response body before rendering.
#[derive(Default)]
pub enum Payload {
    #[default]
    Null,
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
}

impl Payload {
    /// True for `Null` and for a JSON `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null | Payload::Json(Value::Null))
    }

    /// Write the payload as text; JSON strings are written unquoted.
    pub fn write_text(self, out: &mut dyn Write, json: &JsonContext) -> io::Result<()> {
        match self {
            Payload::Null | Payload::Json(Value::Null) => Ok(()),
            Payload::Json(Value::String(s)) | Payload::Text(s) => out.write_all(s.as_bytes()),
            Payload::Json(value) => {
                let s = json.to_string(&value)?;
                out.write_all(s.as_bytes())
            }
            Payload::Bytes(bytes) => out.write_all(&bytes),
            Payload::Reader(mut reader) => io::copy(&mut reader, out).map(|_| ()),
        }
    }

    /// Write raw payloads verbatim and structured ones as JSON.
    pub fn write_bytes(self, out: &mut dyn Write, json: &JsonContext) -> io::Result<()> {
        match self {
            Payload::Json(value) if !value.is_null() => {
                json.to_writer(out, &value)?;
                Ok(())
            }
            other => other.write_text(out, json),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Null => f.write_str("Null"),
            Payload::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Payload::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Payload::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Payload::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

/// Response metadata visible to [`Renderer::change_headers`].
#[derive(Debug, Clone, Copy)]
pub struct ResponseHead<'a> {
    pub status: u16,
    pub file_name: Option<&'a str>,
}

pub trait Renderer: Send + Sync {
    fn kind(&self) -> RendererKind;

    /// Adjust headers; called before the status line is written.
    fn change_headers(&self, head: &ResponseHead<'_>, headers: &mut Headers);

    /// Write the body.
    fn render(&self, payload: Payload, out: &mut dyn Write, json: &JsonContext) -> io::Result<()>;
}

/// Renderer lookup by kind, pre-filled with the built-in renderers.
#[derive(Clone)]
pub struct Renderers {
    by_kind: HashMap<RendererKind, Arc<dyn Renderer>>,
}

impl Renderers {
    #[must_use]
    pub fn new() -> Self {
        let builtin: [Arc<dyn Renderer>; 7] = [
            Arc::new(JsonRenderer),
            Arc::new(TextRenderer::plain()),
            Arc::new(TextRenderer::html()),
            Arc::new(DownloadRenderer),
            Arc::new(FileRenderer),
            Arc::new(NullRenderer),
            Arc::new(PassingRenderer),
        ];
        let by_kind = builtin.into_iter().map(|r| (r.kind(), r)).collect();
        Self { by_kind }
    }

    /// Replace the renderer for `renderer.kind()`.
    pub fn register(&mut self, renderer: Arc<dyn Renderer>) {
        self.by_kind.insert(renderer.kind(), renderer);
    }

    /// Renderer for `kind`; every kind has one.
    #[must_use]
    pub fn get(&self, kind: RendererKind) -> Arc<dyn Renderer> {
        match self.by_kind.get(&kind) {
            Some(r) => Arc::clone(r),
            None => Arc::new(NullRenderer),
        }
    }
}

impl Default for Renderers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Renderers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&'static str> = self.by_kind.keys().map(RendererKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("Renderers").field("kinds", &kinds).finish()
    }
}
