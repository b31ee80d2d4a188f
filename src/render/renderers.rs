use super::{
    mime, Payload, Renderer, RendererKind, ResponseHead, APPLICATION_FORCE_DOWNLOAD,
    APPLICATION_JSON_UTF8, CONTENT_DISPOSITION, CONTENT_TYPE, TEXT_HTML_UTF8, TEXT_PLAIN_UTF8,
};
use crate::json::JsonContext;
use crate::server::Headers;
use std::io::{self, BufWriter, Write};
use url::form_urlencoded;

pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Json
    }

    fn change_headers(&self, _head: &ResponseHead<'_>, headers: &mut Headers) {
        headers.set(CONTENT_TYPE, APPLICATION_JSON_UTF8);
    }

    fn render(&self, payload: Payload, out: &mut dyn Write, json: &JsonContext) -> io::Result<()> {
        let mut out = BufWriter::new(out);
        match payload {
            Payload::Null => {}
            Payload::Json(value) => {
                if !value.is_null() {
                    json.to_writer(&mut out, &value)?;
                }
            }
            Payload::Text(s) => json.to_writer(&mut out, &s)?,
            raw @ (Payload::Bytes(_) | Payload::Reader(_)) => raw.write_bytes(&mut out, json)?,
        }
        out.flush()
    }
}

/// Plain text or HTML, depending on the content type it was built with.
pub struct TextRenderer {
    kind: RendererKind,
    content_type: &'static str,
}

impl TextRenderer {
    #[must_use]
    pub fn plain() -> Self {
        Self {
            kind: RendererKind::Text,
            content_type: TEXT_PLAIN_UTF8,
        }
    }

    #[must_use]
    pub fn html() -> Self {
        Self {
            kind: RendererKind::Html,
            content_type: TEXT_HTML_UTF8,
        }
    }
}

impl Renderer for TextRenderer {
    fn kind(&self) -> RendererKind {
        self.kind
    }

    fn change_headers(&self, _head: &ResponseHead<'_>, headers: &mut Headers) {
        headers.set(CONTENT_TYPE, self.content_type);
    }

    fn render(&self, payload: Payload, out: &mut dyn Write, json: &JsonContext) -> io::Result<()> {
        payload.write_text(out, json)
    }
}

/// `attachment; filename="<form-encoded name>";`
#[must_use]
pub fn content_disposition(file_name: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(file_name.as_bytes()).collect();
    format!("attachment; filename=\"{encoded}\";")
}

/// Forced download; the body is copied verbatim.
pub struct DownloadRenderer;

impl Renderer for DownloadRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Download
    }

    fn change_headers(&self, head: &ResponseHead<'_>, headers: &mut Headers) {
        if let Some(name) = head.file_name {
            headers.set(CONTENT_DISPOSITION, content_disposition(name));
        }
        headers.set(CONTENT_TYPE, APPLICATION_FORCE_DOWNLOAD);
    }

    fn render(&self, payload: Payload, out: &mut dyn Write, json: &JsonContext) -> io::Result<()> {
        payload.write_bytes(out, json)
    }
}

/// Inline file; the content type follows the file extension.
pub struct FileRenderer;

impl Renderer for FileRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::File
    }

    fn change_headers(&self, head: &ResponseHead<'_>, headers: &mut Headers) {
        let mime = head.file_name.map_or("application/octet-stream", mime::from_file_name);
        headers.set(CONTENT_TYPE, mime);
    }

    fn render(&self, payload: Payload, out: &mut dyn Write, json: &JsonContext) -> io::Result<()> {
        payload.write_bytes(out, json)
    }
}

pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Null
    }

    fn change_headers(&self, _head: &ResponseHead<'_>, _headers: &mut Headers) {}

    fn render(&self, _payload: Payload, _out: &mut dyn Write, _json: &JsonContext) -> io::Result<()> {
        Ok(())
    }
}

/// Leaves headers to the handler and writes the payload as text.
pub struct PassingRenderer;

impl Renderer for PassingRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Passing
    }

    fn change_headers(&self, _head: &ResponseHead<'_>, _headers: &mut Headers) {}

    fn render(&self, payload: Payload, out: &mut dyn Write, json: &JsonContext) -> io::Result<()> {
        payload.write_text(out, json)
    }
}
