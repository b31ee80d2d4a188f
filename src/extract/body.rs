//! Body parameters, dispatched on the request's `Content-Type`.

use super::file::FileField;
use super::multipart::parse_multipart;
use super::query::{parse_form, MultiMap};
use crate::error::{BadRequest, HandlerError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Multipart,
    /// Anything else, including a missing content type: nothing is parsed.
    Other,
}

impl BodyKind {
    #[must_use]
    pub fn of(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return BodyKind::Other;
        };
        let ct = ct.trim().to_ascii_lowercase();
        if ct.starts_with("application/json") {
            BodyKind::Json
        } else if ct.starts_with("application/x-www-form-urlencoded") {
            BodyKind::Form
        } else if ct.starts_with("multipart/") {
            BodyKind::Multipart
        } else {
            BodyKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// When false, multipart bodies are not decoded.
    pub upload_support: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            upload_support: true,
        }
    }
}

/// Parsed body parameters.
#[derive(Debug, Default)]
pub struct ParsedBody {
    /// Uniform view: the JSON object, or each form field as an array of strings.
    pub params: Map<String, Value>,
    /// Text fields of url-encoded and multipart bodies.
    pub form: MultiMap,
    pub files: HashMap<String, Arc<FileField>>,
}

#[derive(Debug, Error)]
#[error("JSON body must be an object, found {found}")]
pub struct NotAnObject {
    found: &'static str,
}

#[derive(Debug, Error)]
#[error("form body is not valid UTF-8")]
pub struct InvalidFormEncoding;

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Form fields as arrays of strings, `null` for keys given without `=`.
#[must_use]
pub fn multimap_to_json(map: &MultiMap) -> Map<String, Value> {
    map.iter()
        .map(|(k, values)| {
            let values = values
                .iter()
                .map(|v| v.as_ref().map_or(Value::Null, |s| Value::String(s.clone())))
                .collect();
            (k.to_owned(), Value::Array(values))
        })
        .collect()
}

/// Read and parse the body.
///
/// # Errors
///
/// Malformed JSON, malformed escapes in a form and a bad multipart boundary are bad requests;
/// failing to read the body is an internal error.
pub fn parse_body(
    content_type: Option<&str>,
    body: &mut dyn Read,
    options: &ExtractOptions,
) -> Result<ParsedBody, HandlerError> {
    let kind = BodyKind::of(content_type);
    if kind == BodyKind::Other {
        return Ok(ParsedBody::default());
    }
    if kind == BodyKind::Multipart && !options.upload_support {
        error!(
            content_type = ?content_type,
            "Multipart request received but upload support is disabled"
        );
        return Ok(ParsedBody::default());
    }

    let mut raw = Vec::new();
    body.read_to_end(&mut raw)?;
    debug!(kind = ?kind, bytes = raw.len(), "Parsing request body");

    match kind {
        BodyKind::Json => {
            if raw.iter().all(u8::is_ascii_whitespace) {
                return Ok(ParsedBody::default());
            }
            let value: Value =
                serde_json::from_slice(&raw).map_err(|e| BadRequest::can_not_parse(&e))?;
            match value {
                Value::Object(params) => Ok(ParsedBody {
                    params,
                    ..ParsedBody::default()
                }),
                other => Err(BadRequest::can_not_parse(&NotAnObject {
                    found: json_kind(&other),
                })
                .into()),
            }
        }
        BodyKind::Form => {
            let text = std::str::from_utf8(&raw)
                .map_err(|_| BadRequest::can_not_parse(&InvalidFormEncoding))?;
            let form = parse_form(text)?;
            Ok(ParsedBody {
                params: multimap_to_json(&form),
                form,
                files: HashMap::new(),
            })
        }
        BodyKind::Multipart => {
            let parts = parse_multipart(content_type.unwrap_or_default(), raw)?;
            Ok(ParsedBody {
                params: multimap_to_json(&parts.fields),
                form: parts.fields,
                files: parts.files,
            })
        }
        BodyKind::Other => Ok(ParsedBody::default()),
    }
}
