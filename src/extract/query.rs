//! Query-string and url-encoded form parsing.
//!
//! Both use the same algorithm: split on `&`, split each token on its first `=`, percent-decode
//! key and value. A token without `=` is a key with a null value; `a=` is a key with an empty
//! value. Keys keep first-seen order and every value in arrival order.

use crate::error::BadRequest;
use std::borrow::Cow;
use std::collections::HashMap;
use thiserror::Error;

/// Ordered multi-map of parameter values; `None` marks a key given without `=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap {
    entries: Vec<(String, Vec<Option<String>>)>,
    /// Position of each key in `entries`.
    index: HashMap<String, usize>,
}

impl MultiMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&at) => self.entries[at].1.push(value),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, vec![value]));
            }
        }
    }

    /// All values of `key`, or `None` when the key is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[Option<String>]> {
        self.index
            .get(key)
            .map(|&at| self.entries[at].1.as_slice())
    }

    /// First value of `key`; `None` when absent or when the first value is null.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(|values| values.first())
            .and_then(|v| v.as_deref())
    }

    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Option<String>])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Back to `(key, value)` pairs, grouped by key in first-seen order.
    #[must_use]
    pub fn flatten(&self) -> Vec<(&str, Option<&str>)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_deref())))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A `%` not followed by two hex digits, or an escape sequence that is not UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEscape {
    #[error("URLDecoder: Illegal hex characters in escape (%) pattern at index {index}")]
    IllegalHex { index: usize },
    #[error("URLDecoder: Incomplete trailing escape (%) pattern")]
    Incomplete,
    #[error("URLDecoder: decoded bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Form-style decoding: `+` is a space, `%XX` is a byte.
pub fn decode_component(raw: &str) -> Result<Cow<'_, str>, MalformedEscape> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(MalformedEscape::Incomplete);
            }
            if !(bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit()) {
                return Err(MalformedEscape::IllegalHex { index: i });
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    if !raw.contains(['%', '+']) {
        return Ok(Cow::Borrowed(raw));
    }
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| Cow::Owned(s.into_owned()))
        .map_err(|_| MalformedEscape::InvalidUtf8)
}

fn decode_lenient(raw: &str) -> Cow<'_, str> {
    decode_component(raw).unwrap_or(Cow::Borrowed(raw))
}

fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once('=') {
        Some((k, v)) => (k, Some(v)),
        None => (token, None),
    }
}

/// Parse a raw query string. Malformed escapes are kept verbatim.
///
/// ```rust
/// use pinhttp::extract::parse_query;
///
/// let q = parse_query("a=1&b&a=2&c=");
/// assert_eq!(q.get("a").unwrap(), &[Some("1".to_string()), Some("2".to_string())]);
/// assert_eq!(q.get("b").unwrap(), &[None]);
/// assert_eq!(q.first("c"), Some(""));
/// assert!(q.get("d").is_none());
/// ```
#[must_use]
pub fn parse_query(raw: &str) -> MultiMap {
    let mut params = MultiMap::new();
    for token in raw.split('&').filter(|t| !t.is_empty()) {
        let (key, value) = split_token(token);
        params.push(
            decode_lenient(key).into_owned(),
            value.map(|v| decode_lenient(v).into_owned()),
        );
    }
    params
}

/// Parse an `application/x-www-form-urlencoded` body.
///
/// # Errors
///
/// A malformed escape is a [`BadRequest::CanNotParse`].
pub fn parse_form(raw: &str) -> Result<MultiMap, BadRequest> {
    let mut params = MultiMap::new();
    for token in raw.split('&').filter(|t| !t.is_empty()) {
        let (key, value) = split_token(token);
        let key = decode_component(key).map_err(|e| BadRequest::can_not_parse(&e))?;
        let value = match value {
            Some(v) => Some(
                decode_component(v)
                    .map_err(|e| BadRequest::can_not_parse(&e))?
                    .into_owned(),
            ),
            None => None,
        };
        params.push(key.into_owned(), value);
    }
    Ok(params)
}
