//! Transport seam between the wire and the request pipeline.
//!
//! A transport hands the dispatcher an [`IncomingRequest`] (method, path, query, headers and a
//! readable body) together with a boxed [`ResponseSink`] (status, mutable headers, writable body,
//! close). The `tiny_http` transport in [`super::http_server`] and the in-memory [`MemorySink`]
//! used by tests are the two implementations shipped with the crate.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

/// Maximum number of headers kept inline before spilling to the heap.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header storage: insertion ordered, case-insensitive lookups, repeated names allowed.
pub type HeaderVec = SmallVec<[(String, String); MAX_INLINE_HEADERS]>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: HeaderVec,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, compared case-insensitively.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every value of `name` with a single `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Append a value, keeping existing ones.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
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

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.add(k, v);
        }
        headers
    }
}

/// Request as exposed by the transport.
pub struct IncomingRequest {
    pub method: String,
    /// Raw path, without the query string.
    pub path: String,
    /// Raw (still percent-encoded) query string, without the leading `?`.
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Box<dyn Read + Send>,
}

impl IncomingRequest {
    /// Build a request from a method and a request target such as `/users/1?active`.
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_owned(), Some(q.to_owned())),
            None => (target.to_owned(), None),
        };
        Self {
            method: method.into(),
            path,
            query,
            headers: Headers::new(),
            body: Box::new(io::empty()),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Box::new(Cursor::new(body.into()));
        self
    }

    /// Path and query as received, e.g. `/users/1?active`.
    #[must_use]
    pub fn request_uri(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

impl std::fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Response side of a transport.
///
/// Headers are captured when [`send_status`](ResponseSink::send_status) is called; later
/// mutations through `headers_mut` do not reach the wire.
pub trait ResponseSink: Send {
    fn headers_mut(&mut self) -> &mut Headers;

    /// Write the status line and the current headers.
    fn send_status(&mut self, status: u16) -> io::Result<()>;

    fn status_sent(&self) -> bool;

    fn write_body(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Switch to unbuffered delivery so each flush reaches the client.
    fn begin_stream(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()>;

    /// Finish the response and release the connection.
    fn close(&mut self) -> io::Result<()>;
}

/// `io::Write` view of a sink's body, handed to renderers.
///
/// `flush` is a no-op: buffered serialisers flush on drop and must not force a streamed response.
pub struct BodyWriter<'a> {
    sink: &'a mut dyn ResponseSink,
}

impl<'a> BodyWriter<'a> {
    pub fn new(sink: &'a mut dyn ResponseSink) -> Self {
        Self { sink }
    }
}

impl Write for BodyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write_body(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Everything a [`MemorySink`] saw, for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordedResponse {
    pub status: Option<u16>,
    /// Headers as they were when the status was sent.
    pub headers: Headers,
    pub body: Vec<u8>,
    pub streamed: bool,
    pub flushes: usize,
    pub closed: bool,
    /// Status writes attempted; more than one is a pipeline bug.
    pub status_writes: usize,
    /// Set when the peer went away; body writes and flushes fail from then on.
    pub disconnected: bool,
}

impl RecordedResponse {
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }
}

/// Shared view of a [`MemorySink`]'s recording; stays readable after the sink is consumed.
#[derive(Debug, Clone, Default)]
pub struct ResponseProbe(Arc<Mutex<RecordedResponse>>);

impl ResponseProbe {
    #[must_use]
    pub fn snapshot(&self) -> RecordedResponse {
        self.0.lock().clone()
    }

    /// Simulate the client dropping the connection.
    pub fn disconnect(&self) {
        self.0.lock().disconnected = true;
    }
}

/// In-memory sink that records the response instead of writing to a socket.
pub struct MemorySink {
    headers: Headers,
    record: Arc<Mutex<RecordedResponse>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> (Self, ResponseProbe) {
        let record = Arc::new(Mutex::new(RecordedResponse::default()));
        (
            Self {
                headers: Headers::new(),
                record: Arc::clone(&record),
            },
            ResponseProbe(record),
        )
    }

    /// A sink whose peer has gone away: body writes fail with `BrokenPipe`.
    #[must_use]
    pub fn disconnected() -> (Self, ResponseProbe) {
        let (sink, probe) = Self::new();
        probe.disconnect();
        (sink, probe)
    }

    fn broken_pipe() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "peer disconnected")
    }
}

impl ResponseSink for MemorySink {
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn send_status(&mut self, status: u16) -> io::Result<()> {
        let mut record = self.record.lock();
        record.status_writes += 1;
        if record.status.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "status already sent",
            ));
        }
        record.status = Some(status);
        record.headers = self.headers.clone();
        Ok(())
    }

    fn status_sent(&self) -> bool {
        self.record.lock().status.is_some()
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut record = self.record.lock();
        if record.disconnected {
            return Err(Self::broken_pipe());
        }
        record.body.extend_from_slice(buf);
        Ok(())
    }

    fn begin_stream(&mut self) -> io::Result<()> {
        self.record.lock().streamed = true;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut record = self.record.lock();
        if record.disconnected {
            return Err(Self::broken_pipe());
        }
        record.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.record.lock().closed = true;
        Ok(())
    }
}
