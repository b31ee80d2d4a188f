//! # Server-Sent Events (SSE) Module
//!
//! [`EventStream`] writes `text/event-stream` frames straight to a claimed response sink.
//!
//! ## Usage
//!
//! A handler claims the response with
//! [`RequestContext::open_event_stream`](crate::RequestContext::open_event_stream), which sends
//! the stream headers and a `200` status immediately, and then returns
//! [`ResponseDescriptor::keep_open`](crate::ResponseDescriptor::keep_open) so the dispatcher leaves
//! the connection alone. The stream is `Send`, so it can be moved to a thread of the handler's
//! own:
//!
//! ```rust,ignore
//! fn clock(ctx: &RequestContext) -> HandlerResult {
//!     let mut events = ctx.open_event_stream()?;
//!     std::thread::spawn(move || {
//!         while events.send_event("tick", &chrono::Utc::now().to_rfc3339()) {
//!             std::thread::sleep(std::time::Duration::from_secs(1));
//!         }
//!         events.close();
//!     });
//!     Ok(ResponseDescriptor::keep_open())
//! }
//! ```
//!
//! ## SSE Format
//!
//! ```text
//! event: tick
//! data: first line
//! data: second line
//!
//! : a comment
//!
//! ```
//!
//! Every send flushes. A write or flush error (typically the client going away) closes the stream
//! and makes every later send return `false`.

use crate::json::JsonContext;
use crate::render::CONTENT_TYPE;
use crate::server::ResponseSink;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

pub const TEXT_EVENT_STREAM_UTF8: &str = "text/event-stream; charset=utf-8";

/// A live event stream; the connection closes when it is closed or dropped.
pub struct EventStream {
    sink: Box<dyn ResponseSink>,
    json: Arc<JsonContext>,
    open: bool,
}

impl EventStream {
    /// Send the stream headers and status on `sink`.
    ///
    /// # Errors
    ///
    /// Fails when the status or the initial flush cannot be written.
    pub fn open(mut sink: Box<dyn ResponseSink>, json: Arc<JsonContext>) -> io::Result<Self> {
        let headers = sink.headers_mut();
        headers.set(CONTENT_TYPE, TEXT_EVENT_STREAM_UTF8);
        headers.set("Cache-Control", "no-cache");
        headers.set("Connection", "keep-alive");
        sink.send_status(200)?;
        sink.begin_stream()?;
        sink.flush()?;
        debug!("Event stream opened");
        Ok(Self {
            sink,
            json,
            open: true,
        })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send an unnamed event.
    pub fn send(&mut self, data: &str) -> bool {
        self.write_frame(&frame(None, data))
    }

    pub fn send_event(&mut self, event: &str, data: &str) -> bool {
        self.write_frame(&frame(Some(event), data))
    }

    /// Send `value` serialised as JSON.
    pub fn send_object<T: Serialize + ?Sized>(&mut self, value: &T) -> bool {
        match self.json.to_string(value) {
            Ok(data) => self.send(&data),
            Err(err) => {
                warn!(error = %err, "Event payload could not be serialised");
                false
            }
        }
    }

    pub fn comment(&mut self, text: &str) -> bool {
        let mut out = String::with_capacity(text.len() + 4);
        for line in text.lines() {
            out.push_str(": ");
            out.push_str(line);
            out.push('\n');
        }
        if text.is_empty() {
            out.push_str(":\n");
        }
        out.push('\n');
        self.write_frame(&out)
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.sink.close() {
            debug!(error = %err, "Event stream close failed");
        }
    }

    fn write_frame(&mut self, frame: &str) -> bool {
        if !self.open {
            return false;
        }
        let result = self
            .sink
            .write_body(frame.as_bytes())
            .and_then(|()| self.sink.flush());
        match result {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, kind = ?err.kind(), "Event stream client disconnected");
                self.close();
                false
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

/// One `data:` line per input line, then the blank terminator.
fn frame(event: Option<&str>, data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 16);
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    if data.is_empty() {
        out.push_str("data: \n");
    }
    for line in data.lines() {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}
