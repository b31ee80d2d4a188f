//! `tiny_http` transport.
//!
//! One acceptor thread pulls requests off the listener and queues each one on the
//! [`WorkerPool`]. The worker reads the body, wraps the request in a [`TinySink`] and hands both to
//! the [`Dispatcher`].
//!
//! Responses are buffered and sent with a `Content-Length` when the sink is closed. A sink that
//! switches to streaming (SSE) takes over the raw connection and writes a chunked body, so every
//! flush reaches the client immediately.

use super::exchange::{Headers, IncomingRequest, ResponseSink};
use crate::dispatcher::Dispatcher;
use crate::error::InitializationError;
use crate::worker_pool::{WorkerPool, WorkerPoolConfig, WorkerPoolMetrics};
use std::io::{self, Cursor, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

/// How long the acceptor waits for a request before re-checking the stop flag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// HTTP server bound to a dispatcher and a worker pool configuration.
pub struct HttpServer {
    dispatcher: Arc<Dispatcher>,
    pool: WorkerPoolConfig,
}

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it gracefully,
/// or joining the acceptor thread.
pub struct ServerHandle {
    addr: SocketAddr,
    server: Arc<Server>,
    stopping: Arc<AtomicBool>,
    acceptor: JoinHandle<()>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl ServerHandle {
    /// Address the listener is bound to; the real port when `0` was requested.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// Polls the server address by attempting TCP connections until successful.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        let target = connectable(self.addr);
        for _ in 0..50 {
            if TcpStream::connect(target).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    /// Stop accepting, let queued requests finish and join every server thread.
    pub fn stop(self) {
        info!(addr = %self.addr, "Stopping HTTP server");
        self.stopping.store(true, Ordering::SeqCst);
        self.server.unblock();
        if self.acceptor.join().is_err() {
            error!("Acceptor thread panicked");
        }
    }

    /// Block on the acceptor thread; for a process whose only job is serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the acceptor thread panicked.
    pub fn join(self) -> thread::Result<()> {
        self.acceptor.join()
    }
}

impl HttpServer {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, pool: WorkerPoolConfig) -> Self {
        Self { dispatcher, pool }
    }

    /// Bind `addr` and start serving.
    ///
    /// # Errors
    ///
    /// [`InitializationError::Bind`] when the port cannot be bound and
    /// [`InitializationError::Spawn`] when the server threads cannot be created.
    pub fn start(self, addr: SocketAddr) -> Result<ServerHandle, InitializationError> {
        let server = Server::http(addr).map_err(|source| InitializationError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let server = Arc::new(server);
        let local = server.server_addr().to_ip().unwrap_or(addr);

        let pool = WorkerPool::new(self.pool).map_err(InitializationError::Spawn)?;
        let metrics = Arc::clone(pool.metrics());
        let stopping = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let server = Arc::clone(&server);
            let stopping = Arc::clone(&stopping);
            let dispatcher = self.dispatcher;
            thread::Builder::new()
                .name("pinhttp-acceptor".to_owned())
                .spawn(move || accept_loop(&server, &stopping, &dispatcher, pool))
                .map_err(InitializationError::Spawn)?
        };

        info!(addr = %local, workers = self.pool.num_workers, "HTTP server listening");
        Ok(ServerHandle {
            addr: local,
            server,
            stopping,
            acceptor,
            metrics,
        })
    }
}

fn accept_loop(
    server: &Server,
    stopping: &AtomicBool,
    dispatcher: &Arc<Dispatcher>,
    mut pool: WorkerPool,
) {
    while !stopping.load(Ordering::SeqCst) {
        match server.recv_timeout(ACCEPT_POLL) {
            Ok(Some(request)) => {
                let dispatcher = Arc::clone(dispatcher);
                if pool.execute(move || serve(&dispatcher, request)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "Failed to accept request");
            }
        }
    }
    pool.shutdown();
    debug!("Acceptor thread exiting");
}

fn serve(dispatcher: &Dispatcher, mut request: Request) {
    let mut body = Vec::new();
    if let Err(e) = request.as_reader().read_to_end(&mut body) {
        warn!(error = %e, url = %request.url(), "Failed to read request body");
        if let Err(e) = request.respond(Response::empty(StatusCode(400))) {
            debug!(error = %e, "Failed to answer unreadable request");
        }
        return;
    }

    let mut incoming = IncomingRequest::new(request.method().to_string(), request.url());
    incoming.headers = request
        .headers()
        .iter()
        .map(|h| (h.field.to_string(), h.value.to_string()))
        .collect();
    let incoming = incoming.with_body(body);

    let version = request.http_version();
    let chunked = version.0 > 1 || (version.0 == 1 && version.1 >= 1);
    dispatcher.dispatch(incoming, Box::new(TinySink::new(request, chunked)));
}

/// A wildcard bind address is not connectable; use loopback of the same family instead.
fn connectable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

fn to_tiny_headers(headers: &Headers) -> Vec<Header> {
    headers
        .iter()
        .filter_map(|(name, value)| match Header::from_bytes(name, value) {
            Ok(h) => Some(h),
            Err(()) => {
                warn!(header = %name, "Dropping header with invalid characters");
                None
            }
        })
        .collect()
}

struct Stream {
    writer: Box<dyn Write + Send>,
    chunked: bool,
}

impl Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if self.chunked {
            write!(self.writer, "{:X}\r\n", buf.len())?;
            self.writer.write_all(buf)?;
            self.writer.write_all(b"\r\n")
        } else {
            self.writer.write_all(buf)
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.chunked {
            self.writer.write_all(b"0\r\n\r\n")?;
        }
        self.writer.flush()
    }
}

/// [`ResponseSink`] over a `tiny_http` request.
pub struct TinySink {
    request: Option<Request>,
    chunked: bool,
    headers: Headers,
    status: Option<u16>,
    /// Headers captured by `send_status`.
    sent_headers: Headers,
    body: Vec<u8>,
    stream: Option<Stream>,
    closed: bool,
}

impl TinySink {
    fn new(request: Request, chunked: bool) -> Self {
        Self {
            request: Some(request),
            chunked,
            headers: Headers::new(),
            status: None,
            sent_headers: Headers::new(),
            body: Vec::new(),
            stream: None,
            closed: false,
        }
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "response already closed")
    }
}

impl ResponseSink for TinySink {
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn send_status(&mut self, status: u16) -> io::Result<()> {
        if self.status.is_some() {
            return Err(io::Error::new(io::ErrorKind::Other, "status already sent"));
        }
        self.status = Some(status);
        self.sent_headers = self.headers.clone();
        Ok(())
    }

    fn status_sent(&self) -> bool {
        self.status.is_some()
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(Self::closed_error());
        }
        match &mut self.stream {
            Some(stream) => stream.write(buf),
            None => {
                self.body.extend_from_slice(buf);
                Ok(())
            }
        }
    }

    fn begin_stream(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let status = self.status.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "stream started before status")
        })?;
        let request = self.request.take().ok_or_else(Self::closed_error)?;
        let mut writer = request.into_writer();

        let mut head = format!("HTTP/1.1 {status} {}\r\n", reason_phrase(status));
        for (name, value) in self.sent_headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length")
                || name.eq_ignore_ascii_case("Transfer-Encoding")
            {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        if self.chunked {
            head.push_str("Transfer-Encoding: chunked\r\n");
        }
        head.push_str("\r\n");
        writer.write_all(head.as_bytes())?;

        let mut stream = Stream {
            writer,
            chunked: self.chunked,
        };
        let pending = std::mem::take(&mut self.body);
        stream.write(&pending)?;
        stream.writer.flush()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            Some(stream) => stream.writer.flush(),
            None if self.closed => Err(Self::closed_error()),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut stream) = self.stream.take() {
            return stream.finish();
        }
        let Some(request) = self.request.take() else {
            return Ok(());
        };
        let status = self.status.unwrap_or(500);
        let body = std::mem::take(&mut self.body);
        let len = body.len();
        let response = Response::new(
            StatusCode(status),
            to_tiny_headers(&self.sent_headers),
            Cursor::new(body),
            Some(len),
            None,
        );
        request.respond(response)
    }
}

impl Drop for TinySink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "Closing dropped response failed");
        }
    }
}
