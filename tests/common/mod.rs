#![allow(dead_code)]

pub mod http {
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::{Duration, Instant};

    /// A parsed HTTP/1.1 response; header names are lower-cased.
    #[derive(Debug)]
    pub struct HttpResponse {
        pub status: u16,
        pub headers: HashMap<String, String>,
        pub body: Vec<u8>,
    }

    impl HttpResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }
    }

    /// Send a raw request and read until the server closes or the chunked body ends.
    pub fn send_request(addr: &SocketAddr, req: &str) -> HttpResponse {
        send_bytes(addr, req.as_bytes(), Duration::from_secs(5))
    }

    pub fn send_bytes(addr: &SocketAddr, req: &[u8], timeout: Duration) -> HttpResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req).unwrap();
        stream.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let deadline = Instant::now() + timeout;
        let mut buf = Vec::new();
        loop {
            let mut tmp = [0u8; 4096];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    if is_complete(&buf) {
                        break;
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if Instant::now() > deadline {
                        break;
                    }
                }
                Err(e) => panic!("read error: {e:?}"),
            }
        }
        parse_response(&buf)
    }

    /// `GET` with extra headers; the connection is closed after the response.
    pub fn get(addr: &SocketAddr, path: &str, headers: &[(&str, &str)]) -> HttpResponse {
        request(addr, "GET", path, headers, b"")
    }

    pub fn request(
        addr: &SocketAddr,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> HttpResponse {
        let mut req = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
        for (name, value) in headers {
            req.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            req.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        req.push_str("\r\n");
        let mut bytes = req.into_bytes();
        bytes.extend_from_slice(body);
        send_bytes(addr, &bytes, Duration::from_secs(5))
    }

    fn split_head(buf: &[u8]) -> Option<(&[u8], &[u8])> {
        let pos = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
        Some((&buf[..pos], &buf[pos + 4..]))
    }

    fn is_complete(buf: &[u8]) -> bool {
        let Some((head, body)) = split_head(buf) else {
            return false;
        };
        let head = String::from_utf8_lossy(head).to_ascii_lowercase();
        if head.contains("transfer-encoding: chunked") {
            return body.ends_with(b"0\r\n\r\n");
        }
        head.lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .is_some_and(|len| body.len() >= len)
    }

    fn dechunk(mut body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let Some(line_end) = body.windows(2).position(|w| w == b"\r\n") else {
                break;
            };
            let size_line = String::from_utf8_lossy(&body[..line_end]).into_owned();
            let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("0").trim(), 16)
                .unwrap_or(0);
            body = &body[line_end + 2..];
            if size == 0 || body.len() < size {
                break;
            }
            out.extend_from_slice(&body[..size]);
            body = &body[(size + 2).min(body.len())..];
        }
        out
    }

    pub fn parse_response(buf: &[u8]) -> HttpResponse {
        let (head, body) = split_head(buf).unwrap_or((buf, &[]));
        let head = String::from_utf8_lossy(head);
        let mut lines = head.split("\r\n");
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers: HashMap<String, String> = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_owned()))
            .collect();
        let chunked = headers
            .get("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        let body = if chunked { dechunk(body) } else { body.to_vec() };
        HttpResponse {
            status,
            headers,
            body,
        }
    }
}

pub mod fixtures {
    use pinhttp::server::{IncomingRequest, MemorySink, RecordedResponse};
    use pinhttp::{App, ServerBuilder, ServerConfig, ServerHandle};
    use std::net::{Ipv4Addr, SocketAddr};

    /// Loopback config on a free port.
    pub fn local_config() -> ServerConfig {
        ServerConfig::default()
            .with_bind_address(Ipv4Addr::LOCALHOST.into())
            .with_port(0)
            .with_workers(4)
    }

    /// Run one request through the app and return what the sink recorded.
    pub fn dispatch(app: &App, request: IncomingRequest) -> RecordedResponse {
        let (sink, probe) = MemorySink::new();
        app.dispatch(request, Box::new(sink));
        probe.snapshot()
    }

    /// A live server owned by the test; stopped on drop.
    pub struct TestServer {
        handle: Option<ServerHandle>,
        pub addr: SocketAddr,
    }

    impl TestServer {
        pub fn start(builder: ServerBuilder) -> Self {
            let app = builder.build().unwrap();
            let handle = app.start().unwrap();
            handle.wait_ready().unwrap();
            let addr = handle.local_addr();
            Self {
                handle: Some(handle),
                addr,
            }
        }

        pub fn handle(&self) -> &ServerHandle {
            self.handle.as_ref().unwrap()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(handle) = self.handle.take() {
                handle.stop();
            }
        }
    }
}

pub mod multipart {
    pub const BOUNDARY: &str = "pinhttp-boundary";

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    /// Encode text fields and `(field, file name, content)` files.
    pub fn body(fields: &[(&str, &str)], files: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut out = String::new();
        for (name, value) in fields {
            out.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        for (name, file_name, content) in files {
            out.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
            ));
        }
        out.push_str(&format!("--{BOUNDARY}--\r\n"));
        out.into_bytes()
    }
}
