mod common;

use common::fixtures::{local_config, TestServer};
use common::http::{get, send_bytes};
use crossbeam_channel::{bounded, Sender};
use pinhttp::{HandlerResult, RequestContext, ResponseDescriptor, ServerBuilder};
use serde_json::json;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

fn ticks(ctx: &RequestContext) -> HandlerResult {
    let count = ctx.query_param_first_as_long("n")?.unwrap_or(3);
    let mut events = ctx.open_event_stream()?;
    thread::spawn(move || {
        for n in 0..count {
            if !events.send_object(&json!({ "n": n })) {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        events.send_event("done", "bye");
        events.close();
    });
    Ok(ResponseDescriptor::keep_open())
}

fn endless(
    done: Sender<usize>,
) -> impl Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static {
    move |ctx: &RequestContext| {
        let mut events = ctx.open_event_stream()?;
        let done = done.clone();
        thread::spawn(move || {
            let mut sent = 0;
            while events.send("tick") {
                sent += 1;
                thread::sleep(Duration::from_millis(20));
            }
            done.send(sent).ok();
        });
        Ok(ResponseDescriptor::keep_open())
    }
}

#[test]
fn test_event_stream_frames_arrive_chunked() {
    let srv = TestServer::start(ServerBuilder::new(local_config()).get("/events", ticks));
    let resp = get(&srv.addr, "/events?n=3", &[]);
    assert_eq!(resp.status, 200);
    assert_eq!(
        resp.header("content-type"),
        Some("text/event-stream; charset=utf-8")
    );
    assert_eq!(resp.header("cache-control"), Some("no-cache"));
    assert_eq!(resp.header("transfer-encoding"), Some("chunked"));
    assert!(resp.header("content-length").is_none());
    assert_eq!(
        resp.text(),
        "data: {\"n\":0}\n\ndata: {\"n\":1}\n\ndata: {\"n\":2}\n\nevent: done\ndata: bye\n\n"
    );
}

#[test]
fn test_event_stream_http10_ends_at_close() {
    let srv = TestServer::start(ServerBuilder::new(local_config()).get("/events", ticks));
    let resp = send_bytes(
        &srv.addr,
        b"GET /events?n=1 HTTP/1.0\r\n\r\n",
        Duration::from_secs(5),
    );
    assert_eq!(resp.status, 200);
    assert!(resp.header("transfer-encoding").is_none());
    assert_eq!(resp.text(), "data: {\"n\":0}\n\nevent: done\ndata: bye\n\n");
}

#[test]
fn test_bad_query_fails_before_stream_opens() {
    let srv = TestServer::start(ServerBuilder::new(local_config()).get("/events", ticks));
    let resp = get(&srv.addr, "/events?n=many", &[]);
    assert_eq!(resp.status, 400);
    assert_eq!(resp.json()["fieldName"], "n");
}

#[test]
fn test_client_disconnect_ends_stream() {
    let (tx, rx) = bounded(1);
    let srv = TestServer::start(ServerBuilder::new(local_config()).get("/endless", endless(tx)));

    let mut stream = TcpStream::connect(srv.addr).unwrap();
    stream
        .write_all(b"GET /endless HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 1024];
    let mut seen = Vec::new();
    while !String::from_utf8_lossy(&seen).contains("data: tick") {
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "server closed before the first event");
        seen.extend_from_slice(&buf[..n]);
    }
    drop(stream);

    let sent = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("stream did not notice the disconnect");
    assert!(sent >= 1);
}
