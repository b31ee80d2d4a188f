mod common;

use common::fixtures::dispatch;
use common::multipart;
use http::Method;
use pinhttp::router::RouteOptions;
use pinhttp::server::IncomingRequest;
use pinhttp::{
    App, BadRequest, EnumAdapter, EnumRegistry, HandlerError, HandlerResult, JsonContext,
    RequestContext, ResponseDescriptor, ServerBuilder, ServerConfig,
};
use serde_json::json;
use std::io::{self, Read};

#[derive(Debug, thiserror::Error)]
#[error("Fake internal error")]
struct FakeInternalError;

fn hello4(ctx: &RequestContext) -> HandlerResult {
    let param = ctx.path_param("param1").unwrap_or_default();
    Ok(ResponseDescriptor::ok_text(format!("hello4-ok-{param}")))
}

fn get_user(ctx: &RequestContext) -> HandlerResult {
    let raw = ctx.path_param("id").unwrap_or_default();
    let id: i64 = raw.parse().map_err(|e| BadRequest::can_not_parse(&e))?;
    if id < 0 {
        return Err(FakeInternalError.into());
    }
    if id >= 10 {
        return Ok(ResponseDescriptor::not_found_msg(
            "NOT_FOUND",
            format!("There is no user with id = {id}"),
        ));
    }
    Ok(ResponseDescriptor::ok(json!({ "id": id, "firstName": format!("firstName{id}") })))
}

fn users_app() -> App {
    ServerBuilder::new(ServerConfig::default())
        .get("/hello4/:param1", hello4)
        .get("/v1/users/:id", get_user)
        .build()
        .unwrap()
}

#[test]
fn test_path_parameter_reaches_handler() {
    let rec = dispatch(&users_app(), IncomingRequest::new("GET", "/hello4/world"));
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.body_text(), "hello4-ok-world");
    assert_eq!(rec.header("Content-Type"), Some("text/plain; charset=utf-8"));
    assert!(rec.closed);
    assert_eq!(rec.status_writes, 1);
}

#[test]
fn test_unparseable_id_is_bad_request() {
    let rec = dispatch(&users_app(), IncomingRequest::new("GET", "/v1/users/xxx"));
    assert_eq!(rec.status, Some(400));
    let body = rec.body_json().unwrap();
    assert_eq!(body["messageKey"], "CAN_NOT_PARSE");
    assert_eq!(body["type"], "core::num::error::ParseIntError");
    assert_eq!(body["message"], "invalid digit found in string");
}

#[test]
fn test_unknown_user_renders_not_found_message() {
    let rec = dispatch(&users_app(), IncomingRequest::new("GET", "/v1/users/300"));
    assert_eq!(rec.status, Some(404));
    let body = rec.body_json().unwrap();
    assert_eq!(body["type"], "NOT_FOUND");
    assert_eq!(body["message"], "There is no user with id = 300");
}

#[test]
fn test_handler_error_is_internal() {
    let rec = dispatch(&users_app(), IncomingRequest::new("GET", "/v1/users/-1"));
    assert_eq!(rec.status, Some(500));
    let body = rec.body_json().unwrap();
    assert!(body["type"].as_str().unwrap().ends_with("FakeInternalError"));
    assert_eq!(body["message"], "Fake internal error");
}

#[test]
fn test_found_user_is_json() {
    let rec = dispatch(&users_app(), IncomingRequest::new("GET", "/v1/users/3"));
    assert_eq!(rec.status, Some(200));
    assert_eq!(
        rec.header("Content-Type"),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(rec.body_json().unwrap()["firstName"], "firstName3");
}

#[test]
fn test_ambiguous_routes_fall_through_to_not_found() {
    fn any(_ctx: &RequestContext) -> HandlerResult {
        Ok(ResponseDescriptor::ok_text("matched"))
    }
    let app = ServerBuilder::new(ServerConfig::default())
        .get("/a/:x", any)
        .get("/a/b", any)
        .build()
        .unwrap();

    let rec = dispatch(&app, IncomingRequest::new("GET", "/a/b"));
    assert_eq!(rec.status, Some(404));
    assert_eq!(rec.body_text(), "Can not find /a/b");

    // a single candidate still matches
    let rec = dispatch(&app, IncomingRequest::new("GET", "/a/c"));
    assert_eq!(rec.body_text(), "matched");
}

#[test]
fn test_not_found_is_json_for_json_clients() {
    let rec = dispatch(
        &users_app(),
        IncomingRequest::new("GET", "/nowhere?x=1").with_header("Accept", "application/json"),
    );
    assert_eq!(rec.status, Some(404));
    assert_eq!(rec.body_json().unwrap(), json!({ "requestUri": "/nowhere?x=1" }));
}

#[test]
fn test_unregistered_method_is_405_with_allow() {
    let app = ServerBuilder::new(ServerConfig::default())
        .get("/a", hello4)
        .post("/a", hello4)
        .build()
        .unwrap();
    let rec = dispatch(&app, IncomingRequest::new("DELETE", "/a"));
    assert_eq!(rec.status, Some(405));
    assert_eq!(rec.header("Allow"), Some("GET, POST"));
    assert_eq!(rec.body_json().unwrap()["type"], "METHOD_NOT_ALLOWED");

    // the method exists but the path does not: plain 404
    let rec = dispatch(&app, IncomingRequest::new("POST", "/b"));
    assert_eq!(rec.status, Some(404));
}

#[test]
fn test_app_context_root_redirects() {
    let app = ServerBuilder::new(ServerConfig::default().with_app_context("demo"))
        .get("/", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("root")))
        .build()
        .unwrap();
    let rec = dispatch(&app, IncomingRequest::new("GET", "/demo?a=1"));
    assert_eq!(rec.status, Some(301));
    assert_eq!(rec.header("Location"), Some("/demo/?a=1"));
    assert!(rec.body.is_empty());

    let rec = dispatch(&app, IncomingRequest::new("GET", "/demo/"));
    assert_eq!(rec.body_text(), "root");
}

#[test]
fn test_accept_selects_route_variant() {
    let app = ServerBuilder::new(ServerConfig::default())
        .route_with(
            Method::GET,
            "/greeting",
            RouteOptions::default().content_types(["text/plain"]),
            |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("greeting-text")),
        )
        .route_with(
            Method::GET,
            "/greeting",
            RouteOptions::default().content_types(["application/json"]),
            |_ctx: &RequestContext| Ok(ResponseDescriptor::ok(json!({ "greeting": "json" }))),
        )
        .build()
        .unwrap();

    let rec = dispatch(
        &app,
        IncomingRequest::new("GET", "/greeting").with_header("Accept", "text/plain"),
    );
    assert_eq!(rec.body_text(), "greeting-text");

    let rec = dispatch(
        &app,
        IncomingRequest::new("GET", "/greeting")
            .with_header("Accept", "application/json; q=0.9"),
    );
    assert_eq!(rec.body_json().unwrap()["greeting"], "json");

    let rec = dispatch(
        &app,
        IncomingRequest::new("GET", "/greeting").with_header("Accept", "image/png"),
    );
    assert_eq!(rec.status, Some(404));

    // curl and browsers
    let rec = dispatch(
        &app,
        IncomingRequest::new("GET", "/greeting").with_header("Accept", "*/*"),
    );
    assert_eq!(rec.body_text(), "greeting-text");
    let rec = dispatch(
        &app,
        IncomingRequest::new("GET", "/greeting")
            .with_header("Accept", "text/html,application/xml;q=0.9,application/*;q=0.8"),
    );
    assert_eq!(rec.body_json().unwrap()["greeting"], "json");
}

#[test]
fn test_content_type_selects_route_variant() {
    let app = ServerBuilder::new(ServerConfig::default())
        .route_with(
            Method::POST,
            "/items",
            RouteOptions::default().content_types(["application/json"]),
            |ctx: &RequestContext| {
                let name = ctx.param("name").unwrap_or_default().into_owned();
                Ok(ResponseDescriptor::ok_text(format!("json:{name}")))
            },
        )
        .route_with(
            Method::POST,
            "/items",
            RouteOptions::default().content_types(["application/x-www-form-urlencoded"]),
            |ctx: &RequestContext| {
                let name = ctx.form_param_first("name").unwrap_or_default().to_owned();
                Ok(ResponseDescriptor::ok_text(format!("form:{name}")))
            },
        )
        .build()
        .unwrap();

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/items")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"name":"a"}"#),
    );
    assert_eq!(rec.body_text(), "json:a");

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/items")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("name=b"),
    );
    assert_eq!(rec.body_text(), "form:b");
}

#[test]
fn test_form_body_lists() {
    let app = ServerBuilder::new(ServerConfig::default())
        .post("/tags", |ctx: &RequestContext| {
            let tags: Vec<String> = ctx
                .form_param_list("tag")
                .iter()
                .map(|v| v.clone().unwrap_or_else(|| "<null>".to_owned()))
                .collect();
            let age = ctx.form_param_first_as_long("age")?;
            Ok(ResponseDescriptor::ok(json!({ "tags": tags, "age": age })))
        })
        .build()
        .unwrap();

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/tags")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("tag=a&tag=b%20c&tag&age=33"),
    );
    assert_eq!(rec.status, Some(200));
    assert_eq!(
        rec.body_json().unwrap(),
        json!({ "tags": ["a", "b c", "<null>"], "age": 33 })
    );

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/tags")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("age=old"),
    );
    assert_eq!(rec.status, Some(400));
    let body = rec.body_json().unwrap();
    assert_eq!(body["messageKey"], "CAN_NOT_CONVERT");
    assert_eq!(body["fieldName"], "age");
    assert_eq!(body["currentValue"], "old");
}

#[test]
fn test_malformed_form_escape_is_bad_request() {
    let app = ServerBuilder::new(ServerConfig::default())
        .post("/f", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_empty()))
        .build()
        .unwrap();
    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/f")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("a=%zz"),
    );
    assert_eq!(rec.status, Some(400));
    assert_eq!(rec.body_json().unwrap()["messageKey"], "CAN_NOT_PARSE");
}

#[test]
fn test_multipart_fields_and_file() {
    let app = ServerBuilder::new(ServerConfig::default())
        .post("/upload", |ctx: &RequestContext| {
            let file = ctx
                .file_param("doc")
                .ok_or_else(|| HandlerError::internal("missing", "no file"))?;
            let content = file.content_as_string()?;
            let title = ctx.form_param_first("title").unwrap_or_default();
            Ok(ResponseDescriptor::ok_text(format!("{title}:{}:{content}", file.name())))
        })
        .build()
        .unwrap();

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/upload")
            .with_header("Content-Type", &multipart::content_type())
            .with_body(multipart::body(&[("title", "report")], &[("doc", "a.txt", "line one")])),
    );
    assert_eq!(rec.status, Some(200), "{}", rec.body_text());
    assert_eq!(rec.body_text(), "report:a.txt:line one");
}

#[test]
fn test_multipart_ignored_without_upload_support() {
    let app = ServerBuilder::new(ServerConfig::default().with_upload_support(false))
        .post("/upload", |ctx: &RequestContext| {
            Ok(ResponseDescriptor::ok_text(format!(
                "{}",
                ctx.file_params().len() + ctx.form_param_list("title").len()
            )))
        })
        .build()
        .unwrap();
    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/upload")
            .with_header("Content-Type", &multipart::content_type())
            .with_body(multipart::body(&[("title", "x")], &[("doc", "a.txt", "y")])),
    );
    assert_eq!(rec.body_text(), "0");
}

#[test]
fn test_bad_json_body_is_bad_request() {
    let app = ServerBuilder::new(ServerConfig::default())
        .post("/users", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_empty()))
        .build()
        .unwrap();

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/users")
            .with_header("Content-Type", "application/json")
            .with_body("{\"firstName\":"),
    );
    assert_eq!(rec.status, Some(400));
    let body = rec.body_json().unwrap();
    assert_eq!(body["messageKey"], "CAN_NOT_PARSE");
    assert_eq!(body["type"], "serde_json::error::Error");

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/users")
            .with_header("Content-Type", "application/json")
            .with_body("[1, 2]"),
    );
    assert_eq!(rec.status, Some(400));
}

#[test]
fn test_other_content_type_yields_empty_params() {
    let app = ServerBuilder::new(ServerConfig::default())
        .post("/raw", |ctx: &RequestContext| {
            Ok(ResponseDescriptor::ok_text(format!(
                "{}",
                ctx.body_params().len() + ctx.form_param_list("a").len()
            )))
        })
        .build()
        .unwrap();
    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/raw")
            .with_header("Content-Type", "text/csv")
            .with_body("a=1"),
    );
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.body_text(), "0");
}

#[test]
fn test_download_headers() {
    let app = ServerBuilder::new(ServerConfig::default())
        .get("/file-to-download", |_ctx: &RequestContext| {
            Ok(ResponseDescriptor::ok_download_text("file-content", "file name.txt"))
        })
        .build()
        .unwrap();
    let rec = dispatch(&app, IncomingRequest::new("GET", "/file-to-download"));
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.header("Content-Type"), Some("application/force-download"));
    assert_eq!(
        rec.header("Content-Disposition"),
        Some("attachment; filename=\"file+name.txt\";")
    );
    assert_eq!(rec.body_text(), "file-content");
}

#[test]
fn test_panic_becomes_internal_error() {
    let app = ServerBuilder::new(ServerConfig::default())
        .get("/boom", |_ctx: &RequestContext| -> HandlerResult {
            panic!("kaboom");
        })
        .get("/ok", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("still here")))
        .build()
        .unwrap();

    let rec = dispatch(&app, IncomingRequest::new("GET", "/boom"));
    assert_eq!(rec.status, Some(500));
    assert_eq!(
        rec.body_json().unwrap(),
        json!({ "type": "panic", "message": "kaboom" })
    );
    assert!(rec.closed);

    let rec = dispatch(&app, IncomingRequest::new("GET", "/ok"));
    assert_eq!(rec.body_text(), "still here");
}

/// Yields some bytes, then fails.
struct FailingReader {
    sent: bool,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.sent {
            return Err(io::Error::new(io::ErrorKind::Other, "disk gone"));
        }
        self.sent = true;
        buf[..4].copy_from_slice(b"head");
        Ok(4)
    }
}

#[test]
fn test_body_failure_after_status_keeps_status() {
    let app = ServerBuilder::new(ServerConfig::default())
        .get("/broken", |_ctx: &RequestContext| {
            Ok(ResponseDescriptor::ok_download(
                FailingReader { sent: false },
                "broken.bin",
            ))
        })
        .build()
        .unwrap();
    let rec = dispatch(&app, IncomingRequest::new("GET", "/broken"));
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.status_writes, 1);
    assert_eq!(rec.body_text(), "head");
    assert!(rec.closed);
}

#[test]
fn test_keep_open_event_stream() {
    let app = ServerBuilder::new(ServerConfig::default())
        .get("/events", |ctx: &RequestContext| {
            let mut events = ctx.open_event_stream()?;
            events.send_event("tick", "1");
            events.send_object(&json!({ "n": 2 }));
            events.close();
            Ok(ResponseDescriptor::keep_open())
        })
        .build()
        .unwrap();

    let rec = dispatch(&app, IncomingRequest::new("GET", "/events"));
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.status_writes, 1);
    assert!(rec.streamed);
    assert!(rec
        .header("Content-Type")
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(
        rec.body_text(),
        "event: tick\ndata: 1\n\ndata: {\"n\":2}\n\n"
    );
    assert!(rec.closed);
}

#[test]
fn test_external_folder_under_app_context() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "Hello from disk").unwrap();

    let config = ServerConfig::default()
        .with_app_context("demo")
        .with_external_folder(dir.path());
    let app = ServerBuilder::new(config)
        .get("/api", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("api")))
        .build()
        .unwrap();

    let rec = dispatch(&app, IncomingRequest::new("GET", "/demo/hello.txt"));
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.body_text(), "Hello from disk");
    assert!(rec.header("Content-Type").unwrap().starts_with("text/plain"));

    // routes win over files, and files are only visible inside the context
    let rec = dispatch(&app, IncomingRequest::new("GET", "/demo/api"));
    assert_eq!(rec.body_text(), "api");
    let rec = dispatch(&app, IncomingRequest::new("GET", "/hello.txt"));
    assert_eq!(rec.status, Some(404));
    let rec = dispatch(&app, IncomingRequest::new("GET", "/demo/../hello.txt"));
    assert_eq!(rec.status, Some(404));
}

#[test]
fn test_unknown_method_name_is_405() {
    let rec = dispatch(&users_app(), IncomingRequest::new("BR EW", "/v1/users/1"));
    assert_eq!(rec.status, Some(405));
}

#[test]
fn test_405_with_external_folder() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "Hello from disk").unwrap();

    let app = ServerBuilder::new(ServerConfig::default().with_external_folder(dir.path()))
        .get("/api", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("api")))
        .build()
        .unwrap();

    // files answer reads only
    let rec = dispatch(&app, IncomingRequest::new("GET", "/hello.txt"));
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.body_text(), "Hello from disk");
    let rec = dispatch(&app, IncomingRequest::new("HEAD", "/hello.txt"));
    assert_eq!(rec.status, Some(200));

    // POST has no routes at all: a file path is still 405
    let rec = dispatch(&app, IncomingRequest::new("POST", "/hello.txt"));
    assert_eq!(rec.status, Some(405));
    assert_eq!(rec.header("Allow"), Some("GET"));

    // a route path registered for another verb only
    let rec = dispatch(&app, IncomingRequest::new("POST", "/api"));
    assert_eq!(rec.status, Some(405));
    assert_eq!(rec.header("Allow"), Some("GET"));
}

#[test]
fn test_write_to_file_path_is_404_once_the_verb_has_routes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "Hello from disk").unwrap();

    let app = ServerBuilder::new(ServerConfig::default().with_external_folder(dir.path()))
        .get("/api", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("api")))
        .post("/submit", |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("done")))
        .build()
        .unwrap();

    let rec = dispatch(&app, IncomingRequest::new("POST", "/hello.txt"));
    assert_eq!(rec.status, Some(404));
    assert_eq!(rec.body_text(), "Can not find /hello.txt");
    let rec = dispatch(&app, IncomingRequest::new("PUT", "/hello.txt"));
    assert_eq!(rec.status, Some(405));
    assert_eq!(rec.header("Allow"), Some("GET, POST"));
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shade {
    Light,
    Dark,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Paint {
    #[serde(with = "pinhttp::json::registered_enum")]
    shade: Shade,
}

#[test]
fn test_registered_enum_names_in_bodies() {
    let mut enums = EnumRegistry::new();
    enums.register(
        EnumAdapter::new("Shade")
            .variant(Shade::Light, "LIGHT", &["claro"])
            .variant(Shade::Dark, "DARK", &[]),
    );
    let app = ServerBuilder::new(ServerConfig::default())
        .json_context(JsonContext::new().with_enums(enums))
        .post("/paint", |ctx: &RequestContext| {
            let paint: Paint = ctx.body_as()?;
            Ok(ResponseDescriptor::ok_json(&paint)?)
        })
        .build()
        .unwrap();

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/paint")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"shade":"claro"}"#),
    );
    assert_eq!(rec.status, Some(200));
    assert_eq!(rec.body_json().unwrap(), json!({ "shade": "LIGHT" }));

    let rec = dispatch(
        &app,
        IncomingRequest::new("POST", "/paint")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"shade":"GREY"}"#),
    );
    assert_eq!(rec.status, Some(400));
}
