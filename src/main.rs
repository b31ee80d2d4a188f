//! pinhttp demo server.
//!
//! ```text
//! pinhttp-demo --port 8080 --app-context demo
//! curl localhost:8080/demo/hello4/world
//! curl localhost:8080/demo/v1/users/3
//! curl -N localhost:8080/demo/clock?ticks=3
//! ```

use clap::Parser;
use http::Method;
use parking_lot::Mutex;
use pinhttp::logging::{init_logging, LogConfig, LogFormat};
use pinhttp::router::RouteOptions;
use pinhttp::{
    App, BadRequest, HandlerResult, InitializationError, RequestContext, ResponseDescriptor,
    ServerBuilder, ServerConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pinhttp-demo", version, about = "pinhttp demo server", long_about = None)]
struct Cli {
    /// Listen port (overrides PIN_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address (overrides PIN_BIND)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Path prefix for every route, e.g. `demo`
    #[arg(long)]
    app_context: Option<String>,

    /// Directory served for unmatched GET requests
    #[arg(long)]
    external_folder: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Emit JSON logs
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(ctx) = &self.app_context {
            config.app_context = Some(ctx.clone());
        }
        if let Some(folder) = &self.external_folder {
            config.external_folder = Some(folder.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    first_name: String,
    last_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("Fake internal error")]
struct FakeInternalError;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct InvalidUser(String);

/// In-memory users keyed by id, seeded with ids 0 to 9.
struct UserStore {
    users: Mutex<BTreeMap<i64, UserDto>>,
}

impl UserStore {
    fn seeded() -> Self {
        let users = (0..10)
            .map(|id| {
                (
                    id,
                    UserDto {
                        id: Some(id),
                        first_name: format!("firstName{id}"),
                        last_name: format!("lastName{id}"),
                        tags: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            users: Mutex::new(users),
        }
    }

    fn get(&self, id: i64) -> Result<Option<UserDto>, FakeInternalError> {
        if id < 0 {
            return Err(FakeInternalError);
        }
        Ok(self.users.lock().get(&id).cloned())
    }

    fn list(&self, first_name: Option<&str>, last_name: Option<&str>) -> Vec<UserDto> {
        let contains = |value: &str, filter: Option<&str>| {
            filter.map_or(true, |f| value.to_lowercase().contains(&f.to_lowercase()))
        };
        self.users
            .lock()
            .values()
            .filter(|u| contains(&u.first_name, first_name) && contains(&u.last_name, last_name))
            .cloned()
            .collect()
    }

    fn create(&self, mut user: UserDto) -> Result<UserDto, InvalidUser> {
        if user.id.is_some() {
            return Err(InvalidUser("A new user must not have an id".to_owned()));
        }
        let mut users = self.users.lock();
        let id = users.keys().next_back().map_or(0, |max| max + 1);
        user.id = Some(id);
        users.insert(id, user.clone());
        Ok(user)
    }

    fn update(&self, id: i64, mut user: UserDto) -> Option<UserDto> {
        let mut users = self.users.lock();
        let slot = users.get_mut(&id)?;
        user.id = Some(id);
        *slot = user.clone();
        Some(user)
    }

    fn delete(&self, id: i64) -> Option<UserDto> {
        self.users.lock().remove(&id)
    }
}

fn user_id(ctx: &RequestContext) -> Result<i64, BadRequest> {
    let raw = ctx.path_param("id").unwrap_or_default();
    raw.parse::<i64>().map_err(|e| BadRequest::can_not_parse(&e))
}

fn no_user(id: i64) -> ResponseDescriptor {
    ResponseDescriptor::not_found_msg("NOT_FOUND", format!("There is no user with id = {id}"))
}

fn get_user(store: &UserStore, ctx: &RequestContext) -> HandlerResult {
    let id = user_id(ctx)?;
    match store.get(id)? {
        Some(user) => ResponseDescriptor::ok_json(&user),
        None => Ok(no_user(id)),
    }
}

fn list_users(store: &UserStore, ctx: &RequestContext) -> HandlerResult {
    let users = store.list(
        ctx.query_param_first("firstName"),
        ctx.query_param_first("lastName"),
    );
    ResponseDescriptor::ok_json(&users)
}

fn create_user(store: &UserStore, ctx: &RequestContext) -> HandlerResult {
    let user: UserDto = ctx.body_as()?;
    let created = store.create(user).map_err(|e| BadRequest::can_not_parse(&e))?;
    Ok(ResponseDescriptor::ok_json(&created)?.with_status(201))
}

fn update_user(store: &UserStore, ctx: &RequestContext) -> HandlerResult {
    let id = user_id(ctx)?;
    let user: UserDto = ctx.body_as()?;
    match store.update(id, user) {
        Some(user) => ResponseDescriptor::ok_json(&user),
        None => Ok(no_user(id)),
    }
}

fn delete_user(store: &UserStore, ctx: &RequestContext) -> HandlerResult {
    let id = user_id(ctx)?;
    match store.delete(id) {
        Some(user) => ResponseDescriptor::ok_json(&user),
        None => Ok(no_user(id)),
    }
}

/// One `tick` event per second, `ticks` times (default 5).
fn clock(ctx: &RequestContext) -> HandlerResult {
    let ticks = ctx
        .query_param_first_as_long("ticks")?
        .unwrap_or(5)
        .clamp(1, 3600);
    let mut stream = ctx.open_event_stream()?;
    thread::Builder::new()
        .name("pinhttp-clock".to_owned())
        .spawn(move || {
            for n in 0..ticks {
                let tick = json!({ "n": n, "at": chrono::Utc::now().to_rfc3339() });
                if !stream.send_object(&tick) {
                    return;
                }
                thread::sleep(Duration::from_secs(1));
            }
            stream.send_event("done", "bye");
            stream.close();
        })?;
    Ok(ResponseDescriptor::keep_open())
}

fn build_app(config: ServerConfig) -> Result<App, InitializationError> {
    let store = Arc::new(UserStore::seeded());
    let users = |f: fn(&UserStore, &RequestContext) -> HandlerResult| {
        let store = Arc::clone(&store);
        move |ctx: &RequestContext| f(&store, ctx)
    };

    ServerBuilder::new(config)
        .get("hello", |_ctx: &RequestContext| {
            Ok(ResponseDescriptor::ok_text("hello-ok"))
        })
        .get("hello4/:param1", |ctx: &RequestContext| {
            let param = ctx.path_param("param1").unwrap_or_default();
            Ok(ResponseDescriptor::ok_text(format!("hello4-ok-{param}")))
        })
        .route_with(
            Method::GET,
            "greeting",
            RouteOptions::default().content_types(["text/plain"]),
            |_ctx: &RequestContext| Ok(ResponseDescriptor::ok_text("greeting-text")),
        )
        .route_with(
            Method::GET,
            "greeting",
            RouteOptions::default().content_types(["application/json"]),
            |_ctx: &RequestContext| Ok(ResponseDescriptor::ok(json!({ "greeting": "json" }))),
        )
        .get("v1/users", users(list_users))
        .post("v1/users", users(create_user))
        .get("v1/users/:id", users(get_user))
        .put("v1/users/:id", users(update_user))
        .delete("v1/users/:id", users(delete_user))
        .get("clock", clock)
        .get("file-to-download", |_ctx: &RequestContext| {
            Ok(ResponseDescriptor::ok_download_text(
                "file-content",
                "file-name.txt",
            ))
        })
        .build()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if cli.json_logs {
        log_config.format = LogFormat::Json;
    }
    let _log_guard = init_logging(&log_config)?;

    let config = cli.apply(ServerConfig::from_env()?);
    let app = build_app(config)?;
    let handle = app.start()?;
    info!(addr = %handle.local_addr(), "pinhttp demo ready");

    handle
        .join()
        .map_err(|_| anyhow::anyhow!("acceptor thread panicked"))?;
    Ok(())
}
