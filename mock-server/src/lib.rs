//! In-process stand-in for the versioned, library-scoped bibliographic API.
//!
//! # Overview
//! An axum app serving user and group libraries of items, collections and
//! searches, plus item templates, tags, admin-created groups and attachment
//! file redirects. State lives in one `Store` behind a tokio `RwLock`.
//!
//! # Design
//! - Protocol version comes from `Zotero-API-Version` or `?v=`, defaulting to
//!   `MockConfig::default_api_version`. Version 3 speaks JSON with bare-array
//!   writes and a `successful` map; version 2 speaks Atom with wrapped writes
//!   and only the `success` map.
//! - Any request may authenticate with the `Zotero-API-Key` header, a
//!   `Bearer` token or `?key=`. Writes require a valid key. Group admin
//!   routes require Basic credentials instead.
//! - Versioning rules live in `store`; handlers only translate HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};

pub mod groups;
pub mod render;
pub mod store;
pub mod templates;

use render::AtomContent;
use store::{LibraryData, LibraryId, ObjectKind, Rejection, Store, UpdateMode, WriteOutcome, MAX_WRITE_OBJECTS};

pub const API_VERSION_HEADER: &str = "Zotero-API-Version";
pub const API_KEY_HEADER: &str = "Zotero-API-Key";
pub const NOTIFICATIONS_HEADER: &str = "Zotero-Debug-Notifications";
pub const IF_UNMODIFIED_SINCE_VERSION: &str = "If-Unmodified-Since-Version";
pub const IF_MODIFIED_SINCE_VERSION: &str = "If-Modified-Since-Version";
pub const LAST_MODIFIED_VERSION: &str = "Last-Modified-Version";

const DEFAULT_LIMIT: usize = 25;
const MAX_LIMIT: usize = 100;

/// Credentials and defaults the server runs with.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub api_key: String,
    pub admin_username: String,
    pub admin_password: String,
    /// Where attachment downloads are redirected to.
    pub file_base_url: String,
    pub default_api_version: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            api_key: "test-api-key".to_string(),
            admin_username: "admin".to_string(),
            admin_password: "admin-password".to_string(),
            file_base_url: "http://files.localhost".to_string(),
            default_api_version: 3,
        }
    }
}

pub type Db = Arc<RwLock<Store>>;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<MockConfig>,
}

#[derive(Clone, Copy, Debug)]
enum LibraryKind {
    User,
    Group,
}

impl LibraryKind {
    fn library(self, id: u64) -> LibraryId {
        match self {
            LibraryKind::User => LibraryId::User(id),
            LibraryKind::Group => LibraryId::Group(id),
        }
    }
}

pub fn app() -> Router {
    app_with(MockConfig::default())
}

pub fn app_with(config: MockConfig) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(Store::default())),
        config: Arc::new(config),
    };
    let mut router = Router::new()
        .route("/items/new", get(item_template))
        .route("/groups", post(create_group))
        .route("/groups/{id}", delete(delete_group));
    for (prefix, kind) in [("/users/{id}", LibraryKind::User), ("/groups/{id}", LibraryKind::Group)] {
        router = router
            .route(
                &format!("{prefix}/{{segment}}"),
                get(list_objects)
                    .post(write_objects)
                    .delete(delete_objects)
                    .layer(Extension(kind)),
            )
            .route(
                &format!("{prefix}/{{segment}}/{{key}}"),
                get(get_object)
                    .put(put_object)
                    .patch(patch_object)
                    .delete(delete_object)
                    .layer(Extension(kind)),
            )
            .route(
                &format!("{prefix}/{{segment}}/{{key}}/file"),
                get(file_redirect).layer(Extension(kind)),
            );
    }
    router.with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, config: MockConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

/// A response under construction. Handlers return `Result<Reply, Reply>`.
#[derive(Debug)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Reply {
    fn new(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }

    /// Append a header. Values that are not valid header text are dropped.
    fn header(mut self, name: &str, value: impl ToString) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value.to_string()),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    fn body(mut self, content_type: &str, body: String) -> Self {
        self.body = body;
        self.header("Content-Type", content_type)
    }

    fn json(self, value: &Value) -> Self {
        self.body("application/json", value.to_string())
    }

    fn text(self, body: impl Into<String>) -> Self {
        self.body("text/plain", body.into())
    }

    fn atom(self, body: String) -> Self {
        self.body("application/atom+xml", body)
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// What every handler needs to know about the incoming request.
struct RequestContext {
    api_version: u32,
    key: Option<String>,
    params: HashMap<String, String>,
    headers: HeaderMap,
    base: String,
}

impl RequestContext {
    fn new(config: &MockConfig, headers: HeaderMap, params: HashMap<String, String>) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        let api_version = header(API_VERSION_HEADER)
            .or_else(|| params.get("v").cloned())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(config.default_api_version);
        let key = header(API_KEY_HEADER)
            .or_else(|| header("Authorization").and_then(|a| a.strip_prefix("Bearer ").map(str::to_string)))
            .or_else(|| params.get("key").cloned());
        let base = format!("http://{}", header("Host").unwrap_or_else(|| "localhost".to_string()));
        Self {
            api_version,
            key,
            params,
            headers,
            base,
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    fn header_version(&self, name: &str) -> Result<Option<u64>, Reply> {
        match self.header(name) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.error(400, format!("Invalid {name} header '{v}'"))),
        }
    }

    fn param_number(&self, name: &str) -> Result<Option<usize>, Reply> {
        match self.param(name) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.error(400, format!("Invalid '{name}' value '{v}'"))),
        }
    }

    fn format(&self) -> &str {
        self.param("format")
            .unwrap_or(if self.api_version >= 3 { "json" } else { "atom" })
    }

    fn content(&self) -> AtomContent {
        match self.param("content") {
            Some("json") => AtomContent::Json,
            _ => AtomContent::Html,
        }
    }

    fn authorize(&self, config: &MockConfig, write: bool) -> Result<(), Reply> {
        match &self.key {
            Some(key) if *key != config.api_key => Err(self.error(403, "Invalid key")),
            None if write => Err(self.error(403, "Write access denied")),
            _ => Ok(()),
        }
    }

    fn reply(&self, status: u16) -> Reply {
        Reply::new(status).header(API_VERSION_HEADER, self.api_version)
    }

    fn error(&self, status: u16, message: impl Into<String>) -> Reply {
        self.reply(status).text(message)
    }

    fn reject(&self, (status, message): Rejection) -> Reply {
        self.error(status, message)
    }

    /// Change notifications: one base64 JSON array in v3, one raw JSON
    /// header line per notification in v2.
    fn notify(&self, reply: Reply, library: LibraryId, segment: &str) -> Reply {
        let notifications = [
            json!({"event": "topicUpdated", "topic": format!("/{}", library.prefix())}),
            json!({"event": "topicUpdated", "topic": format!("/{}/{segment}", library.prefix())}),
        ];
        if self.api_version >= 3 {
            let encoded = STANDARD.encode(Value::Array(notifications.to_vec()).to_string());
            reply.header(NOTIFICATIONS_HEADER, encoded)
        } else {
            notifications
                .iter()
                .fold(reply, |reply, n| reply.header(NOTIFICATIONS_HEADER, n))
        }
    }

    /// RFC 5988 `Link` header for one page of a listing.
    fn links(&self, library: LibraryId, segment: &str, start: usize, limit: usize, total: usize) -> String {
        let path = format!("{}/{}/{segment}", self.base, library.prefix());
        let format = self.param("format").map(|f| format!("format={f}&")).unwrap_or_default();
        let page = |start: usize| format!("<{path}?{format}limit={limit}&start={start}>");
        let mut links = Vec::new();
        if start > 0 {
            links.push(format!("{}; rel=\"first\"", page(0)));
            links.push(format!("{}; rel=\"prev\"", page(start.saturating_sub(limit))));
        }
        if start.saturating_add(limit) < total {
            links.push(format!("{}; rel=\"next\"", page(start + limit)));
            let last = (total - 1) / limit * limit;
            links.push(format!("{}; rel=\"last\"", page(last)));
        }
        links.push(format!(
            "<{}/{}/{segment}>; rel=\"alternate\"",
            render::WEB_BASE,
            library.prefix()
        ));
        links.join(", ")
    }
}

fn object_kind(ctx: &RequestContext, segment: &str) -> Result<ObjectKind, Reply> {
    ObjectKind::from_plural(segment).ok_or_else(|| ctx.error(404, "Not found"))
}

fn parse_body(ctx: &RequestContext, body: &str) -> Result<Value, Reply> {
    serde_json::from_str(body).map_err(|e| ctx.error(400, format!("Invalid JSON: {e}")))
}

fn split_keys(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

async fn item_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    let item_type = ctx
        .param("itemType")
        .ok_or_else(|| ctx.error(400, "'itemType' not provided"))?;
    let template = templates::item_template(item_type)
        .ok_or_else(|| ctx.error(400, format!("Invalid item type '{item_type}'")))?;
    Ok(ctx.reply(200).json(&template))
}

async fn list_objects(
    State(state): State<AppState>,
    Extension(kind): Extension<LibraryKind>,
    Path((id, segment)): Path<(u64, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    ctx.authorize(&state.config, false)?;
    let library = kind.library(id);
    let store = state.db.read().await;
    if !store.library_exists(library) {
        return Err(ctx.error(404, "Not found"));
    }
    let empty = LibraryData::default();
    let lib = store.library(library).unwrap_or(&empty);

    if segment == "tags" {
        return list_tags(&ctx, library, lib);
    }
    let object_kind = object_kind(&ctx, &segment)?;

    if let Some(since) = ctx.header_version(IF_MODIFIED_SINCE_VERSION)? {
        if lib.version <= since {
            return Ok(ctx.reply(304).header(LAST_MODIFIED_VERSION, lib.version));
        }
    }
    let since = ctx.param_number("since")?.map(|s| s as u64);
    let keys = ctx.param(&object_kind.key_param()).map(split_keys);
    let objects = lib.list(object_kind, since, keys.as_deref());
    let total = objects.len();
    let reply = ctx
        .reply(200)
        .header(LAST_MODIFIED_VERSION, lib.version)
        .header("Total-Results", total);

    match ctx.format() {
        "keys" => Ok(reply.text(render::keys_text(objects.iter().map(|o| o.key.as_str())))),
        "versions" => Ok(reply.json(&render::versions_json(objects.iter().copied()))),
        format @ ("json" | "atom") => {
            let start = ctx.param_number("start")?.unwrap_or(0);
            let limit = ctx.param_number("limit")?.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
            let page = &objects[start.min(total)..start.saturating_add(limit).min(total)];
            let reply = reply.header("Link", ctx.links(library, &segment, start, limit, total));
            if format == "json" {
                let items = page
                    .iter()
                    .map(|o| render::object_json(library, object_kind, o, &ctx.base))
                    .collect();
                Ok(reply.json(&Value::Array(items)))
            } else {
                let feed = render::atom_feed(library, object_kind, page, total, ctx.content(), ctx.api_version, &ctx.base)
                    .map_err(|e| ctx.error(500, e))?;
                Ok(reply.atom(feed))
            }
        }
        other => Err(ctx.error(400, format!("Invalid 'format' value '{other}'"))),
    }
}

fn list_tags(ctx: &RequestContext, library: LibraryId, lib: &LibraryData) -> Result<Reply, Reply> {
    let tags = lib.tags();
    let reply = ctx
        .reply(200)
        .header(LAST_MODIFIED_VERSION, lib.version)
        .header("Total-Results", tags.len());
    match ctx.format() {
        "json" => Ok(reply.json(&render::tags_json(library, &tags, &ctx.base))),
        "atom" => {
            let feed = render::tags_feed(library, &tags, ctx.api_version, &ctx.base).map_err(|e| ctx.error(500, e))?;
            Ok(reply.atom(feed))
        }
        other => Err(ctx.error(400, format!("Invalid 'format' value '{other}'"))),
    }
}

async fn write_objects(
    State(state): State<AppState>,
    Extension(kind): Extension<LibraryKind>,
    Path((id, segment)): Path<(u64, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    ctx.authorize(&state.config, true)?;
    let library = kind.library(id);
    let object_kind = object_kind(&ctx, &segment)?;
    let header_version = ctx.header_version(IF_UNMODIFIED_SINCE_VERSION)?;

    let payloads = match (ctx.api_version >= 3, parse_body(&ctx, &body)?) {
        (true, Value::Array(payloads)) => payloads,
        (true, _) => return Err(ctx.error(400, "Uploaded data must be a JSON array")),
        (false, Value::Object(mut wrapper)) => match wrapper.remove(object_kind.plural()) {
            Some(Value::Array(payloads)) => payloads,
            _ => {
                return Err(ctx.error(
                    400,
                    format!("Uploaded data must be a JSON object with a '{}' array", object_kind.plural()),
                ))
            }
        },
        (false, _) => return Err(ctx.error(400, "Uploaded data must be a JSON object")),
    };
    if payloads.len() > MAX_WRITE_OBJECTS {
        return Err(ctx.error(413, format!("Only {MAX_WRITE_OBJECTS} objects can be written per request")));
    }

    let mut store = state.db.write().await;
    let lib = store
        .library_mut(library)
        .ok_or_else(|| ctx.error(404, "Not found"))?;
    lib.check_library_version(header_version, false)
        .map_err(|r| ctx.reject(r))?;
    let outcomes = lib.write_objects(object_kind, payloads, header_version);

    let mut successful = Map::new();
    let mut success = Map::new();
    let mut unchanged = Map::new();
    let mut failed = Map::new();
    for (index, outcome) in outcomes.iter().enumerate() {
        let index = index.to_string();
        match outcome {
            WriteOutcome::Success(object) => {
                successful.insert(index.clone(), render::object_json(library, object_kind, object, &ctx.base));
                success.insert(index, Value::String(object.key.clone()));
            }
            WriteOutcome::Unchanged(key) => {
                unchanged.insert(index, Value::String(key.clone()));
            }
            WriteOutcome::Failed { key, code, message } => {
                failed.insert(index, json!({"key": key, "code": code, "message": message}));
            }
        }
    }
    tracing::debug!(
        library = %library.prefix(),
        written = success.len(),
        unchanged = unchanged.len(),
        failed = failed.len(),
        "batch write"
    );

    let changed = !success.is_empty();
    let mut result = Map::new();
    if ctx.api_version >= 3 {
        result.insert("successful".to_string(), Value::Object(successful));
    }
    result.insert("success".to_string(), Value::Object(success));
    result.insert("unchanged".to_string(), Value::Object(unchanged));
    result.insert("failed".to_string(), Value::Object(failed));

    let reply = ctx
        .reply(200)
        .header(LAST_MODIFIED_VERSION, lib.version)
        .json(&Value::Object(result));
    Ok(if changed { ctx.notify(reply, library, &segment) } else { reply })
}

async fn delete_objects(
    State(state): State<AppState>,
    Extension(kind): Extension<LibraryKind>,
    Path((id, segment)): Path<(u64, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    ctx.authorize(&state.config, true)?;
    let library = kind.library(id);
    let header_version = ctx.header_version(IF_UNMODIFIED_SINCE_VERSION)?;
    let mut store = state.db.write().await;
    let lib = store
        .library_mut(library)
        .ok_or_else(|| ctx.error(404, "Not found"))?;

    let deleted = if segment == "tags" {
        let names: Vec<String> = ctx
            .param("tag")
            .ok_or_else(|| ctx.error(400, "No tags specified"))?
            .split(" || ")
            .map(str::to_string)
            .collect();
        lib.delete_tags(&names, header_version)
    } else {
        let object_kind = object_kind(&ctx, &segment)?;
        let keys = ctx
            .param(&object_kind.key_param())
            .map(split_keys)
            .ok_or_else(|| ctx.error(400, format!("'{}' not provided", object_kind.key_param())))?;
        lib.delete_objects(object_kind, &keys, header_version)
    };
    let version = deleted.map_err(|r| ctx.reject(r))?;

    let reply = ctx.reply(204).header(LAST_MODIFIED_VERSION, version);
    Ok(ctx.notify(reply, library, &segment))
}

async fn get_object(
    State(state): State<AppState>,
    Extension(kind): Extension<LibraryKind>,
    Path((id, segment, key)): Path<(u64, String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    ctx.authorize(&state.config, false)?;
    let library = kind.library(id);
    let object_kind = object_kind(&ctx, &segment)?;
    let store = state.db.read().await;
    let object = store
        .library(library)
        .and_then(|lib| lib.get(object_kind, &key))
        .ok_or_else(|| ctx.error(404, "Not found"))?;

    if let Some(since) = ctx.header_version(IF_MODIFIED_SINCE_VERSION)? {
        if object.version <= since {
            return Ok(ctx.reply(304).header(LAST_MODIFIED_VERSION, object.version));
        }
    }
    let reply = ctx.reply(200).header(LAST_MODIFIED_VERSION, object.version);
    match ctx.format() {
        "json" => Ok(reply.json(&render::object_json(library, object_kind, object, &ctx.base))),
        "atom" => {
            let entry = render::atom_entry(library, object_kind, object, ctx.content(), &ctx.base)
                .map_err(|e| ctx.error(500, e))?;
            Ok(reply.atom(entry))
        }
        "keys" => Ok(reply.text(render::keys_text([object.key.as_str()]))),
        "versions" => Ok(reply.json(&render::versions_json([object]))),
        other => Err(ctx.error(400, format!("Invalid 'format' value '{other}'"))),
    }
}

async fn put_object(
    state: State<AppState>,
    kind: Extension<LibraryKind>,
    path: Path<(u64, String, String)>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
    body: String,
) -> Result<Reply, Reply> {
    update_object(state, kind, path, headers, query, body, UpdateMode::Replace).await
}

async fn patch_object(
    state: State<AppState>,
    kind: Extension<LibraryKind>,
    path: Path<(u64, String, String)>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
    body: String,
) -> Result<Reply, Reply> {
    update_object(state, kind, path, headers, query, body, UpdateMode::Merge).await
}

async fn update_object(
    State(state): State<AppState>,
    Extension(kind): Extension<LibraryKind>,
    Path((id, segment, key)): Path<(u64, String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: String,
    mode: UpdateMode,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    ctx.authorize(&state.config, true)?;
    let library = kind.library(id);
    let object_kind = object_kind(&ctx, &segment)?;
    let header_version = ctx.header_version(IF_UNMODIFIED_SINCE_VERSION)?;
    let body = parse_body(&ctx, &body)?;

    let mut store = state.db.write().await;
    let lib = store
        .library_mut(library)
        .ok_or_else(|| ctx.error(404, "Not found"))?;
    let changed = lib
        .update_object(object_kind, &key, body, header_version, mode)
        .map_err(|r| ctx.reject(r))?;
    let version = lib.get(object_kind, &key).map_or(lib.version, |o| o.version);
    let reply = ctx.reply(204).header(LAST_MODIFIED_VERSION, version);
    Ok(match changed {
        Some(_) => ctx.notify(reply, library, &segment),
        None => reply,
    })
}

async fn delete_object(
    State(state): State<AppState>,
    Extension(kind): Extension<LibraryKind>,
    Path((id, segment, key)): Path<(u64, String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    ctx.authorize(&state.config, true)?;
    let library = kind.library(id);
    let object_kind = object_kind(&ctx, &segment)?;
    let header_version = ctx.header_version(IF_UNMODIFIED_SINCE_VERSION)?;
    let mut store = state.db.write().await;
    let lib = store
        .library_mut(library)
        .ok_or_else(|| ctx.error(404, "Not found"))?;
    let version = lib
        .delete_object(object_kind, &key, header_version)
        .map_err(|r| ctx.reject(r))?;
    let reply = ctx.reply(204).header(LAST_MODIFIED_VERSION, version);
    Ok(ctx.notify(reply, library, &segment))
}

/// Attachment downloads are served elsewhere; this only redirects.
async fn file_redirect(
    State(state): State<AppState>,
    Extension(kind): Extension<LibraryKind>,
    Path((id, segment, key)): Path<(u64, String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, params);
    ctx.authorize(&state.config, false)?;
    if segment != "items" {
        return Err(ctx.error(404, "Not found"));
    }
    let library = kind.library(id);
    let store = state.db.read().await;
    let item = store
        .library(library)
        .and_then(|lib| lib.get(ObjectKind::Item, &key))
        .ok_or_else(|| ctx.error(404, "Not found"))?;
    if item.data.get("itemType").and_then(Value::as_str) != Some("attachment") {
        return Err(ctx.error(400, "Not a file attachment"));
    }
    let filename = item
        .data
        .get("filename")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ctx.error(404, "File not found"))?;
    let location = format!("{}/{}/{key}/{filename}", state.config.file_base_url, library.prefix());
    Ok(ctx.reply(302).header("Location", location))
}

async fn create_group(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, HashMap::new());
    require_admin(&ctx, &state.config)?;
    let new_group = groups::parse_new_group(&body).map_err(|e| ctx.error(400, e))?;
    let group = state
        .db
        .write()
        .await
        .create_group(new_group.owner, new_group.name, new_group.attributes);
    tracing::info!(group = group.id, name = %group.name, "group created");
    let entry = render::group_entry(&group).map_err(|e| ctx.error(500, e))?;
    Ok(ctx
        .reply(201)
        .header("Location", format!("{}/groups/{}", ctx.base, group.id))
        .atom(entry))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<Reply, Reply> {
    let ctx = RequestContext::new(&state.config, headers, HashMap::new());
    require_admin(&ctx, &state.config)?;
    if !state.db.write().await.delete_group(id) {
        return Err(ctx.error(404, "Not found"));
    }
    Ok(ctx.reply(204))
}

fn require_admin(ctx: &RequestContext, config: &MockConfig) -> Result<(), Reply> {
    if groups::basic_auth_matches(ctx.header("Authorization"), &config.admin_username, &config.admin_password) {
        Ok(())
    } else {
        Err(ctx.error(401, "Invalid login"))
    }
}
