//! Request builder.
//!
//! # Design
//! A `RequestBuilder` borrows the active `ClientConfig` and produces one
//! immutable `HttpRequest`. Headers are layered in a fixed order:
//!
//! 1. protocol and schema version headers from the config,
//! 2. authentication,
//! 3. headers set on the builder, including raw `"Name: value"` lines,
//!
//! so the caller always wins on conflicts. Exactly one auth mechanism is
//! applied. When none is chosen explicitly, the config's API key is applied
//! in the dialect's default position.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use url::form_urlencoded;

use crate::config::{AuthMode, ClientConfig, Format};
use crate::error::Result;
use crate::http::{Headers, HttpMethod, HttpRequest};

pub const API_VERSION_HEADER: &str = "Zotero-API-Version";
pub const SCHEMA_VERSION_HEADER: &str = "Zotero-Schema-Version";
pub const API_KEY_HEADER: &str = "Zotero-API-Key";
pub const IF_UNMODIFIED_SINCE_VERSION: &str = "If-Unmodified-Since-Version";
pub const IF_MODIFIED_SINCE_VERSION: &str = "If-Modified-Since-Version";

/// Authentication applied to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// Send no credentials, even if the config has a key.
    None,
    Basic { username: String, password: String },
    Bearer(String),
    ApiKeyHeader(String),
    QueryKey(String),
}

impl Auth {
    fn from_mode(mode: AuthMode, key: &str) -> Self {
        match mode {
            AuthMode::Header => Auth::ApiKeyHeader(key.to_string()),
            AuthMode::Bearer => Auth::Bearer(key.to_string()),
            AuthMode::Query => Auth::QueryKey(key.to_string()),
        }
    }
}

/// Split a `"Name: value"` line. Lines without a colon, or with an empty
/// name, yield `None` and are dropped by the builder.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[derive(Debug, Clone)]
pub struct RequestBuilder<'a> {
    config: &'a ClientConfig,
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    headers: Headers,
    body: Option<String>,
    auth: Option<Auth>,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(config: &'a ClientConfig, method: HttpMethod, path: &str) -> Self {
        Self {
            config,
            method,
            path: path.to_string(),
            query: Vec::new(),
            headers: Headers::new(),
            body: None,
            auth: None,
        }
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn format(self, format: Format) -> Self {
        self.query("format", format.as_str())
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Overlay a raw `"Name: value"` header. Malformed lines are skipped.
    pub fn header_line(mut self, line: &str) -> Self {
        match parse_header_line(line) {
            Some((name, value)) => self.headers.set(&name, value),
            None => tracing::debug!(line, "skipping header line without a name/value separator"),
        }
        self
    }

    pub fn header_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        lines.into_iter().fold(self, |builder, line| builder.header_line(line.as_ref()))
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and mark it `application/json`.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_string(value)?;
        Ok(self.header("Content-Type", "application/json").body(body))
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn if_unmodified_since_version(self, version: u64) -> Self {
        self.header(IF_UNMODIFIED_SINCE_VERSION, version.to_string())
    }

    pub fn if_modified_since_version(self, version: u64) -> Self {
        self.header(IF_MODIFIED_SINCE_VERSION, version.to_string())
    }

    pub fn if_match(self, etag: &str) -> Self {
        self.header("If-Match", etag)
    }

    pub fn if_none_match(self, etag: &str) -> Self {
        self.header("If-None-Match", etag)
    }

    pub fn build(self) -> HttpRequest {
        let mut headers = Headers::new();
        if let Some(version) = self.config.api_version {
            headers.set(API_VERSION_HEADER, version.to_string());
        }
        if let Some(schema) = &self.config.schema_version {
            headers.set(SCHEMA_VERSION_HEADER, schema.clone());
        }

        let auth = self.auth.clone().or_else(|| {
            self.config
                .api_key
                .as_deref()
                .map(|key| Auth::from_mode(self.config.dialect.default_auth, key))
        });

        let mut query = self.query;
        match auth {
            Some(Auth::Basic { username, password }) => {
                let token = STANDARD.encode(format!("{username}:{password}"));
                headers.set("Authorization", format!("Basic {token}"));
            }
            Some(Auth::Bearer(key)) => headers.set("Authorization", format!("Bearer {key}")),
            Some(Auth::ApiKeyHeader(key)) => headers.set(API_KEY_HEADER, key),
            Some(Auth::QueryKey(key)) => query.push(("key".to_string(), key)),
            Some(Auth::None) | None => {}
        }

        for (name, value) in self.headers.iter() {
            headers.set(name, value);
        }

        HttpRequest {
            method: self.method,
            url: resolve_url(&self.config.base_url, &self.path, &query),
            headers,
            body: self.body,
        }
    }
}

/// Join `base` and `path`, then append `query` after any query string the
/// path already carries. Absolute paths bypass the base.
fn resolve_url(base: &str, path: &str, query: &[(String, String)]) -> String {
    let mut url = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    };
    if !query.is_empty() {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&encoded);
    }
    url
}
