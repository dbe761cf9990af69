//! Client configuration and protocol dialects.
//!
//! # Design
//! The two protocol generations differ only in envelope shape, default auth
//! mechanism and default response format. `Dialect` captures exactly those
//! three knobs; everything else is shared. `ClientConfig` holds what used to
//! be run-wide settings (API key, protocol version, schema version,
//! verbosity). Mutate it only between calls.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// Response representation requested via `format=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Atom,
    Keys,
    Versions,
    Bibtex,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Atom => "atom",
            Format::Keys => "keys",
            Format::Versions => "versions",
            Format::Bibtex => "bibtex",
        }
    }
}

/// How write payloads are wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStyle {
    /// `{"items": [ ... ]}`
    Wrapped,
    /// `[ ... ]`
    BareArray,
}

/// Where the API key goes when the caller does not pick explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// `Zotero-API-Key: <key>`
    Header,
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `?key=<key>`
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    pub default_format: Format,
    pub envelope: EnvelopeStyle,
    pub default_auth: AuthMode,
}

impl Dialect {
    pub fn v2() -> Self {
        Self {
            default_format: Format::Atom,
            envelope: EnvelopeStyle::Wrapped,
            default_auth: AuthMode::Query,
        }
    }

    pub fn v3() -> Self {
        Self {
            default_format: Format::Json,
            envelope: EnvelopeStyle::BareArray,
            default_auth: AuthMode::Header,
        }
    }

    pub fn for_api_version(version: u32) -> Self {
        if version >= 3 {
            Self::v3()
        } else {
            Self::v2()
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::v3()
    }
}

/// Library that object paths are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "id")]
pub enum Library {
    User(u64),
    Group(u64),
}

impl Library {
    /// Path prefix, e.g. `users/1`.
    pub fn prefix(&self) -> String {
        match self {
            Library::User(id) => format!("users/{id}"),
            Library::Group(id) => format!("groups/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix prepended to every request path.
    pub base_url: String,
    /// Sent as `Zotero-API-Version` when set.
    pub api_version: Option<u32>,
    /// Sent as `Zotero-Schema-Version` when set.
    pub schema_version: Option<String>,
    pub api_key: Option<String>,
    /// Basic credentials for admin calls (group management).
    pub credentials: Option<Credentials>,
    pub library: Library,
    pub dialect: Dialect,
    /// Echo each request at `info` level.
    pub verbose: bool,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            api_version: Some(3),
            schema_version: None,
            api_key: None,
            credentials: None,
            library: Library::User(1),
            dialect: Dialect::v3(),
            verbose: false,
            timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    /// Build a config from `ZAPI_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("ZAPI_BASE_URL") {
            config.base_url = url;
        }
        if let Some(version) = lookup("ZAPI_API_VERSION") {
            let version = parse_number::<u32>("ZAPI_API_VERSION", &version)?;
            config = config.with_api_version(version);
        }
        config.schema_version = lookup("ZAPI_SCHEMA_VERSION").or(config.schema_version);
        config.api_key = lookup("ZAPI_API_KEY").or(config.api_key);
        if let (Some(username), Some(password)) = (lookup("ZAPI_USERNAME"), lookup("ZAPI_PASSWORD")) {
            config.credentials = Some(Credentials { username, password });
        }
        if let Some(id) = lookup("ZAPI_USER_ID") {
            config.library = Library::User(parse_number("ZAPI_USER_ID", &id)?);
        }
        if let Some(verbose) = lookup("ZAPI_VERBOSE") {
            config.verbose = matches!(verbose.as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    /// Switch protocol generation; the dialect follows the version.
    pub fn with_api_version(mut self, version: u32) -> Self {
        self.api_version = Some(version);
        self.dialect = Dialect::for_api_version(version);
        self
    }

    pub fn without_api_version(mut self) -> Self {
        self.api_version = None;
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = Some(version.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn with_library(mut self, library: Library) -> Self {
        self.library = library;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Label used in dialect errors.
    pub fn api_version_label(&self) -> String {
        self.api_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unset".to_string())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::Config(format!("{name} must be a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn dialect_follows_api_version() {
        assert_eq!(Dialect::for_api_version(1), Dialect::v2());
        assert_eq!(Dialect::for_api_version(2), Dialect::v2());
        assert_eq!(Dialect::for_api_version(3), Dialect::v3());
        let config = ClientConfig::default().with_api_version(2);
        assert_eq!(config.dialect.envelope, EnvelopeStyle::Wrapped);
        assert_eq!(config.dialect.default_auth, AuthMode::Query);
    }

    #[test]
    fn library_prefix() {
        assert_eq!(Library::User(7).prefix(), "users/7");
        assert_eq!(Library::Group(12).prefix(), "groups/12");
    }

    #[test]
    fn from_lookup_reads_every_variable() {
        let vars: HashMap<&str, &str> = [
            ("ZAPI_BASE_URL", "http://api.test/"),
            ("ZAPI_API_VERSION", "2"),
            ("ZAPI_SCHEMA_VERSION", "31"),
            ("ZAPI_API_KEY", "secret"),
            ("ZAPI_USERNAME", "root"),
            ("ZAPI_PASSWORD", "pw"),
            ("ZAPI_USER_ID", "42"),
            ("ZAPI_VERBOSE", "1"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url, "http://api.test/");
        assert_eq!(config.api_version, Some(2));
        assert_eq!(config.dialect, Dialect::v2());
        assert_eq!(config.schema_version.as_deref(), Some("31"));
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.credentials.unwrap().username, "root");
        assert_eq!(config.library, Library::User(42));
        assert!(config.verbose);
    }

    #[test]
    fn from_lookup_rejects_non_numeric_version() {
        let err = ClientConfig::from_lookup(|k| (k == "ZAPI_API_VERSION").then(|| "three".to_string()))
            .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url":"http://h/","library":{"type":"group","id":5}}"#).unwrap();
        assert_eq!(config.library, Library::Group(5));
        assert_eq!(config.api_version, Some(3));
        assert_eq!(config.dialect, Dialect::v3());
    }
}
