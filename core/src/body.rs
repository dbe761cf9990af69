//! Response normalizer: one parsed representation per response.
//!
//! # Design
//! The body kind is decided before parsing, from the caller's explicit
//! `format=` choice or the declared `Content-Type`. The body is never
//! sniffed. Exactly one representation is materialized. A parse failure is
//! always an `ApiError::MalformedBody` naming the kind and the URL. Nothing
//! is silently defaulted, so a JSON `null` is an error, not a value.

use std::fmt;

use serde_json::Value;

use crate::atom;
use crate::config::Format;
use crate::error::{ApiError, Result};
use crate::http::HttpResponse;
use crate::xml::XmlDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Atom,
    Keys,
    Versions,
}

impl BodyKind {
    /// Kind for a declared `Content-Type`; parameters such as `charset` are
    /// ignored. Version maps share `application/json` with plain JSON, so
    /// they are only reachable through `from_format`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Some(BodyKind::Json),
            "application/atom+xml" | "application/xml" | "text/xml" => Some(BodyKind::Atom),
            "text/plain" => Some(BodyKind::Keys),
            _ => None,
        }
    }

    /// Kind for an explicit `format=` request. `bibtex` has no parsed form.
    pub fn from_format(format: Format) -> Option<Self> {
        match format {
            Format::Json => Some(BodyKind::Json),
            Format::Atom => Some(BodyKind::Atom),
            Format::Keys => Some(BodyKind::Keys),
            Format::Versions => Some(BodyKind::Versions),
            Format::Bibtex => None,
        }
    }
}

impl fmt::Display for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BodyKind::Json => "json",
            BodyKind::Atom => "atom",
            BodyKind::Keys => "keys",
            BodyKind::Versions => "versions",
        };
        f.write_str(name)
    }
}

/// Object key to version, in the order the server sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionMap(Vec<(String, u64)>);

impl VersionMap {
    pub fn get(&self, key: &str) -> Option<u64> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, u64)> for VersionMap {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Json(Value),
    Xml(XmlDocument),
    Keys(Vec<String>),
    Versions(VersionMap),
}

impl ParsedBody {
    pub fn kind(&self) -> BodyKind {
        match self {
            ParsedBody::Json(_) => BodyKind::Json,
            ParsedBody::Xml(_) => BodyKind::Atom,
            ParsedBody::Keys(_) => BodyKind::Keys,
            ParsedBody::Versions(_) => BodyKind::Versions,
        }
    }

    /// Number of results: array length, feed entries, keys or versions.
    pub fn result_count(&self) -> usize {
        match self {
            ParsedBody::Json(Value::Array(items)) => items.len(),
            ParsedBody::Json(Value::Object(map)) => map.len(),
            ParsedBody::Json(_) => 1,
            ParsedBody::Xml(doc) => doc
                .root()
                .child_elements()
                .filter(|e| e.is(Some(atom::ATOM_NS), "entry"))
                .count(),
            ParsedBody::Keys(keys) => keys.len(),
            ParsedBody::Versions(map) => map.len(),
        }
    }
}

/// Parse `response` as `kind`, or as its declared content type when `kind`
/// is `None`.
pub fn parse(response: &HttpResponse, kind: Option<BodyKind>) -> Result<ParsedBody> {
    let kind = match kind {
        Some(kind) => kind,
        None => {
            let declared = response.header("Content-Type").unwrap_or("");
            BodyKind::from_content_type(declared).ok_or_else(|| {
                ApiError::malformed(response, "unknown", format!("unsupported content type {declared:?}"))
            })?
        }
    };
    match kind {
        BodyKind::Json => parse_json(response).map(ParsedBody::Json),
        BodyKind::Atom => parse_xml(response).map(ParsedBody::Xml),
        BodyKind::Keys => Ok(ParsedBody::Keys(parse_keys(&response.body))),
        BodyKind::Versions => parse_versions(response).map(ParsedBody::Versions),
    }
}

pub fn parse_json(response: &HttpResponse) -> Result<Value> {
    let value: Value = serde_json::from_str(&response.body)
        .map_err(|e| ApiError::malformed(response, BodyKind::Json, e.to_string()))?;
    if value.is_null() {
        return Err(ApiError::malformed(response, BodyKind::Json, "body decoded to null"));
    }
    Ok(value)
}

pub fn parse_xml(response: &HttpResponse) -> Result<XmlDocument> {
    XmlDocument::parse(&response.body).map_err(|e| ApiError::malformed(response, BodyKind::Atom, e.to_string()))
}

/// Newline-separated keys. Trailing blank lines are dropped, so an empty
/// body is an empty list.
pub fn parse_keys(body: &str) -> Vec<String> {
    let mut keys: Vec<String> = body.lines().map(|line| line.trim_end_matches('\r').to_string()).collect();
    while keys.last().is_some_and(|k| k.trim().is_empty()) {
        keys.pop();
    }
    keys
}

pub fn parse_versions(response: &HttpResponse) -> Result<VersionMap> {
    let value = parse_json(response)?;
    let Value::Object(map) = value else {
        return Err(ApiError::malformed(response, BodyKind::Versions, "expected a JSON object"));
    };
    map.into_iter()
        .map(|(key, value)| {
            coerce_version(&value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| {
                    ApiError::malformed(response, BodyKind::Versions, format!("version for {key} is not an integer: {value}"))
                })
        })
        .collect()
}

/// Accepts JSON integers and integer strings.
pub fn coerce_version(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
