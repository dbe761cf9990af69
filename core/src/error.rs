//! Error types for the API client.
//!
//! # Design
//! HTTP 4xx/5xx responses are not errors: they come back as `HttpResponse`
//! values for the caller to inspect. `ApiError` covers only the failures a
//! test cannot assert on directly: the network going away, a body that does
//! not parse as the kind the caller asked for, a helper seeing a status
//! outside its success set, or a dialect assumption not holding. Variants
//! raised from a response carry the method, URL, status and a short body
//! snippet so a failing test can be diagnosed without re-running it.

use std::fmt;

use crate::http::HttpResponse;

/// Maximum number of body characters copied into an error.
pub const SNIPPET_LEN: usize = 200;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by the client, normalizer and object helpers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response (connect, DNS, I/O).
    #[error("transport failure on {method} {url}: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
    },

    /// The body did not parse as the requested kind.
    #[error("malformed {kind} body from {url} (HTTP {status}): {reason}; body: {snippet:?}")]
    MalformedBody {
        kind: String,
        url: String,
        status: u16,
        reason: String,
        snippet: String,
    },

    /// A helper saw a status outside the documented success set.
    #[error("unexpected HTTP {status} from {method} {url} (expected one of {expected:?}); body: {snippet:?}")]
    UnexpectedStatus {
        method: String,
        url: String,
        status: u16,
        expected: Vec<u16>,
        snippet: String,
    },

    /// A dialect-specific shape assumption did not hold for the configured
    /// protocol version.
    #[error("dialect mismatch (API version {api_version}): {message}")]
    DialectMismatch { api_version: String, message: String },

    /// One layer of the `atom -> data -> content -> json` chain failed.
    #[error("could not decode {layer} layer for {url}: {reason}")]
    Decode {
        layer: DecodeLayer,
        url: String,
        reason: String,
    },

    /// The XPath expression uses unsupported syntax or an unbound prefix.
    #[error("invalid query {expression:?}: {reason}")]
    InvalidQuery { expression: String, reason: String },

    /// A request payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An XML request payload could not be written.
    #[error("XML serialization failed: {0}")]
    Xml(#[from] crate::xml::XmlError),

    /// Configuration could not be assembled (bad environment value).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A batch write had failures and the caller asked for all-succeeded
    /// semantics.
    #[error("{failed} of {total} objects failed to write: {summary}")]
    PartialFailure {
        failed: usize,
        total: usize,
        summary: String,
    },
}

/// The layers of a created object's Atom envelope, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeLayer {
    Fetch,
    Atom,
    Data,
    Content,
    Json,
}

impl fmt::Display for DecodeLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeLayer::Fetch => "fetch",
            DecodeLayer::Atom => "atom",
            DecodeLayer::Data => "data",
            DecodeLayer::Content => "content",
            DecodeLayer::Json => "json",
        };
        f.write_str(name)
    }
}

impl ApiError {
    pub fn unexpected_status(response: &HttpResponse, expected: &[u16]) -> Self {
        ApiError::UnexpectedStatus {
            method: response.method.as_str().to_string(),
            url: response.url.clone(),
            status: response.status,
            expected: expected.to_vec(),
            snippet: snippet(&response.body),
        }
    }

    pub fn malformed(response: &HttpResponse, kind: impl fmt::Display, reason: impl Into<String>) -> Self {
        ApiError::MalformedBody {
            kind: kind.to_string(),
            url: response.url.clone(),
            status: response.status,
            reason: reason.into(),
            snippet: snippet(&response.body),
        }
    }

    pub fn decode(layer: DecodeLayer, url: &str, reason: impl Into<String>) -> Self {
        ApiError::Decode {
            layer,
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_query(expression: &str, reason: impl Into<String>) -> Self {
        ApiError::InvalidQuery {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// The status carried by response-derived variants.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::MalformedBody { status, .. } | ApiError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// First `SNIPPET_LEN` characters of `body`, cut on a char boundary.
pub fn snippet(body: &str) -> String {
    match body.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_keeps_short_bodies() {
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let body = "é".repeat(SNIPPET_LEN + 10);
        let s = snippet(&body);
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), SNIPPET_LEN + 3);
    }

    #[test]
    fn decode_layer_names() {
        let err = ApiError::decode(DecodeLayer::Content, "http://h/items/ABCD2345", "empty");
        assert_eq!(
            err.to_string(),
            "could not decode content layer for http://h/items/ABCD2345: empty"
        );
    }
}
