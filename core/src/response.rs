//! Uniform accessors over `HttpResponse`.
//!
//! Both protocol generations report optimistic-concurrency metadata in
//! response headers. These accessors read it the same way regardless of
//! dialect, and hand off body parsing to the normalizer in `body`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::body::{self, BodyKind, ParsedBody, VersionMap};
use crate::error::{ApiError, Result};
use crate::http::HttpResponse;
use crate::xml::XmlDocument;

pub const LAST_MODIFIED_VERSION: &str = "Last-Modified-Version";
pub const TOTAL_RESULTS: &str = "Total-Results";
pub const NOTIFICATIONS_HEADER: &str = "Zotero-Debug-Notifications";

/// RFC 5988 pagination links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Links {
    pub first: Option<String>,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub last: Option<String>,
    pub alternate: Option<String>,
}

impl Links {
    pub fn parse(header: &str) -> Self {
        let mut links = Links::default();
        let mut rest = header;
        while let Some(open) = rest.find('<') {
            let Some(close) = rest[open..].find('>').map(|i| open + i) else {
                break;
            };
            let target = rest[open + 1..close].to_string();
            let params_end = rest[close..].find('<').map_or(rest.len(), |i| close + i);
            let params = &rest[close + 1..params_end];
            for rel in rel_values(params) {
                let slot = match rel {
                    "first" => &mut links.first,
                    "prev" | "previous" => &mut links.prev,
                    "next" => &mut links.next,
                    "last" => &mut links.last,
                    "alternate" => &mut links.alternate,
                    _ => continue,
                };
                *slot = Some(target.clone());
            }
            rest = &rest[params_end..];
        }
        links
    }
}

fn rel_values(params: &str) -> Vec<&str> {
    params
        .split(';')
        .filter_map(|p| {
            let (name, value) = p.split_once('=')?;
            (name.trim().eq_ignore_ascii_case("rel")).then(|| value.trim().trim_end_matches(',').trim().trim_matches('"'))
        })
        .flat_map(|v| v.split_whitespace())
        .collect()
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn last_modified_version(&self) -> Option<u64> {
        self.header(LAST_MODIFIED_VERSION).and_then(|v| v.trim().parse().ok())
    }

    pub fn api_version(&self) -> Option<u32> {
        self.header(crate::request::API_VERSION_HEADER)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn total_results(&self) -> Option<u64> {
        self.header(TOTAL_RESULTS).and_then(|v| v.trim().parse().ok())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("ETag")
    }

    pub fn location(&self) -> Option<&str> {
        self.header("Location")
    }

    pub fn links(&self) -> Links {
        self.header_all("Link")
            .into_iter()
            .map(Links::parse)
            .fold(Links::default(), |acc, l| Links {
                first: acc.first.or(l.first),
                prev: acc.prev.or(l.prev),
                next: acc.next.or(l.next),
                last: acc.last.or(l.last),
                alternate: acc.alternate.or(l.alternate),
            })
    }

    /// Notifications from every notification header line. Each line is either
    /// a base64-encoded JSON array or a raw JSON object/array.
    pub fn notifications(&self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for line in self.header_all(NOTIFICATIONS_HEADER) {
            let decoded = STANDARD
                .decode(line.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            let text = decoded.as_deref().unwrap_or(line);
            let value: Value = serde_json::from_str(text).map_err(|e| {
                ApiError::malformed(self, "notification", format!("{NOTIFICATIONS_HEADER}: {e}"))
            })?;
            match value {
                Value::Array(items) => out.extend(items),
                Value::Object(_) => out.push(value),
                other => {
                    return Err(ApiError::malformed(
                        self,
                        "notification",
                        format!("expected an object or array, got {other}"),
                    ))
                }
            }
        }
        Ok(out)
    }

    pub fn parse(&self, kind: Option<BodyKind>) -> Result<ParsedBody> {
        body::parse(self, kind)
    }

    pub fn json(&self) -> Result<Value> {
        body::parse_json(self)
    }

    pub fn xml(&self) -> Result<XmlDocument> {
        body::parse_xml(self)
    }

    pub fn keys(&self) -> Vec<String> {
        body::parse_keys(&self.body)
    }

    pub fn versions(&self) -> Result<VersionMap> {
        body::parse_versions(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn with_headers(pairs: &[(&str, &str)]) -> HttpResponse {
        HttpResponse::new(200, pairs.iter().copied().collect::<Headers>(), "")
    }

    #[test]
    fn version_headers() {
        let resp = with_headers(&[
            ("Last-Modified-Version", "42"),
            ("Zotero-API-Version", "3"),
            ("Total-Results", "7"),
            ("ETag", "\"abc\""),
        ]);
        assert_eq!(resp.last_modified_version(), Some(42));
        assert_eq!(resp.api_version(), Some(3));
        assert_eq!(resp.total_results(), Some(7));
        assert_eq!(resp.etag(), Some("\"abc\""));
        assert!(resp.location().is_none());
    }

    #[test]
    fn link_header_is_parsed() {
        let resp = with_headers(&[(
            "Link",
            r#"<http://h/users/1/items?limit=2&start=2>; rel="next", <http://h/users/1/items?limit=2&start=8>; rel="last", <http://zotero.org/users/1/items>; rel="alternate""#,
        )]);
        let links = resp.links();
        assert_eq!(links.next.as_deref(), Some("http://h/users/1/items?limit=2&start=2"));
        assert_eq!(links.last.as_deref(), Some("http://h/users/1/items?limit=2&start=8"));
        assert_eq!(links.alternate.as_deref(), Some("http://zotero.org/users/1/items"));
        assert!(links.first.is_none());
        assert!(links.prev.is_none());
    }

    #[test]
    fn repeated_link_headers_are_merged() {
        let resp = with_headers(&[("Link", "<http://a>; rel=first"), ("Link", "<http://b>; rel=prev")]);
        let links = resp.links();
        assert_eq!(links.first.as_deref(), Some("http://a"));
        assert_eq!(links.prev.as_deref(), Some("http://b"));
    }

    #[test]
    fn base64_notification_array() {
        let encoded = STANDARD.encode(r#"[{"event":"topicUpdated"},{"event":"topicAdded"}]"#);
        let resp = with_headers(&[("Zotero-Debug-Notifications", encoded.as_str())]);
        let notes = resp.notifications().unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1]["event"], "topicAdded");
    }

    #[test]
    fn repeated_raw_json_notifications() {
        let resp = with_headers(&[
            ("Zotero-Debug-Notifications", r#"{"event":"topicUpdated"}"#),
            ("zotero-debug-notifications", r#"{"event":"topicRemoved"}"#),
        ]);
        let notes = resp.notifications().unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0]["event"], "topicUpdated");
    }

    #[test]
    fn no_notification_header_means_none() {
        assert!(with_headers(&[]).notifications().unwrap().is_empty());
    }

    #[test]
    fn garbage_notification_is_malformed() {
        let resp = with_headers(&[("Zotero-Debug-Notifications", "not json")]);
        assert!(matches!(resp.notifications(), Err(ApiError::MalformedBody { .. })));
    }
}
