//! HTTP request and response handles described as plain data.
//!
//! # Design
//! The request builder produces an `HttpRequest` and a `Transport` turns it
//! into an `HttpResponse`. Neither type performs I/O, so builders and
//! normalizers can be tested with canned values. All fields are owned so a
//! response can outlive the transport that produced it.

use std::fmt;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list with case-insensitive lookup.
///
/// A name may appear more than once (`append`), which response headers need
/// for repeated notification lines. `set` replaces every existing value for
/// the name, so on requests the last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Replace all values of `name` with `value`, keeping the position of the
    /// first occurrence.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(first) => {
                self.0[first] = (name.to_string(), value);
                let mut idx = 0;
                self.0.retain(|(n, _)| {
                    let keep = idx <= first || !n.eq_ignore_ascii_case(name);
                    idx += 1;
                    keep
                });
            }
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_string(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

/// A fully resolved request. Immutable once built; build a new one per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

/// A response as returned by a `Transport`.
///
/// `method` and `url` echo the request that produced it so errors and
/// assertion failures can name the call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub method: HttpMethod,
    pub url: String,
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Headers, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: String::new(),
            status,
            headers,
            body: body.into(),
        }
    }

    /// Attach the originating request line.
    pub fn for_request(mut self, method: HttpMethod, url: &str) -> Self {
        self.method = method;
        self.url = url.to_string();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers.get_all(name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers: Headers = [("Last-Modified-Version", "12")].into_iter().collect();
        assert_eq!(headers.get("last-modified-version"), Some("12"));
        assert_eq!(headers.get("LAST-MODIFIED-VERSION"), Some("12"));
        assert!(headers.get("ETag").is_none());
    }

    #[test]
    fn set_replaces_every_existing_value() {
        let mut headers = Headers::new();
        headers.append("Accept", "a");
        headers.append("X-Other", "o");
        headers.append("accept", "b");
        headers.set("ACCEPT", "c");
        assert_eq!(headers.get_all("accept"), vec!["c"]);
        assert_eq!(headers.len(), 2);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["ACCEPT", "X-Other"]);
    }

    #[test]
    fn append_keeps_repeated_values_in_order() {
        let mut headers = Headers::new();
        headers.append("Zotero-Debug-Notifications", "one");
        headers.append("zotero-debug-notifications", "two");
        assert_eq!(headers.get("Zotero-Debug-Notifications"), Some("one"));
        assert_eq!(headers.get_all("Zotero-Debug-Notifications"), vec!["one", "two"]);
    }

    #[test]
    fn status_classes() {
        let ok = HttpResponse::new(204, Headers::new(), "");
        assert!(ok.is_success());
        let redirect = HttpResponse::new(302, Headers::new(), "");
        assert!(redirect.is_redirect());
        assert!(!redirect.is_success());
    }
}
