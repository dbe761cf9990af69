//! Executes `HttpRequest` values.
//!
//! # Design
//! `Transport` is the only place that touches the network. `UreqTransport`
//! disables both status-as-error and redirect following, so every 3xx, 4xx
//! and 5xx comes back as an `HttpResponse`. Only connection-level failures
//! become `ApiError::Transport`. Nothing is retried: callers assert on
//! first-attempt status codes. Verbose request echo lives in `ApiClient`,
//! so it follows the current config.

use std::time::Duration;

use crate::error::{ApiError, Result};
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};

pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Blocking transport backed by a `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }

    fn call(&self, request: &HttpRequest) -> std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        let url = request.url.as_str();
        let h = &request.headers;
        match (request.method, request.body.as_deref()) {
            (HttpMethod::Get, _) => with_headers(h, self.agent.get(url)).call(),
            (HttpMethod::Head, _) => with_headers(h, self.agent.head(url)).call(),
            (HttpMethod::Delete, _) => with_headers(h, self.agent.delete(url)).call(),
            (HttpMethod::Post, Some(body)) => with_headers(h, self.agent.post(url)).send(body),
            (HttpMethod::Post, None) => with_headers(h, self.agent.post(url)).send_empty(),
            (HttpMethod::Put, Some(body)) => with_headers(h, self.agent.put(url)).send(body),
            (HttpMethod::Put, None) => with_headers(h, self.agent.put(url)).send_empty(),
            (HttpMethod::Patch, Some(body)) => with_headers(h, self.agent.patch(url)).send(body),
            (HttpMethod::Patch, None) => with_headers(h, self.agent.patch(url)).send_empty(),
        }
    }
}

/// Header values that are not visible ASCII are kept, decoded lossily.
fn header_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

fn with_headers<B>(headers: &Headers, builder: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
    headers.iter().fold(builder, |builder, (name, value)| builder.header(name, value))
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        tracing::debug!(method = %request.method, url = %request.url, "sending request");

        let transport_error = |e: ureq::Error| ApiError::Transport {
            method: request.method.as_str().to_string(),
            url: request.url.clone(),
            message: e.to_string(),
        };

        let mut response = self.call(request).map_err(transport_error)?;
        let status = response.status().as_u16();

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), header_text(value.as_bytes()));
        }

        let body = if request.method == HttpMethod::Head {
            String::new()
        } else {
            response.body_mut().read_to_string().map_err(transport_error)?
        };

        tracing::debug!(status, bytes = body.len(), url = %request.url, "received response");

        Ok(HttpResponse {
            method: request.method,
            url: request.url.clone(),
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ascii_header_values_are_kept() {
        assert_eq!(header_text(b"W/\"abc\""), "W/\"abc\"");
        assert_eq!(header_text("caf\u{e9}".as_bytes()), "caf\u{e9}");
        assert_eq!(header_text(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn connection_refused_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/x", listener.local_addr().unwrap());
        drop(listener);

        let request = HttpRequest {
            method: HttpMethod::Get,
            url: url.clone(),
            headers: Headers::new(),
            body: None,
        };
        match UreqTransport::new(Duration::from_secs(5)).execute(&request) {
            Err(ApiError::Transport { method, url: failed, .. }) => {
                assert_eq!(method, "GET");
                assert_eq!(failed, url);
            }
            other => panic!("expected a transport error, got {other:?}"),
        }
    }
}
