//! The API client: one config, one transport, synchronous calls.
//!
//! # Design
//! `ApiClient` owns a `ClientConfig` and a boxed `Transport`. Every call is
//! build, then send, then return. Nothing is cached between calls. The
//! generic verbs return the raw `HttpResponse` whatever its status, because
//! assertion-level callers treat 4xx/5xx as data. The typed object helpers
//! in `objects` and `library` check their documented success statuses and
//! return `ApiError::UnexpectedStatus` otherwise.

use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::request::RequestBuilder;
use crate::transport::{Transport, UreqTransport};

pub struct ApiClient {
    config: ClientConfig,
    transport: Box<dyn Transport>,
}

impl ApiClient {
    /// Client using a `ureq` transport configured from `config`. The timeout
    /// is fixed here; later changes to `timeout_ms` need a new client.
    pub fn new(config: ClientConfig) -> Self {
        let transport = UreqTransport::new(Duration::from_millis(config.timeout_ms));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config,
            transport: Box::new(transport),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Adjust configuration between calls. Key, protocol version, library and
    /// `verbose` take effect on the next request.
    pub fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    pub fn request(&self, method: HttpMethod, path: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(&self.config, method, path)
    }

    pub fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if self.config.verbose {
            tracing::info!(method = %request.method, url = %request.url, "request");
            if let Some(body) = &request.body {
                tracing::info!(body = %body, "request body");
            }
        }
        let response = self.transport.execute(request)?;
        if self.config.verbose {
            tracing::info!(status = response.status, url = %response.url, "response");
        }
        Ok(response)
    }

    pub fn get(&self, path: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.send(&self.request(HttpMethod::Get, path).header_lines(headers).build())
    }

    pub fn head(&self, path: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.send(&self.request(HttpMethod::Head, path).header_lines(headers).build())
    }

    pub fn post(&self, path: &str, body: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.send_with_body(HttpMethod::Post, path, body, headers)
    }

    pub fn put(&self, path: &str, body: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.send_with_body(HttpMethod::Put, path, body, headers)
    }

    pub fn patch(&self, path: &str, body: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.send_with_body(HttpMethod::Patch, path, body, headers)
    }

    pub fn delete(&self, path: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.send(&self.request(HttpMethod::Delete, path).header_lines(headers).build())
    }

    /// Same as the verbs above, with the path under the configured library,
    /// e.g. `items` becomes `users/1/items`.
    pub fn user_get(&self, path: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.get(&self.library_path(path), headers)
    }

    pub fn user_post(&self, path: &str, body: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.post(&self.library_path(path), body, headers)
    }

    pub fn user_put(&self, path: &str, body: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.put(&self.library_path(path), body, headers)
    }

    pub fn user_patch(&self, path: &str, body: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.patch(&self.library_path(path), body, headers)
    }

    pub fn user_delete(&self, path: &str, headers: &[&str]) -> Result<HttpResponse> {
        self.delete(&self.library_path(path), headers)
    }

    fn send_with_body(&self, method: HttpMethod, path: &str, body: &str, headers: &[&str]) -> Result<HttpResponse> {
        let request = self
            .request(method, path)
            .header("Content-Type", "application/json")
            .body(body)
            .header_lines(headers)
            .build();
        self.send(&request)
    }

    pub fn library_path(&self, rest: &str) -> String {
        let prefix = self.config.library.prefix();
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            prefix
        } else {
            format!("{prefix}/{rest}")
        }
    }
}

/// Pass `response` through if its status is in `expected`.
pub(crate) fn expect_status(response: HttpResponse, expected: &[u16]) -> Result<HttpResponse> {
    if expected.contains(&response.status) {
        Ok(response)
    } else {
        Err(ApiError::unexpected_status(&response, expected))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned transport for unit tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::error::Result;
    use crate::http::{Headers, HttpRequest, HttpResponse};
    use crate::transport::Transport;

    /// Replays queued responses in order and records every request.
    #[derive(Default)]
    pub struct CannedTransport {
        responses: Mutex<VecDeque<(u16, Vec<(String, String)>, String)>>,
        pub requests: std::sync::Arc<Mutex<Vec<HttpRequest>>>,
    }

    impl CannedTransport {
        pub fn push(&self, status: u16, headers: &[(&str, &str)], body: &str) {
            let headers = headers.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect();
            self.responses
                .lock()
                .unwrap()
                .push_back((status, headers, body.to_string()));
        }
    }

    impl Transport for CannedTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let (status, headers, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no canned response left");
            Ok(HttpResponse::new(status, headers.into_iter().collect::<Headers>(), body)
                .for_request(request.method, &request.url))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::CannedTransport;
    use super::*;
    use crate::config::Library;

    #[test]
    fn library_path_joins_prefix() {
        let client = ApiClient::new(ClientConfig::default().with_library(Library::Group(9)));
        assert_eq!(client.library_path("items"), "groups/9/items");
        assert_eq!(client.library_path("/items/top"), "groups/9/items/top");
        assert_eq!(client.library_path(""), "groups/9");
    }

    #[test]
    fn verbs_pass_header_lines_and_return_error_statuses() {
        let transport = CannedTransport::default();
        transport.push(412, &[], "Library has been modified since specified version");
        let requests = Arc::clone(&transport.requests);
        let client = ApiClient::with_transport(ClientConfig::new("http://h/"), transport);

        let resp = client
            .user_post("items", "[]", &["If-Unmodified-Since-Version: 3", "broken header"])
            .unwrap();
        assert_eq!(resp.status, 412);

        let sent = requests.lock().unwrap();
        assert_eq!(sent[0].url, "http://h/users/1/items");
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(sent[0].headers.get("If-Unmodified-Since-Version"), Some("3"));
        assert_eq!(sent[0].headers.get("Content-Type"), Some("application/json"));
        assert_eq!(sent[0].body.as_deref(), Some("[]"));
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn verbose_toggled_after_construction_is_honored() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let transport = CannedTransport::default();
        transport.push(200, &[], "[]");
        transport.push(200, &[], "[]");
        let mut client = ApiClient::with_transport(ClientConfig::new("http://h/"), transport);

        tracing::subscriber::with_default(subscriber, || {
            client.get("users/1/items", &[]).unwrap();
            assert!(capture.0.lock().unwrap().is_empty());

            client.config_mut().verbose = true;
            client.get("users/1/items?quiet=no", &[]).unwrap();
        });

        let log = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("request"), "{log}");
        assert!(log.contains("quiet=no"), "{log}");
        assert!(log.contains("status=200"), "{log}");
    }

    #[test]
    fn expect_status_reports_context() {
        let resp = HttpResponse::new(500, Default::default(), "boom").for_request(HttpMethod::Get, "http://h/x");
        let err = expect_status(resp, &[200]).unwrap_err();
        match err {
            ApiError::UnexpectedStatus { url, status, snippet, .. } => {
                assert_eq!(url, "http://h/x");
                assert_eq!(status, 500);
                assert_eq!(snippet, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
