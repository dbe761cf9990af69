//! Panicking assertions for tests driving the API.
//!
//! Each helper is `#[track_caller]`, so a failure points at the test line.
//! Failure messages carry the method, URL, status, relevant headers and a
//! body snippet.

use serde_json::Value;

use crate::body::ParsedBody;
use crate::error::snippet;
use crate::http::HttpResponse;
use crate::response::{LAST_MODIFIED_VERSION, TOTAL_RESULTS};
use crate::write_result::MultiObjectWriteResult;

/// One-line description of a response for failure messages.
pub fn describe(response: &HttpResponse) -> String {
    let mut out = format!("{} {} -> HTTP {}", response.method, response.url, response.status);
    for name in ["Content-Type", LAST_MODIFIED_VERSION, TOTAL_RESULTS] {
        if let Some(value) = response.header(name) {
            out.push_str(&format!("; {name}: {value}"));
        }
    }
    out.push_str(&format!("; body: {:?}", snippet(&response.body)));
    out
}

#[track_caller]
pub fn assert_status(response: &HttpResponse, expected: u16) {
    assert!(
        response.status == expected,
        "expected HTTP {expected}, got {}",
        describe(response)
    );
}

#[track_caller]
pub fn assert_status_in(response: &HttpResponse, expected: &[u16]) {
    assert!(
        expected.contains(&response.status),
        "expected HTTP one of {expected:?}, got {}",
        describe(response)
    );
}

#[track_caller]
pub fn assert_ok(response: &HttpResponse) {
    assert_status(response, 200);
}

#[track_caller]
pub fn assert_no_content(response: &HttpResponse) {
    assert_status(response, 204);
}

#[track_caller]
pub fn assert_not_modified(response: &HttpResponse) {
    assert_status(response, 304);
}

#[track_caller]
pub fn assert_precondition_failed(response: &HttpResponse) {
    assert_status(response, 412);
}

#[track_caller]
pub fn assert_precondition_required(response: &HttpResponse) {
    assert_status(response, 428);
}

/// Compares the media type only; parameters such as `charset` are ignored.
#[track_caller]
pub fn assert_content_type(response: &HttpResponse, expected: &str) {
    let actual = response
        .content_type()
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase());
    assert!(
        actual.as_deref() == Some(expected.to_ascii_lowercase().as_str()),
        "expected Content-Type {expected}, got {}",
        describe(response)
    );
}

/// `Total-Results` header, falling back to `zapi:totalResults` in Atom feeds.
#[track_caller]
pub fn assert_total_results(response: &HttpResponse, expected: u64) {
    let actual = response.total_results().or_else(|| {
        response
            .parse(None)
            .ok()
            .and_then(|body| match body {
                ParsedBody::Xml(doc) => crate::atom::total_results(&doc),
                _ => None,
            })
    });
    assert!(
        actual == Some(expected),
        "expected {expected} total results, found {actual:?} in {}",
        describe(response)
    );
}

/// Number of results in the body: JSON array, Atom entries or key list.
#[track_caller]
pub fn assert_number_results(response: &HttpResponse, expected: usize) {
    let parsed = match response.parse(None) {
        Ok(parsed) => parsed,
        Err(e) => panic!("cannot count results: {e}; {}", describe(response)),
    };
    let actual = parsed.result_count();
    assert!(
        actual == expected,
        "expected {expected} results, found {actual} ({} body) in {}",
        parsed.kind(),
        describe(response)
    );
}

/// Index `index` was written, optionally checking the echoed data fields.
#[track_caller]
pub fn assert_successful(result: &MultiObjectWriteResult, index: usize, fields: Option<&Value>) {
    let Some(success) = result.successful.get(&index) else {
        panic!("index {index} not in successful: {result:?}");
    };
    let Some(Value::Object(expected)) = fields else {
        return;
    };
    let Some(data) = &success.data else {
        panic!("successful[{index}] has no data to compare: {success:?}");
    };
    for (name, value) in expected {
        assert!(
            data.get(name) == Some(value),
            "successful[{index}].data.{name}: expected {value}, got {:?}",
            data.get(name)
        );
    }
}

#[track_caller]
pub fn assert_unchanged(result: &MultiObjectWriteResult, index: usize) {
    assert!(
        result.unchanged.contains_key(&index),
        "index {index} not in unchanged: {result:?}"
    );
}

/// Index `index` failed with `code`, and with `message` when one is given.
#[track_caller]
pub fn assert_failed(result: &MultiObjectWriteResult, index: usize, code: u16, message: Option<&str>) {
    let Some(failure) = result.failed.get(&index) else {
        panic!("index {index} not in failed: {result:?}");
    };
    assert!(
        failure.code == code,
        "failed[{index}]: expected code {code}, got {} ({})",
        failure.code,
        failure.message
    );
    if let Some(message) = message {
        assert!(
            failure.message == message,
            "failed[{index}]: expected message {message:?}, got {:?}",
            failure.message
        );
    }
}

/// Every submitted index is reported exactly once.
#[track_caller]
pub fn assert_write_coverage(result: &MultiObjectWriteResult, submitted: usize) {
    let coverage = result.coverage(submitted);
    assert!(
        coverage.is_exact(),
        "write result does not cover 0..{submitted}: {coverage:?} in {result:?}"
    );
}
