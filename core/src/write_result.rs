//! Multi-object write results.
//!
//! A batch write reports each submitted index in exactly one of
//! `successful`, `unchanged` or `failed`. Partial failure is a normal
//! result. Only `ensure_all_succeeded` turns it into an error. Older servers
//! send the deprecated `success` map (index to key) instead of `successful`;
//! both are read into `successful`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::body::coerce_version;
use crate::error::{ApiError, Result};
use crate::http::HttpResponse;

#[derive(Debug, Clone, PartialEq)]
pub struct WriteSuccess {
    pub key: String,
    pub version: Option<u64>,
    /// Object data as echoed by the server, when it sends it.
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub key: Option<String>,
    pub code: u16,
    pub message: String,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiObjectWriteResult {
    pub successful: BTreeMap<usize, WriteSuccess>,
    pub unchanged: BTreeMap<usize, Value>,
    pub failed: BTreeMap<usize, WriteFailure>,
}

/// How a result's indices line up with the submitted batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    pub missing: Vec<usize>,
    /// Indices reported in more than one map.
    pub duplicated: Vec<usize>,
    pub out_of_range: Vec<usize>,
}

impl Coverage {
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty() && self.out_of_range.is_empty()
    }
}

impl MultiObjectWriteResult {
    pub fn from_response(response: &HttpResponse) -> Result<Self> {
        let value = response.json()?;
        Self::from_value(response, value)
    }

    fn from_value(response: &HttpResponse, value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(ApiError::malformed(response, "write result", "expected a JSON object"));
        };
        if !["successful", "success", "unchanged", "failed"]
            .iter()
            .any(|k| map.contains_key(*k))
        {
            return Err(ApiError::DialectMismatch {
                api_version: response
                    .api_version()
                    .map_or_else(|| "unknown".to_string(), |v| v.to_string()),
                message: format!("write response from {} has no successful/success/unchanged/failed maps", response.url),
            });
        }

        let mut result = MultiObjectWriteResult::default();
        if let Some(successful) = map.get("successful") {
            for (idx, entry) in indexed(response, "successful", successful)? {
                result.successful.insert(idx, parse_success(response, entry)?);
            }
            if let Some(success) = map.get("success") {
                check_success_alias(response, &result, success)?;
            }
        } else if let Some(success) = map.get("success") {
            for (idx, entry) in indexed(response, "success", success)? {
                result.successful.insert(idx, parse_success(response, entry)?);
            }
        }
        if let Some(unchanged) = map.get("unchanged") {
            for (idx, entry) in indexed(response, "unchanged", unchanged)? {
                result.unchanged.insert(idx, entry.clone());
            }
        }
        if let Some(failed) = map.get("failed") {
            for (idx, entry) in indexed(response, "failed", failed)? {
                result.failed.insert(idx, parse_failure(response, entry)?);
            }
        }
        Ok(result)
    }

    /// Deprecated index-to-key view of `successful`.
    pub fn success(&self) -> BTreeMap<usize, String> {
        self.successful.iter().map(|(i, s)| (*i, s.key.clone())).collect()
    }

    /// Key of an unchanged entry. Servers send either the key string or the
    /// object itself.
    pub fn unchanged_key(&self, index: usize) -> Option<&str> {
        match self.unchanged.get(&index)? {
            Value::String(key) => Some(key),
            Value::Object(obj) => obj.get("key").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn total(&self) -> usize {
        self.successful.len() + self.unchanged.len() + self.failed.len()
    }

    /// Compare reported indices against a batch of `submitted` objects.
    pub fn coverage(&self, submitted: usize) -> Coverage {
        let mut seen = BTreeSet::new();
        let mut coverage = Coverage::default();
        let all = self
            .successful
            .keys()
            .chain(self.unchanged.keys())
            .chain(self.failed.keys());
        for &idx in all {
            if idx >= submitted {
                coverage.out_of_range.push(idx);
            }
            if !seen.insert(idx) {
                coverage.duplicated.push(idx);
            }
        }
        coverage.missing = (0..submitted).filter(|i| !seen.contains(i)).collect();
        coverage.out_of_range.sort_unstable();
        coverage.duplicated.sort_unstable();
        coverage.duplicated.dedup();
        coverage
    }

    /// Turn any failed entry into `ApiError::PartialFailure`.
    pub fn ensure_all_succeeded(self) -> Result<Self> {
        if self.failed.is_empty() {
            return Ok(self);
        }
        let summary = self
            .failed
            .iter()
            .map(|(idx, f)| format!("[{idx}] {} {}", f.code, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ApiError::PartialFailure {
            failed: self.failed.len(),
            total: self.total(),
            summary,
        })
    }
}

fn indexed<'v>(response: &HttpResponse, field: &str, value: &'v Value) -> Result<Vec<(usize, &'v Value)>> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                k.parse::<usize>()
                    .map(|idx| (idx, v))
                    .map_err(|_| ApiError::malformed(response, "write result", format!("{field} has non-numeric index {k:?}")))
            })
            .collect(),
        // An empty map is serialized as [] by some servers.
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Array(items) => Ok(items.iter().enumerate().collect()),
        _ => Err(ApiError::malformed(response, "write result", format!("{field} is not a map"))),
    }
}

/// The deprecated `success` map must name the same keys at the same indices
/// as `successful`.
fn check_success_alias(response: &HttpResponse, result: &MultiObjectWriteResult, success: &Value) -> Result<()> {
    let mut alias = BTreeMap::new();
    for (idx, entry) in indexed(response, "success", success)? {
        alias.insert(idx, parse_success(response, entry)?.key);
    }
    let expected = result.success();
    if alias == expected {
        return Ok(());
    }
    let index = expected
        .keys()
        .chain(alias.keys())
        .find(|i| expected.get(*i) != alias.get(*i))
        .copied()
        .unwrap_or_default();
    Err(ApiError::malformed(
        response,
        "write result",
        format!("success and successful disagree at index {index}"),
    ))
}

fn parse_success(response: &HttpResponse, entry: &Value) -> Result<WriteSuccess> {
    match entry {
        Value::String(key) => Ok(WriteSuccess {
            key: key.clone(),
            version: None,
            data: None,
        }),
        Value::Object(obj) => {
            let key = obj
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::malformed(response, "write result", "successful entry without key"))?;
            Ok(WriteSuccess {
                key: key.to_string(),
                version: obj.get("version").and_then(coerce_version),
                data: obj.get("data").cloned(),
            })
        }
        other => Err(ApiError::malformed(
            response,
            "write result",
            format!("unexpected successful entry {other}"),
        )),
    }
}

fn parse_failure(response: &HttpResponse, entry: &Value) -> Result<WriteFailure> {
    let Value::Object(obj) = entry else {
        return Err(ApiError::malformed(response, "write result", "failed entry is not an object"));
    };
    let code = obj
        .get("code")
        .and_then(coerce_version)
        .and_then(|c| u16::try_from(c).ok())
        .ok_or_else(|| ApiError::malformed(response, "write result", "failed entry without code"))?;
    Ok(WriteFailure {
        key: obj.get("key").and_then(Value::as_str).map(str::to_string),
        code,
        message: obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        data: obj.get("data").cloned(),
    })
}
