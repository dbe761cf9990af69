//! Object-model helpers for items, collections and searches.
//!
//! # Design
//! - `ObjectType::plural` is the only place object names become path
//!   segments. Every helper below builds its path through `object_path`.
//! - Creates wrap payloads per the configured dialect: `{"items": [...]}` or
//!   a bare array.
//! - `ReturnFormat` picks how much of the created object to decode. The
//!   chain `atom -> data -> content -> json` is walked in order. A failure
//!   names the layer it happened in.

use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::atom::{self, AtomEntry};
use crate::body::coerce_version;
use crate::client::{expect_status, ApiClient};
use crate::config::{EnvelopeStyle, Format};
use crate::error::{ApiError, DecodeLayer, Result};
use crate::http::{HttpMethod, HttpResponse};
use crate::request::RequestBuilder;
use crate::write_result::MultiObjectWriteResult;
use crate::xml::XmlDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Item,
    Collection,
    Search,
    Tag,
    Group,
}

impl ObjectType {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectType::Item => "item",
            ObjectType::Collection => "collection",
            ObjectType::Search => "search",
            ObjectType::Tag => "tag",
            ObjectType::Group => "group",
        }
    }

    /// Path segment for the type. `search` is the one irregular plural.
    pub fn plural(&self) -> &'static str {
        match self {
            ObjectType::Item => "items",
            ObjectType::Collection => "collections",
            ObjectType::Search => "searches",
            ObjectType::Tag => "tags",
            ObjectType::Group => "groups",
        }
    }

    /// Query parameter naming keys in a multi-object request, e.g. `itemKey`.
    pub fn key_param(&self) -> String {
        format!("{}Key", self.name())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "item" | "items" => Ok(ObjectType::Item),
            "collection" | "collections" => Ok(ObjectType::Collection),
            "search" | "searches" => Ok(ObjectType::Search),
            "tag" | "tags" => Ok(ObjectType::Tag),
            "group" | "groups" => Ok(ObjectType::Group),
            other => Err(format!("unknown object type {other:?}")),
        }
    }
}

/// What `create_object` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnFormat {
    /// The raw create response, whatever its status.
    Response,
    /// The parsed multi-object write result.
    ResponseJson,
    /// Key of the created object.
    Key,
    /// The created object fetched back as an Atom document.
    Atom,
    /// Key/version/content of the fetched entry.
    Data,
    /// The entry's `<content>` string.
    Content,
    /// The entry's content parsed as JSON.
    Json,
}

#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Response(HttpResponse),
    WriteResult(MultiObjectWriteResult),
    Key(String),
    Atom(XmlDocument),
    Data(AtomEntry),
    Content(String),
    Json(Value),
}

impl CreateOutcome {
    pub fn into_key(self) -> Option<String> {
        match self {
            CreateOutcome::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            CreateOutcome::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<HttpResponse> {
        match self {
            CreateOutcome::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_write_result(self) -> Option<MultiObjectWriteResult> {
        match self {
            CreateOutcome::WriteResult(result) => Some(result),
            _ => None,
        }
    }
}

/// Shallow-merge `fields` over `base`. Non-object `fields` replace `base`.
pub fn merge_fields(base: Value, fields: Value) -> Value {
    match (base, fields) {
        (Value::Object(mut base), Value::Object(fields)) => {
            base.extend(fields);
            Value::Object(base)
        }
        (_, fields) => fields,
    }
}

impl HttpResponse {
    /// Object or library version carried by the response. The
    /// `Last-Modified-Version` header wins. Otherwise the body's `version`
    /// (JSON) or `zapi:version` (Atom) is used.
    pub fn version(&self) -> Option<u64> {
        if let Some(v) = self.last_modified_version() {
            return Some(v);
        }
        let content_type = self.content_type().unwrap_or("");
        if content_type.starts_with("application/json") {
            self.json().ok()?.get("version").and_then(coerce_version)
        } else if content_type.starts_with("application/atom+xml") {
            let doc = self.xml().ok()?;
            atom::select_text(&doc, "//zapi:version").ok()??.trim().parse().ok()
        } else {
            None
        }
    }
}

impl ApiClient {
    /// `users/1/items`, `users/1/items/KEY`, ...
    pub fn object_path(&self, object_type: ObjectType, key: Option<&str>) -> String {
        match key {
            Some(key) => self.library_path(&format!("{}/{key}", object_type.plural())),
            None => self.library_path(object_type.plural()),
        }
    }

    fn object_request(&self, method: HttpMethod, object_type: ObjectType, key: Option<&str>) -> RequestBuilder<'_> {
        self.request(method, &self.object_path(object_type, key))
    }

    /// Wrap write payloads per the configured dialect.
    pub fn write_envelope(&self, object_type: ObjectType, payloads: Vec<Value>) -> Value {
        match self.config().dialect.envelope {
            EnvelopeStyle::Wrapped => {
                let mut map = Map::new();
                map.insert(object_type.plural().to_string(), Value::Array(payloads));
                Value::Object(map)
            }
            EnvelopeStyle::BareArray => Value::Array(payloads),
        }
    }

    /// Blank item of `item_type` from `items/new`.
    pub fn item_template(&self, item_type: &str) -> Result<Value> {
        let request = self
            .request(HttpMethod::Get, "items/new")
            .query("itemType", item_type)
            .build();
        let response = expect_status(self.send(&request)?, &[200])?;
        response.json()
    }

    pub fn create_item(&self, item_type: &str, fields: Value, format: ReturnFormat) -> Result<CreateOutcome> {
        let template = self.item_template(item_type)?;
        self.create_object(ObjectType::Item, merge_fields(template, fields), format)
    }

    pub fn create_collection(&self, name: &str, parent: Option<&str>, format: ReturnFormat) -> Result<CreateOutcome> {
        let payload = json!({
            "name": name,
            "parentCollection": parent.map_or(Value::Bool(false), |p| Value::String(p.to_string())),
        });
        self.create_object(ObjectType::Collection, payload, format)
    }

    pub fn create_search(&self, name: &str, conditions: Value, format: ReturnFormat) -> Result<CreateOutcome> {
        let payload = json!({ "name": name, "conditions": conditions });
        self.create_object(ObjectType::Search, payload, format)
    }

    /// Create one object and decode the result as far as `format` asks.
    pub fn create_object(&self, object_type: ObjectType, payload: Value, format: ReturnFormat) -> Result<CreateOutcome> {
        let response = self.post_objects(object_type, vec![payload], None)?;
        if format == ReturnFormat::Response {
            return Ok(CreateOutcome::Response(response));
        }
        let response = expect_status(response, &[200])?;
        let result = MultiObjectWriteResult::from_response(&response)?;
        if format == ReturnFormat::ResponseJson {
            return Ok(CreateOutcome::WriteResult(result));
        }

        let key = first_created_key(result.ensure_all_succeeded()?, &response)?;
        tracing::debug!(object = object_type.name(), %key, "created");
        match format {
            ReturnFormat::Atom => self.fetch_atom(object_type, &key).map(CreateOutcome::Atom),
            ReturnFormat::Data => self.fetch_entry(object_type, &key).map(CreateOutcome::Data),
            ReturnFormat::Content => self.fetch_content(object_type, &key).map(CreateOutcome::Content),
            ReturnFormat::Json => self.fetch_content_json(object_type, &key).map(CreateOutcome::Json),
            ReturnFormat::Key | ReturnFormat::Response | ReturnFormat::ResponseJson => Ok(CreateOutcome::Key(key)),
        }
    }

    /// POST a batch; the response is returned whatever its status.
    pub fn post_objects(
        &self,
        object_type: ObjectType,
        payloads: Vec<Value>,
        library_version: Option<u64>,
    ) -> Result<HttpResponse> {
        let envelope = self.write_envelope(object_type, payloads);
        let mut builder = self.object_request(HttpMethod::Post, object_type, None).json(&envelope)?;
        if let Some(version) = library_version {
            builder = builder.if_unmodified_since_version(version);
        }
        self.send(&builder.build())
    }

    /// Batch write. Per-object failures are part of the result, not errors.
    pub fn create_objects(
        &self,
        object_type: ObjectType,
        payloads: Vec<Value>,
        library_version: Option<u64>,
    ) -> Result<MultiObjectWriteResult> {
        let response = expect_status(self.post_objects(object_type, payloads, library_version)?, &[200])?;
        MultiObjectWriteResult::from_response(&response)
    }

    /// GET one object with extra query parameters; any status is returned.
    pub fn get_object(&self, object_type: ObjectType, key: &str, params: &[(&str, &str)]) -> Result<HttpResponse> {
        let builder = params
            .iter()
            .fold(self.object_request(HttpMethod::Get, object_type, Some(key)), |b, (k, v)| b.query(k, v));
        self.send(&builder.build())
    }

    /// The object's own fields, whichever dialect is configured.
    pub fn get_object_json(&self, object_type: ObjectType, key: &str) -> Result<Value> {
        match self.config().dialect.default_format {
            Format::Json => {
                let response = expect_status(self.get_object(object_type, key, &[("format", "json")])?, &[200])?;
                let mut value = response.json()?;
                match value.get_mut("data") {
                    Some(data) => Ok(data.take()),
                    None => Err(ApiError::DialectMismatch {
                        api_version: self.config().api_version_label(),
                        message: format!("{} has no \"data\" envelope", response.url),
                    }),
                }
            }
            _ => self.fetch_content_json(object_type, key),
        }
    }

    /// Current object version.
    pub fn object_version(&self, object_type: ObjectType, key: &str) -> Result<u64> {
        let format = self.config().dialect.default_format.as_str();
        let response = expect_status(self.get_object(object_type, key, &[("format", format)])?, &[200])?;
        response
            .version()
            .ok_or_else(|| ApiError::malformed(&response, "version", "no Last-Modified-Version header or body version"))
    }

    /// Current library version, from a one-key listing.
    pub fn library_version(&self) -> Result<u64> {
        let request = self
            .object_request(HttpMethod::Get, ObjectType::Item, None)
            .format(Format::Keys)
            .query("limit", 1)
            .build();
        let response = expect_status(self.send(&request)?, &[200])?;
        response
            .last_modified_version()
            .ok_or_else(|| ApiError::malformed(&response, "version", "no Last-Modified-Version header"))
    }

    /// PUT the full object. `version` becomes `If-Unmodified-Since-Version`.
    pub fn update_object(&self, object_type: ObjectType, key: &str, data: &Value, version: Option<u64>) -> Result<HttpResponse> {
        self.write_object(HttpMethod::Put, object_type, key, data, version)
    }

    /// PATCH a subset of fields.
    pub fn patch_object(&self, object_type: ObjectType, key: &str, data: &Value, version: Option<u64>) -> Result<HttpResponse> {
        self.write_object(HttpMethod::Patch, object_type, key, data, version)
    }

    fn write_object(
        &self,
        method: HttpMethod,
        object_type: ObjectType,
        key: &str,
        data: &Value,
        version: Option<u64>,
    ) -> Result<HttpResponse> {
        let mut builder = self.object_request(method, object_type, Some(key)).json(data)?;
        if let Some(version) = version {
            builder = builder.if_unmodified_since_version(version);
        }
        self.send(&builder.build())
    }

    pub fn delete_object(&self, object_type: ObjectType, key: &str, version: Option<u64>) -> Result<HttpResponse> {
        let mut builder = self.object_request(HttpMethod::Delete, object_type, Some(key));
        if let Some(version) = version {
            builder = builder.if_unmodified_since_version(version);
        }
        self.send(&builder.build())
    }

    /// DELETE several objects at once under a library version.
    pub fn delete_objects(&self, object_type: ObjectType, keys: &[&str], library_version: u64) -> Result<HttpResponse> {
        let request = self
            .object_request(HttpMethod::Delete, object_type, None)
            .query(&object_type.key_param(), keys.join(","))
            .if_unmodified_since_version(library_version)
            .build();
        self.send(&request)
    }

    /// `format=keys` listing.
    pub fn keys(&self, object_type: ObjectType, params: &[(&str, &str)]) -> Result<Vec<String>> {
        let builder = params.iter().fold(
            self.object_request(HttpMethod::Get, object_type, None).format(Format::Keys),
            |b, (k, v)| b.query(k, v),
        );
        let response = expect_status(self.send(&builder.build())?, &[200])?;
        Ok(response.keys())
    }

    /// `format=versions` listing, optionally limited to versions after `since`.
    pub fn versions(&self, object_type: ObjectType, since: Option<u64>) -> Result<crate::body::VersionMap> {
        let mut builder = self
            .object_request(HttpMethod::Get, object_type, None)
            .format(Format::Versions);
        if let Some(since) = since {
            builder = builder.query("since", since);
        }
        let response = expect_status(self.send(&builder.build())?, &[200])?;
        response.versions()
    }

    /// Attachment file request. Redirects are not followed, so a 3xx and its
    /// `Location` come back as-is.
    pub fn get_file_redirect(&self, key: &str) -> Result<HttpResponse> {
        let path = self.object_path(ObjectType::Item, Some(&format!("{key}/file")));
        self.send(&self.request(HttpMethod::Get, &path).build())
    }

    /// Atom layer: fetch the object as `format=atom&content=json` and parse.
    pub fn fetch_atom(&self, object_type: ObjectType, key: &str) -> Result<XmlDocument> {
        let response = self
            .get_object(object_type, key, &[("format", "atom"), ("content", "json")])
            .map_err(|e| ApiError::decode(DecodeLayer::Fetch, &self.object_path(object_type, Some(key)), e.to_string()))?;
        if response.status != 200 {
            return Err(ApiError::decode(
                DecodeLayer::Fetch,
                &response.url,
                format!("HTTP {}", response.status),
            ));
        }
        XmlDocument::parse(&response.body).map_err(|e| ApiError::decode(DecodeLayer::Atom, &response.url, e.to_string()))
    }

    /// Data layer: the fetched entry's key, version and content.
    pub fn fetch_entry(&self, object_type: ObjectType, key: &str) -> Result<AtomEntry> {
        let doc = self.fetch_atom(object_type, key)?;
        let url = self.object_path(object_type, Some(key));
        let mut entries = atom::entries(&doc).map_err(|e| ApiError::decode(DecodeLayer::Data, &url, e.to_string()))?;
        if entries.is_empty() {
            return Err(ApiError::decode(DecodeLayer::Data, &url, "no <entry> in document"));
        }
        Ok(entries.remove(0))
    }

    /// Content layer: the entry's `<content>` string.
    pub fn fetch_content(&self, object_type: ObjectType, key: &str) -> Result<String> {
        let entry = self.fetch_entry(object_type, key)?;
        match entry.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(ApiError::decode(
                DecodeLayer::Content,
                &self.object_path(object_type, Some(key)),
                "entry has no content",
            )),
        }
    }

    /// JSON layer: the content parsed as a JSON object.
    pub fn fetch_content_json(&self, object_type: ObjectType, key: &str) -> Result<Value> {
        let content = self.fetch_content(object_type, key)?;
        let url = self.object_path(object_type, Some(key));
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Null) => Err(ApiError::decode(DecodeLayer::Json, &url, "content decoded to null")),
            Ok(value) => Ok(value),
            Err(e) => Err(ApiError::decode(DecodeLayer::Json, &url, e.to_string())),
        }
    }
}

fn first_created_key(result: MultiObjectWriteResult, response: &HttpResponse) -> Result<String> {
    if let Some((_, success)) = result.successful.into_iter().next() {
        return Ok(success.key);
    }
    // An identical object already existed.
    let unchanged = result.unchanged.values().next().and_then(|v| match v {
        Value::String(key) => Some(key.clone()),
        Value::Object(obj) => obj.get("key").and_then(Value::as_str).map(str::to_string),
        _ => None,
    });
    unchanged.ok_or_else(|| ApiError::malformed(response, "write result", "no object was created"))
}
