//! In-memory libraries and the versioning rules applied to writes.
//!
//! Every library has a version counter. A request that changes anything
//! bumps it by one, and each object it touched takes the new value as its
//! own version. Conditional writes compare against these counters:
//! a missing precondition is a 428, a stale one a 412.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::templates;

pub const MAX_WRITE_OBJECTS: usize = 50;

const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LibraryId {
    User(u64),
    Group(u64),
}

impl LibraryId {
    pub fn kind(&self) -> &'static str {
        match self {
            LibraryId::User(_) => "user",
            LibraryId::Group(_) => "group",
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            LibraryId::User(id) | LibraryId::Group(id) => *id,
        }
    }

    /// Path prefix, e.g. `users/1`.
    pub fn prefix(&self) -> String {
        format!("{}s/{}", self.kind(), self.id())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Item,
    Collection,
    Search,
}

impl ObjectKind {
    pub fn from_plural(plural: &str) -> Option<Self> {
        match plural {
            "items" => Some(ObjectKind::Item),
            "collections" => Some(ObjectKind::Collection),
            "searches" => Some(ObjectKind::Search),
            _ => None,
        }
    }

    pub fn singular(&self) -> &'static str {
        match self {
            ObjectKind::Item => "item",
            ObjectKind::Collection => "collection",
            ObjectKind::Search => "search",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Item => "items",
            ObjectKind::Collection => "collections",
            ObjectKind::Search => "searches",
        }
    }

    /// Query parameter listing keys, e.g. `itemKey`.
    pub fn key_param(&self) -> String {
        format!("{}Key", self.singular())
    }

    /// Capitalized name used in error messages.
    pub fn title(&self) -> &'static str {
        match self {
            ObjectKind::Item => "Item",
            ObjectKind::Collection => "Collection",
            ObjectKind::Search => "Search",
        }
    }

    fn validate(&self, data: &Map<String, Value>) -> Result<(), String> {
        match self {
            ObjectKind::Item => templates::validate_item(data),
            ObjectKind::Collection => templates::validate_collection(data),
            ObjectKind::Search => templates::validate_search(data),
        }
    }

    /// Fields a new object starts with before the submitted ones are applied.
    fn defaults(&self, data: &Map<String, Value>) -> Map<String, Value> {
        let base = match self {
            ObjectKind::Item => data
                .get("itemType")
                .and_then(Value::as_str)
                .and_then(templates::item_template)
                .unwrap_or_else(|| json!({})),
            ObjectKind::Collection => json!({"name": "", "parentCollection": false, "relations": {}}),
            ObjectKind::Search => json!({"name": "", "conditions": []}),
        };
        match base {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// One stored object. `data` holds its fields without `key` and `version`.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub version: u64,
    pub data: Map<String, Value>,
}

impl StoredObject {
    /// `data` with `key` and `version` folded in, as clients see it.
    pub fn full_data(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("key".to_string(), Value::String(self.key.clone()));
        out.insert("version".to_string(), Value::from(self.version));
        for (name, value) in &self.data {
            out.insert(name.clone(), value.clone());
        }
        out
    }

    /// Display title: `title` for items, `name` for collections and searches.
    pub fn title(&self) -> &str {
        self.data
            .get("title")
            .or_else(|| self.data.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    fn tag_names(&self) -> Vec<(String, u64)> {
        self.data
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| {
                        let name = t.get("tag")?.as_str()?.to_string();
                        let tag_type = t.get("type").and_then(Value::as_u64).unwrap_or(0);
                        Some((name, tag_type))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagSummary {
    pub name: String,
    pub tag_type: u64,
    pub num_items: u64,
}

#[derive(Clone, Debug, Default)]
pub struct LibraryData {
    pub version: u64,
    items: BTreeMap<String, StoredObject>,
    collections: BTreeMap<String, StoredObject>,
    searches: BTreeMap<String, StoredObject>,
}

/// Result of one entry in a batch write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    Success(StoredObject),
    Unchanged(String),
    Failed { key: Option<String>, code: u16, message: String },
}

/// A rejected single-object request: HTTP status and message.
pub type Rejection = (u16, String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    /// PUT: fields left out are reset.
    Replace,
    /// PATCH and batch POST: fields left out are kept.
    Merge,
}

impl LibraryData {
    pub fn objects(&self, kind: ObjectKind) -> &BTreeMap<String, StoredObject> {
        match kind {
            ObjectKind::Item => &self.items,
            ObjectKind::Collection => &self.collections,
            ObjectKind::Search => &self.searches,
        }
    }

    fn objects_mut(&mut self, kind: ObjectKind) -> &mut BTreeMap<String, StoredObject> {
        match kind {
            ObjectKind::Item => &mut self.items,
            ObjectKind::Collection => &mut self.collections,
            ObjectKind::Search => &mut self.searches,
        }
    }

    pub fn get(&self, kind: ObjectKind, key: &str) -> Option<&StoredObject> {
        self.objects(kind).get(key)
    }

    /// Objects modified after `since`, optionally restricted to `keys`.
    pub fn list(&self, kind: ObjectKind, since: Option<u64>, keys: Option<&[String]>) -> Vec<&StoredObject> {
        self.objects(kind)
            .values()
            .filter(|o| since.map_or(true, |s| o.version > s))
            .filter(|o| keys.map_or(true, |keys| keys.contains(&o.key)))
            .collect()
    }

    /// Library-scoped precondition shared by batch writes and deletes.
    pub fn check_library_version(&self, expected: Option<u64>, required: bool) -> Result<(), Rejection> {
        match expected {
            None if required => Err((428, "If-Unmodified-Since-Version not provided".to_string())),
            Some(expected) if self.version > expected => Err((
                412,
                format!("Library has been modified since specified version (expected {expected}, found {})", self.version),
            )),
            _ => Ok(()),
        }
    }

    /// Apply a batch of creates and updates. All changed objects share the
    /// new library version.
    pub fn write_objects(&mut self, kind: ObjectKind, payloads: Vec<Value>, header_version: Option<u64>) -> Vec<WriteOutcome> {
        let next = self.version + 1;
        let mut changed = false;
        let outcomes = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| {
                let outcome = self.write_one(kind, index, payload, header_version, next);
                changed |= matches!(outcome, WriteOutcome::Success(_));
                outcome
            })
            .collect();
        if changed {
            self.version = next;
        }
        outcomes
    }

    fn write_one(&mut self, kind: ObjectKind, index: usize, payload: Value, header_version: Option<u64>, next: u64) -> WriteOutcome {
        let Value::Object(mut data) = payload else {
            return WriteOutcome::Failed {
                key: None,
                code: 400,
                message: format!("Invalid value for index {index} in uploaded data; expected JSON {} object", kind.singular()),
            };
        };
        let key = data.remove("key").and_then(|k| k.as_str().map(str::to_string));
        let body_version = data.remove("version").and_then(|v| v.as_u64());

        let existing = key.as_deref().and_then(|k| self.get(kind, k)).cloned();
        let Some(existing) = existing else {
            let merged = merge(kind.defaults(&data), data);
            if let Err(message) = kind.validate(&merged) {
                return WriteOutcome::Failed { key, code: 400, message };
            }
            let object = StoredObject {
                key: key.unwrap_or_else(generate_key),
                version: next,
                data: merged,
            };
            self.objects_mut(kind).insert(object.key.clone(), object.clone());
            return WriteOutcome::Success(object);
        };

        if let Err((code, message)) = check_object_version(kind, &existing, body_version.or(header_version)) {
            return WriteOutcome::Failed { key: Some(existing.key), code, message };
        }
        let updated = merge(existing.data.clone(), data);
        if let Err(message) = kind.validate(&updated) {
            return WriteOutcome::Failed { key: Some(existing.key), code: 400, message };
        }
        if updated == existing.data {
            return WriteOutcome::Unchanged(existing.key);
        }
        let object = StoredObject {
            key: existing.key,
            version: next,
            data: updated,
        };
        self.objects_mut(kind).insert(object.key.clone(), object.clone());
        WriteOutcome::Success(object)
    }

    /// Single-object PUT/PATCH. Returns the new version, or `None` when the
    /// submitted data matched what was stored.
    pub fn update_object(
        &mut self,
        kind: ObjectKind,
        key: &str,
        body: Value,
        header_version: Option<u64>,
        mode: UpdateMode,
    ) -> Result<Option<u64>, Rejection> {
        let existing = self.get(kind, key).cloned().ok_or((404, "Not found".to_string()))?;
        let Value::Object(mut data) = body else {
            return Err((400, format!("{} data must be a JSON object", kind.title())));
        };
        if let Some(body_key) = data.remove("key") {
            if body_key.as_str() != Some(key) {
                return Err((400, format!("{} key in body does not match key in URL", kind.title())));
            }
        }
        let body_version = data.remove("version").and_then(|v| v.as_u64());
        check_object_version(kind, &existing, header_version.or(body_version))?;

        let updated = match mode {
            UpdateMode::Replace => merge(kind.defaults(&data), data),
            UpdateMode::Merge => merge(existing.data.clone(), data),
        };
        kind.validate(&updated).map_err(|message| (400, message))?;
        if updated == existing.data {
            return Ok(None);
        }
        self.version += 1;
        let version = self.version;
        self.objects_mut(kind).insert(
            key.to_string(),
            StoredObject {
                key: key.to_string(),
                version,
                data: updated,
            },
        );
        Ok(Some(version))
    }

    pub fn delete_object(&mut self, kind: ObjectKind, key: &str, header_version: Option<u64>) -> Result<u64, Rejection> {
        let existing = self.get(kind, key).ok_or((404, "Not found".to_string()))?;
        check_object_version(kind, existing, header_version)?;
        self.objects_mut(kind).remove(key);
        self.version += 1;
        Ok(self.version)
    }

    /// Multi-key delete under a library version. Unknown keys are ignored.
    pub fn delete_objects(&mut self, kind: ObjectKind, keys: &[String], header_version: Option<u64>) -> Result<u64, Rejection> {
        self.check_library_version(header_version, true)?;
        let objects = self.objects_mut(kind);
        let removed = keys.iter().filter(|k| objects.remove(k.as_str()).is_some()).count();
        if removed > 0 {
            self.version += 1;
        }
        Ok(self.version)
    }

    /// Tags across all items, by name.
    pub fn tags(&self) -> Vec<TagSummary> {
        let mut by_name: BTreeMap<String, TagSummary> = BTreeMap::new();
        for item in self.items.values() {
            for (name, tag_type) in item.tag_names() {
                by_name
                    .entry(name.clone())
                    .or_insert(TagSummary {
                        name,
                        tag_type,
                        num_items: 0,
                    })
                    .num_items += 1;
            }
        }
        by_name.into_values().collect()
    }

    /// Remove `names` from every item carrying them.
    pub fn delete_tags(&mut self, names: &[String], header_version: Option<u64>) -> Result<u64, Rejection> {
        self.check_library_version(header_version, true)?;
        let next = self.version + 1;
        let mut changed = false;
        for item in self.items.values_mut() {
            let Some(Value::Array(tags)) = item.data.get_mut("tags") else {
                continue;
            };
            let before = tags.len();
            tags.retain(|t| !t.get("tag").and_then(Value::as_str).is_some_and(|n| names.iter().any(|x| x == n)));
            if tags.len() != before {
                item.version = next;
                changed = true;
            }
        }
        if changed {
            self.version = next;
        }
        Ok(self.version)
    }
}

fn check_object_version(kind: ObjectKind, existing: &StoredObject, expected: Option<u64>) -> Result<(), Rejection> {
    match expected {
        None => Err((
            428,
            "Either If-Unmodified-Since-Version or object version property must be provided for key-based writes".to_string(),
        )),
        Some(expected) if existing.version > expected => Err((
            412,
            format!(
                "{} has been modified since specified version (expected {expected}, found {})",
                kind.title(),
                existing.version
            ),
        )),
        Some(_) => Ok(()),
    }
}

fn merge(mut base: Map<String, Value>, fields: Map<String, Value>) -> Map<String, Value> {
    base.extend(fields);
    base
}

/// Random 8-character object key.
pub fn generate_key() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(8)
        .map(|b| KEY_ALPHABET[*b as usize % KEY_ALPHABET.len()] as char)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: u64,
    pub owner: u64,
    pub name: String,
    /// Remaining admin attributes as submitted.
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Store {
    libraries: HashMap<LibraryId, LibraryData>,
    groups: BTreeMap<u64, GroupInfo>,
    last_group_id: u64,
}

impl Store {
    /// Stored data for `id`. A user library nobody has written to yet has
    /// none.
    pub fn library(&self, id: LibraryId) -> Option<&LibraryData> {
        self.libraries.get(&id)
    }

    /// User libraries exist on first use; group libraries only once created.
    pub fn library_exists(&self, id: LibraryId) -> bool {
        matches!(id, LibraryId::User(_)) || self.groups.contains_key(&id.id())
    }

    pub fn library_mut(&mut self, id: LibraryId) -> Option<&mut LibraryData> {
        if !self.library_exists(id) {
            return None;
        }
        Some(self.libraries.entry(id).or_default())
    }

    pub fn create_group(&mut self, owner: u64, name: String, attributes: BTreeMap<String, String>) -> GroupInfo {
        self.last_group_id += 1;
        let group = GroupInfo {
            id: self.last_group_id,
            owner,
            name,
            attributes,
        };
        self.groups.insert(group.id, group.clone());
        self.libraries.insert(LibraryId::Group(group.id), LibraryData::default());
        group
    }

    pub fn delete_group(&mut self, id: u64) -> bool {
        self.libraries.remove(&LibraryId::Group(id));
        self.groups.remove(&id).is_some()
    }

    pub fn group(&self, id: u64) -> Option<&GroupInfo> {
        self.groups.get(&id)
    }
}
