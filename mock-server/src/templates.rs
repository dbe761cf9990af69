//! Item templates served from `items/new` and used to validate item fields.

use serde_json::{json, Map, Value};

/// Fields every object may carry besides its type-specific ones.
pub const META_FIELDS: [&str; 6] = ["key", "version", "dateAdded", "dateModified", "deleted", "parentItem"];

pub const ITEM_TYPES: [&str; 4] = ["book", "journalArticle", "note", "attachment"];

/// Blank item of `item_type`, or `None` for an unknown type.
pub fn item_template(item_type: &str) -> Option<Value> {
    let template = match item_type {
        "book" => json!({
            "itemType": "book",
            "title": "",
            "creators": [{"creatorType": "author", "firstName": "", "lastName": ""}],
            "abstractNote": "",
            "series": "",
            "edition": "",
            "place": "",
            "publisher": "",
            "date": "",
            "numPages": "",
            "language": "",
            "ISBN": "",
            "url": "",
            "accessDate": "",
            "extra": "",
            "tags": [],
            "collections": [],
            "relations": {},
        }),
        "journalArticle" => json!({
            "itemType": "journalArticle",
            "title": "",
            "creators": [{"creatorType": "author", "firstName": "", "lastName": ""}],
            "abstractNote": "",
            "publicationTitle": "",
            "volume": "",
            "issue": "",
            "pages": "",
            "date": "",
            "DOI": "",
            "ISSN": "",
            "url": "",
            "extra": "",
            "tags": [],
            "collections": [],
            "relations": {},
        }),
        "note" => json!({
            "itemType": "note",
            "note": "",
            "tags": [],
            "collections": [],
            "relations": {},
        }),
        "attachment" => json!({
            "itemType": "attachment",
            "linkMode": "imported_file",
            "title": "",
            "contentType": "",
            "charset": "",
            "filename": "",
            "md5": null,
            "mtime": null,
            "tags": [],
            "relations": {},
        }),
        _ => return None,
    };
    Some(template)
}

/// Check an item's fields against its type. Returns the error message the
/// API reports for the first problem found.
pub fn validate_item(data: &Map<String, Value>) -> Result<(), String> {
    let item_type = match data.get("itemType") {
        Some(Value::String(t)) => t.as_str(),
        Some(_) => return Err("'itemType' must be a string".to_string()),
        None => return Err("'itemType' property not provided".to_string()),
    };
    let Some(Value::Object(template)) = item_template(item_type) else {
        return Err(format!("'{item_type}' is not a valid itemType"));
    };
    for field in data.keys() {
        if !template.contains_key(field) && !META_FIELDS.contains(&field.as_str()) {
            return Err(format!("Invalid property '{field}'"));
        }
    }
    if let Some(tags) = data.get("tags") {
        let valid = tags
            .as_array()
            .is_some_and(|tags| tags.iter().all(|t| t.get("tag").and_then(Value::as_str).is_some()));
        if !valid {
            return Err("'tags' must be an array of {\"tag\": ...} objects".to_string());
        }
    }
    Ok(())
}

pub fn validate_collection(data: &Map<String, Value>) -> Result<(), String> {
    match data.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => Ok(()),
        _ => Err("Collection name cannot be empty".to_string()),
    }
}

pub fn validate_search(data: &Map<String, Value>) -> Result<(), String> {
    match data.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        _ => return Err("Search name cannot be empty".to_string()),
    }
    match data.get("conditions") {
        Some(Value::Array(conditions)) if !conditions.is_empty() => Ok(()),
        _ => Err("'conditions' must be a non-empty array".to_string()),
    }
}
