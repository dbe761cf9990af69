//! Admin-only group creation payloads and Basic credentials.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

pub const GROUP_TYPES: [&str; 3] = ["Private", "PublicOpen", "PublicClosed"];

/// A validated `<group .../>` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub owner: u64,
    pub name: String,
    /// The remaining attributes, e.g. `type` and `libraryEditing`.
    pub attributes: BTreeMap<String, String>,
}

/// Attributes of the document's root `<group>` element.
fn group_attributes(body: &str) -> Result<BTreeMap<String, String>, String> {
    let mut reader = Reader::from_str(body);
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) => {
                if e.name().as_ref() != b"group" {
                    return Err(format!(
                        "expected <group>, found <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    ));
                }
                let mut attributes = BTreeMap::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    let value = attr.unescape_value().map_err(|e| e.to_string())?;
                    attributes.insert(String::from_utf8_lossy(attr.key.as_ref()).into_owned(), value.into_owned());
                }
                return Ok(attributes);
            }
            Event::Eof => return Err("no <group> element".to_string()),
            _ => {}
        }
    }
}

pub fn parse_new_group(body: &str) -> Result<NewGroup, String> {
    let mut attributes = group_attributes(body)?;
    let owner = attributes
        .remove("owner")
        .and_then(|o| o.trim().parse().ok())
        .ok_or_else(|| "Invalid or missing owner".to_string())?;
    let name = attributes
        .remove("name")
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| "Group name not provided".to_string())?;
    match attributes.get("type") {
        Some(t) if GROUP_TYPES.contains(&t.as_str()) => {}
        Some(t) => return Err(format!("Invalid group type '{t}'")),
        None => return Err("Group type not provided".to_string()),
    }
    Ok(NewGroup { owner, name, attributes })
}

/// Whether an `Authorization` header carries exactly these Basic credentials.
pub fn basic_auth_matches(header: Option<&str>, username: &str, password: &str) -> bool {
    let Some(token) = header.and_then(|h| h.strip_prefix("Basic ")) else {
        return false;
    };
    STANDARD
        .decode(token.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .is_some_and(|pair| pair == format!("{username}:{password}"))
}
