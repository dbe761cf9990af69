//! Library-level helpers: tags and groups.

use quick_xml::events::{BytesStart, Event};
use quick_xml::writer::Writer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atom::{self, ATOM_NS};
use crate::client::{expect_status, ApiClient};
use crate::config::Format;
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpResponse};
use crate::request::Auth;
use crate::xml::{emit, XmlError};

/// Separator the API expects between tag names in one `tag=` parameter.
pub const TAG_SEPARATOR: &str = " || ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    /// 0 for manual tags, 1 for automatic ones.
    pub tag_type: u8,
    pub num_items: Option<u64>,
}

/// Settings for a new group. Field names follow the admin XML attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    pub owner: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
    pub library_editing: String,
    pub library_reading: String,
    pub file_editing: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub has_image: bool,
}

impl GroupSpec {
    /// A private group owned by `owner` with member-level permissions.
    pub fn private(owner: u64, name: &str) -> Self {
        Self {
            owner,
            name: name.to_string(),
            group_type: "Private".to_string(),
            library_editing: "members".to_string(),
            library_reading: "members".to_string(),
            file_editing: "members".to_string(),
            description: String::new(),
            url: String::new(),
            has_image: false,
        }
    }

    /// The admin payload: a single empty `<group .../>` element.
    pub fn to_xml(&self) -> std::result::Result<String, XmlError> {
        let owner = self.owner.to_string();
        let start = BytesStart::new("group").with_attributes([
            ("owner", owner.as_str()),
            ("name", self.name.as_str()),
            ("type", self.group_type.as_str()),
            ("libraryEditing", self.library_editing.as_str()),
            ("libraryReading", self.library_reading.as_str()),
            ("fileEditing", self.file_editing.as_str()),
            ("description", self.description.as_str()),
            ("url", self.url.as_str()),
            ("hasImage", if self.has_image { "1" } else { "0" }),
        ]);
        let mut writer = Writer::new(Vec::new());
        emit(&mut writer, Event::Empty(start))?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }
}

impl ApiClient {
    /// All tags in the library, in the configured dialect's format.
    pub fn tags(&self) -> Result<Vec<Tag>> {
        let format = self.config().dialect.default_format;
        let request = self
            .request(HttpMethod::Get, &self.library_path("tags"))
            .format(format)
            .build();
        let response = expect_status(self.send(&request)?, &[200])?;
        match format {
            Format::Atom => tags_from_atom(&response),
            _ => tags_from_json(&response),
        }
    }

    /// Delete tags by name under a library version.
    pub fn delete_tags(&self, tags: &[&str], library_version: u64) -> Result<HttpResponse> {
        let request = self
            .request(HttpMethod::Delete, &self.library_path("tags"))
            .query("tag", tags.join(TAG_SEPARATOR))
            .if_unmodified_since_version(library_version)
            .build();
        self.send(&request)
    }

    /// Create a group with the configured admin credentials and return its id.
    pub fn create_group(&self, spec: &GroupSpec) -> Result<u64> {
        let request = self
            .request(HttpMethod::Post, "groups")
            .auth(self.admin_auth()?)
            .header("Content-Type", "text/xml")
            .body(spec.to_xml()?)
            .build();
        let response = expect_status(self.send(&request)?, &[201])?;
        let doc = response.xml()?;
        let id = atom::select_text(&doc, "//zapi:groupID")?
            .ok_or_else(|| ApiError::malformed(&response, "atom", "no zapi:groupID in response"))?;
        let id = id
            .trim()
            .parse()
            .map_err(|_| ApiError::malformed(&response, "atom", format!("group id {id:?} is not an integer")))?;
        tracing::debug!(group = id, name = %spec.name, "group created");
        Ok(id)
    }

    pub fn delete_group(&self, id: u64) -> Result<()> {
        let request = self
            .request(HttpMethod::Delete, &format!("groups/{id}"))
            .auth(self.admin_auth()?)
            .build();
        expect_status(self.send(&request)?, &[204])?;
        Ok(())
    }

    fn admin_auth(&self) -> Result<Auth> {
        let credentials = self
            .config()
            .credentials
            .as_ref()
            .ok_or_else(|| ApiError::Config("group administration needs username/password credentials".to_string()))?;
        Ok(Auth::Basic {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        })
    }
}

fn tags_from_json(response: &HttpResponse) -> Result<Vec<Tag>> {
    let Value::Array(items) = response.json()? else {
        return Err(ApiError::malformed(response, "json", "expected an array of tags"));
    };
    items
        .iter()
        .map(|item| {
            let name = item
                .get("tag")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::malformed(response, "json", format!("tag entry without name: {item}")))?;
            let meta = item.get("meta");
            let tag_type = match meta.and_then(|m| m.get("type")).or_else(|| item.get("type")) {
                None => 0,
                Some(t) => t
                    .as_u64()
                    .and_then(|t| u8::try_from(t).ok())
                    .ok_or_else(|| ApiError::malformed(response, "json", format!("invalid tag type {t} for {name:?}")))?,
            };
            Ok(Tag {
                name: name.to_string(),
                tag_type,
                num_items: meta.and_then(|m| m.get("numItems")).and_then(Value::as_u64),
            })
        })
        .collect()
}

fn tags_from_atom(response: &HttpResponse) -> Result<Vec<Tag>> {
    let doc = response.xml()?;
    let tags = doc
        .root()
        .child_elements()
        .filter(|e| e.is(Some(ATOM_NS), "entry"))
        .map(|entry| Tag {
            name: entry.child(ATOM_NS, "title").map(|t| t.text()).unwrap_or_default(),
            tag_type: 0,
            num_items: entry
                .child(atom::ZAPI_NS, "numItems")
                .and_then(|n| n.text().trim().parse().ok()),
        })
        .collect();
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::testing::CannedTransport;
    use crate::config::ClientConfig;
    use crate::xml::XmlDocument;

    #[test]
    fn group_xml_carries_every_attribute() {
        let mut spec = GroupSpec::private(1, "Test & Co");
        spec.has_image = true;
        let xml = spec.to_xml().unwrap();
        let doc = XmlDocument::parse(&xml).unwrap();
        let group = doc.root();
        assert_eq!(group.name, "group");
        assert_eq!(group.attribute("owner"), Some("1"));
        assert_eq!(group.attribute("name"), Some("Test & Co"));
        assert_eq!(group.attribute("type"), Some("Private"));
        assert_eq!(group.attribute("hasImage"), Some("1"));
        assert!(xml.contains("&amp;"));
    }

    #[test]
    fn create_group_uses_basic_auth_and_reads_id() {
        let transport = CannedTransport::default();
        transport.push(
            201,
            &[("Content-Type", "application/atom+xml")],
            r#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:zapi="http://zotero.org/ns/api"><title>G</title><zapi:groupID>17</zapi:groupID></entry>"#,
        );
        let requests = Arc::clone(&transport.requests);
        let config = ClientConfig::new("http://h/")
            .with_api_key("KEY")
            .with_credentials("root", "pw");
        let client = ApiClient::with_transport(config, transport);

        assert_eq!(client.create_group(&GroupSpec::private(1, "G")).unwrap(), 17);
        let sent = requests.lock().unwrap();
        assert_eq!(sent[0].url, "http://h/groups");
        assert_eq!(sent[0].headers.get("Authorization"), Some("Basic cm9vdDpwdw=="));
        assert!(!sent[0].headers.contains("Zotero-API-Key"));
        assert!(sent[0].body.as_deref().unwrap().starts_with("<group "));
    }

    #[test]
    fn group_admin_without_credentials_is_a_config_error() {
        let client = ApiClient::with_transport(ClientConfig::new("http://h/"), CannedTransport::default());
        assert!(matches!(client.delete_group(3), Err(ApiError::Config(_))));
    }

    #[test]
    fn delete_tags_joins_names() {
        let transport = CannedTransport::default();
        transport.push(204, &[], "");
        let requests = Arc::clone(&transport.requests);
        let client = ApiClient::with_transport(ClientConfig::new("http://h/"), transport);
        client.delete_tags(&["a", "b c"], 4).unwrap();
        let sent = requests.lock().unwrap();
        assert_eq!(sent[0].url, "http://h/users/1/tags?tag=a+%7C%7C+b+c");
        assert_eq!(sent[0].headers.get("If-Unmodified-Since-Version"), Some("4"));
    }

    #[test]
    fn tags_in_both_dialects() {
        let transport = CannedTransport::default();
        transport.push(
            200,
            &[("Content-Type", "application/json")],
            r#"[{"tag":"a","meta":{"type":0,"numItems":2}},{"tag":"b","meta":{"type":1,"numItems":1}}]"#,
        );
        let client = ApiClient::with_transport(ClientConfig::new("http://h/"), transport);
        let tags = client.tags().unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].tag_type, 1);
        assert_eq!(tags[0].num_items, Some(2));

        let transport = CannedTransport::default();
        transport.push(
            200,
            &[("Content-Type", "application/atom+xml")],
            r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:zapi="http://zotero.org/ns/api"><entry><title>a</title><zapi:numItems>2</zapi:numItems></entry></feed>"#,
        );
        let client = ApiClient::with_transport(ClientConfig::new("http://h/").with_api_version(2), transport);
        let tags = client.tags().unwrap();
        assert_eq!(tags[0].name, "a");
        assert_eq!(tags[0].num_items, Some(2));
    }

    #[test]
    fn out_of_range_tag_type_is_malformed() {
        let transport = CannedTransport::default();
        transport.push(200, &[("Content-Type", "application/json")], r#"[{"tag":"a","meta":{"type":256}}]"#);
        let client = ApiClient::with_transport(ClientConfig::new("http://h/"), transport);
        assert!(matches!(client.tags(), Err(ApiError::MalformedBody { .. })));
    }
}
