//! Response bodies: JSON objects, Atom entries and feeds, key lists and
//! version maps.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use serde_json::{json, Map, Value};

use crate::store::{GroupInfo, LibraryId, ObjectKind, StoredObject, TagSummary};

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const ZAPI_NS: &str = "http://zotero.org/ns/api";
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Canonical (non-API) base used for `<id>` and alternate links.
pub const WEB_BASE: &str = "http://zotero.org";

pub fn object_json(library: LibraryId, kind: ObjectKind, object: &StoredObject, base: &str) -> Value {
    let path = format!("{}/{}/{}", library.prefix(), kind.plural(), object.key);
    let meta = match kind {
        ObjectKind::Item => json!({"numChildren": 0}),
        ObjectKind::Collection => json!({"numCollections": 0, "numItems": 0}),
        ObjectKind::Search => json!({}),
    };
    json!({
        "key": object.key,
        "version": object.version,
        "library": {"type": library.kind(), "id": library.id()},
        "links": {
            "self": {"href": format!("{base}/{path}"), "type": "application/json"},
            "alternate": {"href": format!("{WEB_BASE}/{path}"), "type": "text/html"},
        },
        "meta": meta,
        "data": Value::Object(object.full_data()),
    })
}

/// Newline-terminated keys; an empty list is an empty body.
pub fn keys_text<'a>(keys: impl IntoIterator<Item = &'a str>) -> String {
    keys.into_iter().map(|k| format!("{k}\n")).collect()
}

pub fn versions_json<'a>(objects: impl IntoIterator<Item = &'a StoredObject>) -> Value {
    let map: Map<String, Value> = objects
        .into_iter()
        .map(|o| (o.key.clone(), Value::from(o.version)))
        .collect();
    Value::Object(map)
}

pub fn tags_json(library: LibraryId, tags: &[TagSummary], base: &str) -> Value {
    Value::Array(
        tags.iter()
            .map(|t| {
                json!({
                    "tag": t.name,
                    "links": {
                        "self": {"href": format!("{base}/{}/tags/{}", library.prefix(), t.name), "type": "application/json"},
                    },
                    "meta": {"type": t.tag_type, "numItems": t.num_items},
                })
            })
            .collect(),
    )
}

/// How much of each object to put in `<content>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomContent {
    Json,
    Html,
}

/// Thin wrapper keeping writer failures as text.
struct AtomWriter {
    writer: Writer<Vec<u8>>,
}

impl AtomWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), String> {
        self.writer.write_event(event).map_err(|e| e.to_string())
    }

    fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), String> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.event(Event::Start(start))
    }

    fn end(&mut self, name: &str) -> Result<(), String> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), String> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.event(Event::Empty(start))
    }

    fn text_element(&mut self, name: &str, attributes: &[(&str, &str)], text: &str) -> Result<(), String> {
        self.start(name, attributes)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.writer.into_inner()).into_owned()
    }
}

const ROOT_NAMESPACES: [(&str, &str); 2] = [("xmlns", ATOM_NS), ("xmlns:zapi", ZAPI_NS)];

fn write_entry(
    w: &mut AtomWriter,
    library: LibraryId,
    kind: ObjectKind,
    object: &StoredObject,
    content: AtomContent,
    base: &str,
    root: bool,
) -> Result<(), String> {
    let path = format!("{}/{}/{}", library.prefix(), kind.plural(), object.key);
    let namespaces: &[(&str, &str)] = if root { &ROOT_NAMESPACES } else { &[] };
    w.start("entry", namespaces)?;
    w.text_element("title", &[], object.title())?;
    w.text_element("id", &[], &format!("{WEB_BASE}/{path}"))?;
    w.empty(
        "link",
        &[("rel", "self"), ("type", "application/atom+xml"), ("href", format!("{base}/{path}").as_str())],
    )?;
    w.text_element("zapi:key", &[], &object.key)?;
    w.text_element("zapi:version", &[], &object.version.to_string())?;
    match kind {
        ObjectKind::Item => {
            let item_type = object.data.get("itemType").and_then(Value::as_str).unwrap_or("");
            w.text_element("zapi:itemType", &[], item_type)?;
            w.text_element("zapi:numChildren", &[], "0")?;
        }
        ObjectKind::Collection => {
            w.text_element("zapi:numCollections", &[], "0")?;
            w.text_element("zapi:numItems", &[], "0")?;
        }
        ObjectKind::Search => {}
    }
    match content {
        AtomContent::Json => {
            let json = Value::Object(object.full_data()).to_string();
            w.text_element("content", &[("type", "application/json")], &json)?;
        }
        AtomContent::Html => {
            w.start("content", &[("type", "xhtml")])?;
            w.start("div", &[("xmlns", XHTML_NS)])?;
            w.start("table", &[])?;
            w.start("tr", &[("class", "title")])?;
            w.text_element("th", &[], "Title")?;
            w.text_element("td", &[], object.title())?;
            w.end("tr")?;
            w.end("table")?;
            w.end("div")?;
            w.end("content")?;
        }
    }
    w.end("entry")
}

pub fn atom_entry(
    library: LibraryId,
    kind: ObjectKind,
    object: &StoredObject,
    content: AtomContent,
    base: &str,
) -> Result<String, String> {
    let mut w = AtomWriter::new();
    write_entry(&mut w, library, kind, object, content, base, true)?;
    Ok(w.finish())
}

/// Feed header shared by object and tag feeds.
fn write_feed_start(
    w: &mut AtomWriter,
    library: LibraryId,
    segment: &str,
    total: usize,
    api_version: u32,
    base: &str,
) -> Result<(), String> {
    w.start("feed", &ROOT_NAMESPACES)?;
    w.text_element("title", &[], &format!("{} / {segment}", library.prefix()))?;
    w.text_element("id", &[], &format!("{WEB_BASE}/{}/{segment}", library.prefix()))?;
    w.empty(
        "link",
        &[
            ("rel", "self"),
            ("type", "application/atom+xml"),
            ("href", format!("{base}/{}/{segment}", library.prefix()).as_str()),
        ],
    )?;
    w.text_element("zapi:totalResults", &[], &total.to_string())?;
    w.text_element("zapi:apiVersion", &[], &api_version.to_string())
}

pub fn atom_feed(
    library: LibraryId,
    kind: ObjectKind,
    objects: &[&StoredObject],
    total: usize,
    content: AtomContent,
    api_version: u32,
    base: &str,
) -> Result<String, String> {
    let mut w = AtomWriter::new();
    write_feed_start(&mut w, library, kind.plural(), total, api_version, base)?;
    for object in objects {
        write_entry(&mut w, library, kind, object, content, base, false)?;
    }
    w.end("feed")?;
    Ok(w.finish())
}

pub fn tags_feed(library: LibraryId, tags: &[TagSummary], api_version: u32, base: &str) -> Result<String, String> {
    let mut w = AtomWriter::new();
    write_feed_start(&mut w, library, "tags", tags.len(), api_version, base)?;
    for tag in tags {
        w.start("entry", &[])?;
        w.text_element("title", &[], &tag.name)?;
        w.text_element("id", &[], &format!("{WEB_BASE}/{}/tags/{}", library.prefix(), tag.name))?;
        w.text_element("zapi:numItems", &[], &tag.num_items.to_string())?;
        w.end("entry")?;
    }
    w.end("feed")?;
    Ok(w.finish())
}

pub fn group_entry(group: &GroupInfo) -> Result<String, String> {
    let mut data = Map::new();
    data.insert("id".to_string(), Value::from(group.id));
    data.insert("owner".to_string(), Value::from(group.owner));
    data.insert("name".to_string(), Value::String(group.name.clone()));
    for (name, value) in &group.attributes {
        data.insert(name.clone(), Value::String(value.clone()));
    }

    let mut w = AtomWriter::new();
    w.start("entry", &ROOT_NAMESPACES)?;
    w.text_element("title", &[], &group.name)?;
    w.text_element("id", &[], &format!("{WEB_BASE}/groups/{}", group.id))?;
    w.text_element("zapi:groupID", &[], &group.id.to_string())?;
    w.text_element("zapi:numItems", &[], "0")?;
    w.text_element("content", &[("type", "application/json")], &Value::Object(data).to_string())?;
    w.end("entry")?;
    Ok(w.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> StoredObject {
        let Value::Object(data) = json!({"itemType": "book", "title": "A < B"}) else {
            unreachable!()
        };
        StoredObject {
            key: "AAAA2222".to_string(),
            version: 3,
            data,
        }
    }

    #[test]
    fn object_json_has_data_envelope() {
        let value = object_json(LibraryId::User(1), ObjectKind::Item, &object(), "http://h");
        assert_eq!(value["key"], "AAAA2222");
        assert_eq!(value["library"]["type"], "user");
        assert_eq!(value["data"]["version"], 3);
        assert_eq!(value["data"]["title"], "A < B");
        assert_eq!(value["links"]["self"]["href"], "http://h/users/1/items/AAAA2222");
    }

    #[test]
    fn entry_escapes_text_and_embeds_json() {
        let xml = atom_entry(LibraryId::User(1), ObjectKind::Item, &object(), AtomContent::Json, "http://h").unwrap();
        assert!(xml.starts_with(r#"<entry xmlns="http://www.w3.org/2005/Atom""#));
        assert!(xml.contains("<title>A &lt; B</title>"));
        assert!(xml.contains("<zapi:version>3</zapi:version>"));
        assert!(xml.contains(r#"<content type="application/json">"#));
    }

    #[test]
    fn feed_counts_and_declares_namespaces_once() {
        let o = object();
        let xml = atom_feed(LibraryId::Group(2), ObjectKind::Item, &[&o, &o], 5, AtomContent::Html, 2, "http://h").unwrap();
        assert!(xml.contains("<zapi:totalResults>5</zapi:totalResults>"));
        assert_eq!(xml.matches("xmlns:zapi").count(), 1);
        assert_eq!(xml.matches("<entry>").count(), 2);
    }

    #[test]
    fn key_list_and_versions() {
        assert_eq!(keys_text(Vec::<&str>::new()), "");
        assert_eq!(keys_text(["A", "B"]), "A\nB\n");
        let o = object();
        assert_eq!(versions_json([&o]), json!({"AAAA2222": 3}));
    }
}
