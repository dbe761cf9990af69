//! Owned, namespace-resolved XML tree.
//!
//! Documents are read with `quick_xml::NsReader`, so each element records the
//! namespace URI its prefix resolved to at parse time. Queries match on
//! `(namespace, local name)` and never on the literal prefix. Elements keep
//! their qualified name and `xmlns` attributes so `inner_xml` can write
//! nested markup back out unchanged.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use quick_xml::writer::Writer;

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),
    #[error("XML write error: {0}")]
    Write(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `zapi:key`.
    pub name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    /// Attributes by qualified name, in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    fn new(start: &BytesStart<'_>, namespace: Option<String>) -> Result<Self, XmlError> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
            let value = attr.unescape_value().map_err(|e| XmlError::Parse(e.to_string()))?;
            attributes.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            namespace,
            attributes,
            children: Vec::new(),
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == namespace
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given namespace and local name.
    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(Some(namespace), local_name))
    }

    pub fn has_element_children(&self) -> bool {
        self.child_elements().next().is_some()
    }

    /// Concatenated text of all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(t) => out.push_str(t),
                XmlNode::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Serialized markup of this element's children.
    pub fn inner_xml(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        for child in &self.children {
            write_node(&mut writer, child)?;
        }
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    /// Serialized markup of this element including its own tags.
    pub fn outer_xml(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    /// Pre-order walk over descendant elements, excluding `self`.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect_descendants(&mut out);
        out
    }

    fn collect_descendants<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            out.push(child);
            child.collect_descendants(out);
        }
    }
}

/// Write one event, keeping the writer's error as text.
pub(crate) fn emit<'a>(writer: &mut Writer<Vec<u8>>, event: Event<'a>) -> Result<(), XmlError> {
    writer.write_event(event).map_err(|e| XmlError::Write(e.to_string()))
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &XmlNode) -> Result<(), XmlError> {
    match node {
        XmlNode::Text(t) => emit(writer, Event::Text(BytesText::new(t))),
        XmlNode::Element(e) => write_element(writer, e),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), XmlError> {
    let start = BytesStart::new(element.name.as_str())
        .with_attributes(element.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if element.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }
    emit(writer, Event::Start(start))?;
    for child in &element.children {
        write_node(writer, child)?;
    }
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

/// A parsed document. Always has a root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: Element,
}

impl XmlDocument {
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let mut reader = NsReader::from_str(text);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let (resolved, event) = reader
                .read_resolved_event()
                .map_err(|e| XmlError::Parse(e.to_string()))?;
            let namespace = match resolved {
                ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
                ResolveResult::Unbound => None,
                ResolveResult::Unknown(prefix) => {
                    return Err(XmlError::Parse(format!(
                        "unbound namespace prefix {:?}",
                        String::from_utf8_lossy(&prefix)
                    )))
                }
            };
            match event {
                Event::Start(start) => stack.push(Element::new(&start, namespace)?),
                Event::Empty(start) => {
                    let element = Element::new(&start, namespace)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| XmlError::Parse("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| XmlError::Parse(e.to_string()))?;
                    push_text(&mut stack, &text);
                }
                Event::CData(data) => {
                    let data = data.into_inner();
                    push_text(&mut stack, &String::from_utf8_lossy(&data));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Parse(format!("unclosed element <{}>", open.name)));
        }
        root.map(|root| Self { root })
            .ok_or_else(|| XmlError::Parse("document has no root element".to_string()))
    }

    pub fn root(&self) -> &Element {
        &self.root
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(XmlError::Parse("multiple root elements".to_string())),
    }
    Ok(())
}

/// Text outside the root element is ignored; adjacent runs are merged.
fn push_text(stack: &mut [Element], text: &str) {
    let Some(parent) = stack.last_mut() else {
        return;
    };
    if let Some(XmlNode::Text(last)) = parent.children.last_mut() {
        last.push_str(text);
    } else {
        parent.children.push(XmlNode::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = "http://www.w3.org/2005/Atom";
    const ZAPI: &str = "http://zotero.org/ns/api";

    #[test]
    fn elements_record_resolved_namespaces() {
        let doc = XmlDocument::parse(
            r#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:zapi="http://zotero.org/ns/api"><zapi:key>ABCD2345</zapi:key></entry>"#,
        )
        .unwrap();
        let root = doc.root();
        assert!(root.is(Some(ATOM), "entry"));
        let key = root.child(ZAPI, "key").unwrap();
        assert_eq!(key.name, "zapi:key");
        assert_eq!(key.text(), "ABCD2345");
    }

    #[test]
    fn entities_and_cdata_are_decoded() {
        let doc = XmlDocument::parse("<a>x &amp; y<![CDATA[ <z> ]]></a>").unwrap();
        assert_eq!(doc.root().text(), "x & y <z> ");
    }

    #[test]
    fn inner_xml_round_trips_nested_markup() {
        let doc = XmlDocument::parse(
            r#"<content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><table><tr class="a"><td>1 &lt; 2</td></tr></table><br/></div></content>"#,
        )
        .unwrap();
        assert_eq!(
            doc.root().inner_xml().unwrap(),
            r#"<div xmlns="http://www.w3.org/1999/xhtml"><table><tr class="a"><td>1 &lt; 2</td></tr></table><br/></div>"#
        );
    }

    #[test]
    fn empty_input_has_no_root() {
        assert!(matches!(XmlDocument::parse(""), Err(XmlError::Parse(_))));
        assert!(matches!(XmlDocument::parse("   "), Err(XmlError::Parse(_))));
    }

    #[test]
    fn unclosed_and_unbalanced_documents_fail() {
        assert!(XmlDocument::parse("<a><b></b>").is_err());
        assert!(XmlDocument::parse("<a></a><b/>").is_err());
    }

    #[test]
    fn unknown_prefix_fails() {
        assert!(XmlDocument::parse("<x:a/>").is_err());
    }

    #[test]
    fn descendants_are_in_document_order() {
        let doc = XmlDocument::parse("<r><a><b/></a><c/></r>").unwrap();
        let names: Vec<&str> = doc.root().descendants().iter().map(|e| e.local_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
