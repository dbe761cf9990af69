//! Namespace-bound queries over Atom documents.
//!
//! Every query resolves prefixes against the same fixed table (`atom`,
//! `zapi`, `zxfer`); there is deliberately no way to query with an unbound
//! prefix. The supported expression language is a small XPath subset:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `/a:b` | child step from the document (absolute) |
//! | `//a:b` | descendant step |
//! | `a:b` | child step relative to the context element |
//! | `*` | any element |
//! | `text()` | text children (last step only) |
//! | `@name` | attribute value (last step only) |
//! | `[n]` | 1-based position among the step's matches under each parent |
//! | `[@name]`, `[@name='v']` | attribute presence / equality |
//! | `[a:b='v']` | child element text equality |
//!
//! Results are in document order and are not de-duplicated.

use crate::error::{ApiError, Result};
use crate::xml::{Element, XmlDocument, XmlError, XmlNode};

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const ZAPI_NS: &str = "http://zotero.org/ns/api";
pub const ZXFER_NS: &str = "http://zotero.org/ns/transfer";

/// Prefixes available inside query expressions.
pub const NAMESPACES: [(&str, &str); 3] = [("atom", ATOM_NS), ("zapi", ZAPI_NS), ("zxfer", ZXFER_NS)];

fn resolve_prefix(prefix: &str) -> Option<&'static str> {
    NAMESPACES.iter().find(|(p, _)| *p == prefix).map(|(_, uri)| *uri)
}

/// A node matched by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected<'a> {
    Element(&'a Element),
    Text(&'a str),
    Attribute(&'a str),
}

impl<'a> Selected<'a> {
    /// String value: descendant text for elements, the value otherwise.
    pub fn text(&self) -> String {
        match self {
            Selected::Element(e) => e.text(),
            Selected::Text(t) | Selected::Attribute(t) => t.to_string(),
        }
    }

    pub fn as_element(&self) -> Option<&'a Element> {
        match self {
            Selected::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Serialized child markup for elements; the plain value otherwise.
    pub fn inner_xml(&self) -> std::result::Result<String, XmlError> {
        match self {
            Selected::Element(e) => e.inner_xml(),
            Selected::Text(t) | Selected::Attribute(t) => Ok(t.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Element { namespace: Option<&'static str>, local: String },
    AnyElement,
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    HasAttribute(String),
    AttributeEquals(String, String),
    ChildEquals {
        namespace: Option<&'static str>,
        local: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A compiled query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    expression: String,
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Clone, Copy)]
enum Context<'a> {
    Document(&'a Element),
    Element(&'a Element),
}

impl<'a> Context<'a> {
    /// Nodes whose element children a step of `axis` looks at. A descendant
    /// step is a child step taken from every node in the subtree, so
    /// positional predicates count within each parent.
    fn parents(self, axis: Axis) -> Vec<Context<'a>> {
        match (self, axis) {
            (ctx, Axis::Child) => vec![ctx],
            (Context::Document(root), Axis::Descendant) => {
                let mut all = vec![Context::Document(root), Context::Element(root)];
                all.extend(root.descendants().into_iter().map(Context::Element));
                all
            }
            (Context::Element(e), Axis::Descendant) => {
                let mut all = vec![Context::Element(e)];
                all.extend(e.descendants().into_iter().map(Context::Element));
                all
            }
        }
    }

    fn children(self) -> Vec<&'a Element> {
        match self {
            Context::Document(root) => vec![root],
            Context::Element(e) => e.child_elements().collect(),
        }
    }

    fn element(self) -> Option<&'a Element> {
        match self {
            Context::Document(_) => None,
            Context::Element(e) => Some(e),
        }
    }

    /// Every element of the subtree in document order.
    fn subtree(self) -> Vec<&'a Element> {
        let root = match self {
            Context::Document(e) | Context::Element(e) => e,
        };
        let mut all = vec![root];
        all.extend(root.descendants());
        all
    }
}

impl Query {
    pub fn parse(expression: &str) -> Result<Self> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Err(ApiError::invalid_query(expression, "empty expression"));
        }
        let absolute = expr.starts_with('/');
        let mut segments = split_outside(expr, '/', expression)?.into_iter();
        if absolute {
            segments.next();
        }

        let mut steps = Vec::new();
        let mut axis = Axis::Child;
        let mut pending_empty = false;
        for segment in segments {
            if segment.is_empty() {
                if pending_empty {
                    return Err(ApiError::invalid_query(expression, "too many '/' in a row"));
                }
                pending_empty = true;
                axis = Axis::Descendant;
                continue;
            }
            if let Some(prev) = steps.last() {
                if is_terminal(prev) {
                    return Err(ApiError::invalid_query(expression, "text() and @attr must be the last step"));
                }
            }
            steps.push(parse_step(segment, axis, expression)?);
            axis = Axis::Child;
            pending_empty = false;
        }
        if pending_empty || steps.is_empty() {
            return Err(ApiError::invalid_query(expression, "expression ends with '/'"));
        }
        Ok(Self {
            expression: expression.to_string(),
            absolute,
            steps,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluate against a document. Relative expressions start at the
    /// document node, so `atom:feed` matches the root `<feed>`.
    pub fn evaluate<'a>(&self, doc: &'a XmlDocument) -> Vec<Selected<'a>> {
        self.run(Context::Document(doc.root()))
    }

    /// Evaluate with `element` as the context node. Absolute expressions
    /// still need a document, so they are evaluated from `element` treated as
    /// the document root.
    pub fn evaluate_from<'a>(&self, element: &'a Element) -> Vec<Selected<'a>> {
        if self.absolute {
            self.run(Context::Document(element))
        } else {
            self.run(Context::Element(element))
        }
    }

    fn run<'a>(&self, start: Context<'a>) -> Vec<Selected<'a>> {
        let mut contexts = vec![start];
        let (last, init) = match self.steps.split_last() {
            Some(split) => split,
            None => return Vec::new(),
        };
        for step in init {
            contexts = contexts
                .into_iter()
                .flat_map(|ctx| matching_elements(ctx, step))
                .map(Context::Element)
                .collect();
        }
        let mut out = Vec::new();
        for ctx in contexts {
            match &last.test {
                NodeTest::Text => {
                    for owner in ctx.parents(last.axis).into_iter().filter_map(Context::element) {
                        let texts: Vec<&str> = owner
                            .children
                            .iter()
                            .filter_map(|c| match c {
                                XmlNode::Text(t) => Some(t.as_str()),
                                XmlNode::Element(_) => None,
                            })
                            .collect();
                        out.extend(apply_positions(texts, &last.predicates).into_iter().map(Selected::Text));
                    }
                }
                NodeTest::Attribute(name) => {
                    for owner in ctx.parents(last.axis).into_iter().filter_map(Context::element) {
                        let values: Vec<&str> = owner.attribute(name).into_iter().collect();
                        out.extend(apply_positions(values, &last.predicates).into_iter().map(Selected::Attribute));
                    }
                }
                _ => out.extend(matching_elements(ctx, last).into_iter().map(Selected::Element)),
            }
        }
        out
    }
}

fn is_terminal(step: &Step) -> bool {
    matches!(step.test, NodeTest::Text | NodeTest::Attribute(_))
}

fn matching_elements<'a>(ctx: Context<'a>, step: &Step) -> Vec<&'a Element> {
    let matched: Vec<&'a Element> = ctx
        .parents(step.axis)
        .into_iter()
        .flat_map(|parent| filter_step(parent.children(), step))
        .collect();
    if step.axis == Axis::Child {
        return matched;
    }
    // Per-parent groups come out parent-first; restore document order.
    ctx.subtree()
        .into_iter()
        .filter(|e| matched.iter().any(|m| std::ptr::eq(*m, *e)))
        .collect()
}

/// Apply the node test and predicates to one parent's children.
fn filter_step<'a>(children: Vec<&'a Element>, step: &Step) -> Vec<&'a Element> {
    let mut matched: Vec<&'a Element> = children
        .into_iter()
        .filter(|e| match &step.test {
            NodeTest::Element { namespace, local } => e.is(*namespace, local),
            NodeTest::AnyElement => true,
            NodeTest::Text | NodeTest::Attribute(_) => false,
        })
        .collect();
    for predicate in &step.predicates {
        matched = match predicate {
            Predicate::Position(n) => matched.get(n - 1).copied().into_iter().collect(),
            Predicate::HasAttribute(name) => matched.into_iter().filter(|e| e.attribute(name).is_some()).collect(),
            Predicate::AttributeEquals(name, value) => matched
                .into_iter()
                .filter(|e| e.attribute(name) == Some(value.as_str()))
                .collect(),
            Predicate::ChildEquals { namespace, local, value } => matched
                .into_iter()
                .filter(|e| e.child_elements().any(|c| c.is(*namespace, local) && c.text() == *value))
                .collect(),
        };
    }
    matched
}

fn apply_positions<'a>(mut items: Vec<&'a str>, predicates: &[Predicate]) -> Vec<&'a str> {
    for predicate in predicates {
        if let Predicate::Position(n) = predicate {
            items = items.get(n - 1).copied().into_iter().collect();
        }
    }
    items
}

/// Split on `sep` outside of `[...]` and quotes.
fn split_outside<'e>(expr: &'e str, sep: char, original: &str) -> Result<Vec<&'e str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ApiError::invalid_query(original, "unbalanced ']'"))?;
            }
            (None, c) if c == sep && depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(ApiError::invalid_query(original, "unterminated quote or predicate"));
    }
    parts.push(&expr[start..]);
    Ok(parts)
}

fn parse_step(segment: &str, axis: Axis, original: &str) -> Result<Step> {
    let (name, mut rest) = match segment.find('[') {
        Some(i) => (segment[..i].trim(), &segment[i..]),
        None => (segment.trim(), ""),
    };
    let test = match name {
        "text()" => NodeTest::Text,
        "*" => NodeTest::AnyElement,
        n if n.starts_with('@') => NodeTest::Attribute(parse_name(&n[1..], original)?.to_string()),
        n => {
            let (namespace, local) = parse_qname(n, original)?;
            NodeTest::Element { namespace, local }
        }
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let body_end = closing_bracket(rest).ok_or_else(|| ApiError::invalid_query(original, "unbalanced '['"))?;
        let body = rest[1..body_end].trim();
        let predicate = parse_predicate(body, original)?;
        if matches!(test, NodeTest::Text | NodeTest::Attribute(_)) && !matches!(predicate, Predicate::Position(_)) {
            return Err(ApiError::invalid_query(
                original,
                "only positional predicates apply to text() and @attr",
            ));
        }
        predicates.push(predicate);
        rest = rest[body_end + 1..].trim_start();
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(ApiError::invalid_query(original, format!("unexpected {rest:?} after predicate")));
        }
    }
    Ok(Step { axis, test, predicates })
}

/// Index of the `]` that closes the `[` at position 0.
fn closing_bracket(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(body: &str, original: &str) -> Result<Predicate> {
    if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
        let n: usize = body
            .parse()
            .map_err(|_| ApiError::invalid_query(original, "position out of range"))?;
        if n == 0 {
            return Err(ApiError::invalid_query(original, "positions start at 1"));
        }
        return Ok(Predicate::Position(n));
    }
    let (lhs, rhs) = match split_outside(body, '=', original)?.as_slice() {
        [lhs] => (lhs.trim(), None),
        [lhs, rhs] => (lhs.trim(), Some(parse_literal(rhs.trim(), original)?)),
        _ => return Err(ApiError::invalid_query(original, "predicate has more than one '='")),
    };
    match (lhs.strip_prefix('@'), rhs) {
        (Some(attr), None) => Ok(Predicate::HasAttribute(parse_name(attr, original)?.to_string())),
        (Some(attr), Some(value)) => Ok(Predicate::AttributeEquals(parse_name(attr, original)?.to_string(), value)),
        (None, Some(value)) => {
            let (namespace, local) = parse_qname(lhs, original)?;
            Ok(Predicate::ChildEquals { namespace, local, value })
        }
        (None, None) => Err(ApiError::invalid_query(original, format!("unsupported predicate [{body}]"))),
    }
}

fn parse_literal(s: &str, original: &str) -> Result<String> {
    let quoted = |q: char| s.len() >= 2 && s.starts_with(q) && s.ends_with(q);
    if quoted('\'') || quoted('"') {
        Ok(s[1..s.len() - 1].to_string())
    } else {
        Err(ApiError::invalid_query(original, format!("expected a quoted literal, got {s:?}")))
    }
}

fn parse_name<'n>(name: &'n str, original: &str) -> Result<&'n str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if valid {
        Ok(name)
    } else {
        Err(ApiError::invalid_query(original, format!("invalid name {name:?}")))
    }
}

fn parse_qname(name: &str, original: &str) -> Result<(Option<&'static str>, String)> {
    let name = parse_name(name, original)?;
    match name.split_once(':') {
        Some((prefix, local)) => {
            let uri = resolve_prefix(prefix)
                .ok_or_else(|| ApiError::invalid_query(original, format!("unbound prefix {prefix:?}")))?;
            Ok((Some(uri), parse_name(local, original)?.to_string()))
        }
        None => Ok((None, name.to_string())),
    }
}

/// All nodes matching `expression`, in document order.
pub fn select<'a>(doc: &'a XmlDocument, expression: &str) -> Result<Vec<Selected<'a>>> {
    Ok(Query::parse(expression)?.evaluate(doc))
}

/// First match, or `None` when nothing matches.
pub fn select_one<'a>(doc: &'a XmlDocument, expression: &str) -> Result<Option<Selected<'a>>> {
    Ok(select(doc, expression)?.into_iter().next())
}

/// String value of the first match.
pub fn select_text(doc: &XmlDocument, expression: &str) -> Result<Option<String>> {
    Ok(select_one(doc, expression)?.map(|node| node.text()))
}

/// Errors extracting an entry from an Atom element.
#[derive(Debug, thiserror::Error)]
pub enum AtomError {
    #[error("<{0}> is missing")]
    MissingElement(&'static str),
    #[error("invalid version {0:?}")]
    InvalidVersion(String),
    #[error(transparent)]
    Xml(#[from] XmlError),
}

/// Metadata and content of one `<atom:entry>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomEntry {
    pub key: String,
    pub version: Option<u64>,
    /// `type` attribute of `<atom:content>`, e.g. `application/json`.
    pub content_type: Option<String>,
    /// Raw text, or serialized child markup when the content is nested
    /// elements. `None` when the entry has no `<atom:content>`.
    pub content: Option<String>,
}

impl AtomEntry {
    pub fn from_element(entry: &Element) -> std::result::Result<Self, AtomError> {
        let key = entry
            .child(ZAPI_NS, "key")
            .map(|k| k.text().trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(AtomError::MissingElement("zapi:key"))?;
        let version = match entry.child(ZAPI_NS, "version") {
            Some(v) => {
                let text = v.text();
                Some(text.trim().parse().map_err(|_| AtomError::InvalidVersion(text.clone()))?)
            }
            None => None,
        };
        let content_element = entry.child(ATOM_NS, "content");
        let content = match content_element {
            Some(c) if c.has_element_children() => Some(c.inner_xml()?),
            Some(c) => Some(c.text()),
            None => None,
        };
        Ok(Self {
            key,
            version,
            content_type: content_element.and_then(|c| c.attribute("type")).map(str::to_string),
            content,
        })
    }
}

/// Entries of a feed, or the single entry when the root is `<atom:entry>`.
pub fn entries(doc: &XmlDocument) -> std::result::Result<Vec<AtomEntry>, AtomError> {
    let root = doc.root();
    if root.is(Some(ATOM_NS), "entry") {
        return Ok(vec![AtomEntry::from_element(root)?]);
    }
    root.child_elements()
        .filter(|e| e.is(Some(ATOM_NS), "entry"))
        .map(AtomEntry::from_element)
        .collect()
}

/// `zapi:totalResults` of a feed.
pub fn total_results(doc: &XmlDocument) -> Option<u64> {
    doc.root()
        .child(ZAPI_NS, "totalResults")
        .and_then(|e| e.text().trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:zapi="http://zotero.org/ns/api">
  <title>Items</title>
  <zapi:totalResults>2</zapi:totalResults>
  <link rel="self" href="http://h/users/1/items"/>
  <entry>
    <title>First</title>
    <zapi:key>AAAA2222</zapi:key>
    <zapi:version>5</zapi:version>
    <zapi:numChildren>1</zapi:numChildren>
    <content type="application/json">{"title":"First"}</content>
  </entry>
  <entry>
    <title>Second</title>
    <zapi:key>BBBB3333</zapi:key>
    <zapi:version>7</zapi:version>
    <content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Hi</p></div></content>
  </entry>
</feed>"#;

    fn doc() -> XmlDocument {
        XmlDocument::parse(FEED).unwrap()
    }

    #[test]
    fn descendant_text_query() {
        let doc = doc();
        let keys: Vec<String> = select(&doc, "//atom:entry/zapi:key/text()")
            .unwrap()
            .iter()
            .map(Selected::text)
            .collect();
        assert_eq!(keys, vec!["AAAA2222", "BBBB3333"]);
    }

    #[test]
    fn single_select_with_no_match_is_none() {
        let doc = XmlDocument::parse(r#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#).unwrap();
        assert!(select_one(&doc, "//atom:entry/zapi:key/text()").unwrap().is_none());
        assert!(select(&doc, "//atom:entry").unwrap().is_empty());
    }

    #[test]
    fn absolute_and_relative_forms_agree() {
        let doc = doc();
        assert_eq!(select_text(&doc, "/atom:feed/zapi:totalResults").unwrap().as_deref(), Some("2"));
        assert_eq!(select_text(&doc, "atom:feed/zapi:totalResults").unwrap().as_deref(), Some("2"));
        assert_eq!(total_results(&doc), Some(2));
    }

    #[test]
    fn positional_and_equality_predicates() {
        let doc = doc();
        assert_eq!(
            select_text(&doc, "/atom:feed/atom:entry[2]/zapi:key").unwrap().as_deref(),
            Some("BBBB3333")
        );
        assert_eq!(
            select_text(&doc, "//atom:entry[zapi:key='BBBB3333']/zapi:version").unwrap().as_deref(),
            Some("7")
        );
        assert_eq!(
            select_text(&doc, "//atom:link[@rel='self']/@href").unwrap().as_deref(),
            Some("http://h/users/1/items")
        );
        assert_eq!(select(&doc, "//atom:content[@type]").unwrap().len(), 2);
    }

    #[test]
    fn descendant_position_counts_within_each_parent() {
        let doc = XmlDocument::parse("<r><a><b>1</b><b>2</b></a><a><b>3</b><c><b>4</b></c></a></r>").unwrap();
        let texts = |expr: &str| -> Vec<String> { select(&doc, expr).unwrap().iter().map(Selected::text).collect() };
        assert_eq!(texts("//b[1]"), vec!["1", "3", "4"]);
        assert_eq!(texts("//b[2]"), vec!["2"]);
        assert_eq!(texts("/r/a/b[1]"), vec!["1", "3"]);
        assert_eq!(texts("//a[2]//b"), vec!["3", "4"]);
        assert_eq!(texts("//b"), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn wildcard_matches_any_namespace() {
        let doc = doc();
        let first_entry_children = select(&doc, "/atom:feed/atom:entry[1]/*").unwrap();
        assert_eq!(first_entry_children.len(), 5);
    }

    #[test]
    fn inner_markup_differs_from_text() {
        let doc = doc();
        let node = select_one(&doc, "//atom:entry[2]/atom:content").unwrap().unwrap();
        assert_eq!(node.text(), "Hi");
        assert_eq!(
            node.inner_xml().unwrap(),
            r#"<div xmlns="http://www.w3.org/1999/xhtml"><p>Hi</p></div>"#
        );
    }

    #[test]
    fn unbound_prefix_and_bad_syntax_are_rejected() {
        let doc = doc();
        assert!(matches!(select(&doc, "//dc:title"), Err(ApiError::InvalidQuery { .. })));
        assert!(matches!(select(&doc, "//atom:entry["), Err(ApiError::InvalidQuery { .. })));
        assert!(matches!(select(&doc, "//atom:entry/"), Err(ApiError::InvalidQuery { .. })));
        assert!(matches!(select(&doc, "//text()/atom:x"), Err(ApiError::InvalidQuery { .. })));
        assert!(matches!(select(&doc, "//atom:entry[0]"), Err(ApiError::InvalidQuery { .. })));
        assert!(matches!(select(&doc, ""), Err(ApiError::InvalidQuery { .. })));
    }

    #[test]
    fn relative_query_from_element() {
        let doc = doc();
        let entry = select_one(&doc, "//atom:entry").unwrap().unwrap().as_element().unwrap();
        let q = Query::parse("zapi:version").unwrap();
        let got: Vec<String> = q.evaluate_from(entry).iter().map(Selected::text).collect();
        assert_eq!(got, vec!["5"]);
    }

    #[test]
    fn entries_extract_key_version_and_content() {
        let doc = doc();
        let entries = entries(&doc).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "AAAA2222");
        assert_eq!(entries[0].version, Some(5));
        assert_eq!(entries[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(entries[0].content.as_deref(), Some(r#"{"title":"First"}"#));
        assert_eq!(
            entries[1].content.as_deref(),
            Some(r#"<div xmlns="http://www.w3.org/1999/xhtml"><p>Hi</p></div>"#)
        );
    }

    #[test]
    fn entry_without_key_is_an_error() {
        let doc = XmlDocument::parse(r#"<entry xmlns="http://www.w3.org/2005/Atom"><title>x</title></entry>"#).unwrap();
        assert!(matches!(entries(&doc), Err(AtomError::MissingElement("zapi:key"))));
    }
}
