//! A small, lossless XML tree.
//!
//! Text and attribute values are kept exactly as they appear in the source
//! (still escaped), so nodes that are never touched serialize back to the
//! same bytes. Only attribute spacing and quoting are normalized.

use crate::error::{DocmergeError, Result};
use quick_xml::Reader;
use quick_xml::escape::{escape, partial_escape, unescape};
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Raw (escaped) character data
    Text(String),
    CData(String),
    Comment(String),
    /// `<?xml ...?>`
    Declaration(String),
    ProcessingInstruction(String),
    DocType(String),
}

impl Node {
    /// A text node holding `value`, escaped for output
    #[must_use]
    pub fn text(value: &str) -> Self {
        Self::Text(partial_escape(value).into_owned())
    }

    #[must_use]
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// Raw (escaped) value
    pub raw_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name, e.g. `w:fldSimple`
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: true,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// Unescaped attribute value
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| unescape_lossy(&attr.raw_value).into_owned())
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        let raw_value = escape(value).into_owned();
        match self.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(attr) => attr.raw_value = raw_value,
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                raw_value,
            }),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(name))
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children
            .iter_mut()
            .filter_map(Node::as_element_mut)
            .find(|e| e.is(name))
    }

    /// All descendant elements in document order
    #[must_use]
    pub fn descendants(&self) -> Vec<&Element> {
        let mut found = Vec::new();
        collect_descendants(&self.children, &mut found);
        found
    }

    /// Concatenated, unescaped text of every descendant text node
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        collect_text(&self.children, &mut text);
        text
    }
}

fn collect_descendants<'a>(nodes: &'a [Node], found: &mut Vec<&'a Element>) {
    for element in nodes.iter().filter_map(Node::as_element) {
        found.push(element);
        collect_descendants(&element.children, found);
    }
}

fn collect_text(nodes: &[Node], text: &mut String) {
    for node in nodes {
        match node {
            Node::Text(raw) => text.push_str(&unescape_lossy(raw)),
            Node::CData(raw) => text.push_str(raw),
            Node::Element(element) => collect_text(&element.children, text),
            _ => {}
        }
    }
}

fn unescape_lossy(raw: &str) -> Cow<'_, str> {
    unescape(raw).unwrap_or(Cow::Borrowed(raw))
}

/// Node lookup by child-index path
#[must_use]
pub fn node_at<'a>(nodes: &'a [Node], path: &[usize]) -> Option<&'a Node> {
    let (first, rest) = path.split_first()?;
    let node = nodes.get(*first)?;
    if rest.is_empty() {
        Some(node)
    } else {
        node_at(&node.as_element()?.children, rest)
    }
}

pub fn node_at_mut<'a>(nodes: &'a mut [Node], path: &[usize]) -> Option<&'a mut Node> {
    let (first, rest) = path.split_first()?;
    let node = nodes.get_mut(*first)?;
    if rest.is_empty() {
        Some(node)
    } else {
        node_at_mut(&mut node.as_element_mut()?.children, rest)
    }
}

/// The child list addressed by `path`; the empty path is `nodes` itself.
pub fn children_at_mut<'a>(nodes: &'a mut Vec<Node>, path: &[usize]) -> Option<&'a mut Vec<Node>> {
    if path.is_empty() {
        return Some(nodes);
    }
    node_at_mut(nodes, path)?
        .as_element_mut()
        .map(|element| &mut element.children)
}

/// A parsed XML document: the root element plus any prolog nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
}

impl Document {
    /// Parses `content`; `part` names the source in errors.
    ///
    /// # Errors
    ///
    /// Returns `DocmergeError::Xml` if the content is not well-formed.
    pub fn parse(part: &str, content: &str) -> Result<Self> {
        let xml_error = |message: String| DocmergeError::Xml {
            part: part.to_string(),
            message,
        };

        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;

        let mut nodes = Vec::new();
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let node = match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let mut element = element_from(&e).map_err(xml_error)?;
                    element.self_closing = false;
                    stack.push(element);
                    continue;
                }
                Ok(Event::End(_)) => match stack.pop() {
                    Some(element) => Node::Element(element),
                    None => return Err(xml_error("unexpected closing tag".to_string())),
                },
                Ok(Event::Empty(e)) => Node::Element(element_from(&e).map_err(xml_error)?),
                Ok(Event::Text(e)) => Node::Text(lossy(&e)),
                Ok(Event::CData(e)) => Node::CData(lossy(&e)),
                Ok(Event::Comment(e)) => Node::Comment(lossy(&e)),
                Ok(Event::Decl(e)) => Node::Declaration(lossy(&e)),
                Ok(Event::PI(e)) => Node::ProcessingInstruction(lossy(&e)),
                Ok(Event::DocType(e)) => Node::DocType(lossy(&e)),
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(xml_error(format!(
                        "{e} at byte {}",
                        reader.error_position()
                    )));
                }
            };

            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => nodes.push(node),
            }
        }

        if let Some(unclosed) = stack.last() {
            return Err(xml_error(format!("unclosed element <{}>", unclosed.name)));
        }

        Ok(Self { nodes })
    }

    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        write_nodes(&mut out, &self.nodes);
        out
    }

    /// The first element at the top level
    #[must_use]
    pub fn root(&self) -> Option<&Element> {
        self.nodes.iter().find_map(Node::as_element)
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn element_from(start: &BytesStart<'_>) -> std::result::Result<Element, String> {
    let mut element = Element::new(lossy(start.name().as_ref()));
    for attr in start.attributes().with_checks(false) {
        let attr = attr.map_err(|e| e.to_string())?;
        element.attributes.push(Attribute {
            name: lossy(attr.key.as_ref()),
            raw_value: lossy(&attr.value),
        });
    }
    Ok(element)
}

/// Serializes a list of nodes
#[must_use]
pub fn to_string(nodes: &[Node]) -> String {
    let mut out = String::new();
    write_nodes(&mut out, nodes);
    out
}

fn write_nodes(out: &mut String, nodes: &[Node]) {
    for node in nodes {
        match node {
            Node::Element(element) => write_element(out, element),
            Node::Text(raw) => out.push_str(raw),
            Node::CData(raw) => {
                out.push_str("<![CDATA[");
                out.push_str(raw);
                out.push_str("]]>");
            }
            Node::Comment(raw) => {
                out.push_str("<!--");
                out.push_str(raw);
                out.push_str("-->");
            }
            Node::Declaration(raw) | Node::ProcessingInstruction(raw) => {
                out.push_str("<?");
                out.push_str(raw);
                out.push_str("?>");
            }
            Node::DocType(raw) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(raw.trim_start());
                out.push('>');
            }
        }
    }
}

fn write_element(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.name);
    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(&attr.raw_value.replace('"', "&quot;"));
        out.push('"');
    }
    if element.children.is_empty() && element.self_closing {
        out.push_str("/>");
        return;
    }
    out.push('>');
    write_nodes(out, &element.children);
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}
