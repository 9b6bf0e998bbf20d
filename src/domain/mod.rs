//! In-memory tree for libvirt domain XML.
//!
//! The document is parsed with `quick-xml` into plain [`Element`] / [`Node`]
//! values so that the passt rewrite works on elements and attributes instead
//! of text. Every node keeps the markup it was read from, so serializing
//! writes untouched elements back byte for byte. Elements whose attributes
//! changed, and elements created here, are written with double quoted
//! attributes.

use std::fmt::Write;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

pub mod interface;

pub use interface::apply;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data as it appeared in the source, entities still escaped.
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    Declaration(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Start tag content as read; dropped once an attribute changes.
    raw_start: Option<String>,
    /// Written as `<name/>` while it has no children, otherwise `<name></name>`.
    self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            raw_start: None,
            self_closing: true,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    fn from_start(start: &BytesStart<'_>, self_closing: bool) -> Result<Self> {
        let mut element = Self::new(utf8(start.name().as_ref())?);
        element.raw_start = Some(utf8(start)?);
        element.self_closing = self_closing;
        for attribute in start.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            let key = utf8(attribute.key.as_ref())?;
            let value = attribute.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Replaces the value in place, keeping attribute order, or appends it.
    /// Setting the value an attribute already has leaves the element untouched.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) if *existing == value => return,
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
        self.raw_start = None;
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |element| element.name == name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> {
        self.elements_mut().filter(move |element| element.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|element| element.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|element| element.name == name)
    }

    /// Appends `child` as the last element, reusing the indentation of the
    /// existing children when the element is pretty printed.
    pub fn push_child(&mut self, child: Element) {
        let indent = self.child_indent();
        match self.children.last() {
            Some(Node::Text(text)) if is_blank(text) => {
                let at = self.children.len() - 1;
                match indent {
                    Some(indent) => {
                        self.children.insert(at, Node::Text(indent));
                        self.children.insert(at + 1, Node::Element(child));
                    }
                    None => self.children.insert(at, Node::Element(child)),
                }
            }
            _ => self.children.push(Node::Element(child)),
        }
    }

    /// Puts `replacement` where the first matching child element was and drops
    /// the other matches together with their leading whitespace. Appends when
    /// nothing matches.
    pub fn replace_children<F>(&mut self, mut is_match: F, replacement: Element)
    where
        F: FnMut(&Element) -> bool,
    {
        let mut replacement = Some(replacement);
        let mut kept = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            match node {
                Node::Element(element) if is_match(&element) => match replacement.take() {
                    Some(replacement) => kept.push(Node::Element(replacement)),
                    None => {
                        if matches!(kept.last(), Some(Node::Text(text)) if is_blank(text)) {
                            kept.pop();
                        }
                    }
                },
                node => kept.push(node),
            }
        }
        self.children = kept;
        if let Some(replacement) = replacement {
            self.push_child(replacement);
        }
    }

    fn child_indent(&self) -> Option<String> {
        self.children.windows(2).find_map(|pair| match pair {
            [Node::Text(text), Node::Element(_)] if is_blank(text) => Some(text.clone()),
            _ => None,
        })
    }

    fn write_to(&self, out: &mut String) -> Result<()> {
        out.push('<');
        match &self.raw_start {
            Some(raw) => out.push_str(raw),
            None => {
                check_name(&self.name)?;
                out.push_str(&self.name);
                for (key, value) in &self.attributes {
                    check_name(key)?;
                    write!(out, " {}=\"{}\"", key, escape(value)).map_err(serialize_err)?;
                }
            }
        }
        if self.children.is_empty() && self.self_closing {
            out.push_str("/>");
            return Ok(());
        }
        out.push('>');
        for child in &self.children {
            child.write_to(out)?;
        }
        write!(out, "</{}>", self.name).map_err(serialize_err)
    }
}

impl Node {
    fn write_to(&self, out: &mut String) -> Result<()> {
        match self {
            Node::Element(element) => return element.write_to(out),
            Node::Text(text) => out.push_str(text),
            Node::CData(data) => {
                if data.contains("]]>") {
                    return Err(Error::Serialize("CDATA section contains \"]]>\"".into()));
                }
                write!(out, "<![CDATA[{data}]]>").map_err(serialize_err)?
            }
            Node::Comment(comment) => {
                if comment.contains("--") {
                    return Err(Error::Serialize("comment contains \"--\"".into()));
                }
                write!(out, "<!--{comment}-->").map_err(serialize_err)?
            }
            Node::ProcessingInstruction(content) | Node::Declaration(content) => {
                write!(out, "<?{content}?>").map_err(serialize_err)?
            }
            Node::DocType(content) => write!(out, "<!DOCTYPE {content}>").map_err(serialize_err)?,
        }
        Ok(())
    }
}

/// A parsed domain description: one root element plus whatever surrounds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDocument {
    nodes: Vec<Node>,
}

impl DomainDocument {
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(xml).map_err(|err| Error::Parse(err.to_string()))?;
        let mut reader = Reader::from_str(text);
        reader.trim_text(false);

        let mut open: Vec<Element> = Vec::new();
        let mut nodes = Vec::new();
        loop {
            let node = match reader.read_event()? {
                Event::Start(start) => {
                    open.push(Element::from_start(&start, false)?);
                    continue;
                }
                Event::End(end) => {
                    let element = open.pop().ok_or_else(|| {
                        Error::Parse(format!(
                            "unexpected closing tag </{}>",
                            String::from_utf8_lossy(end.name().as_ref())
                        ))
                    })?;
                    Node::Element(element)
                }
                Event::Empty(start) => Node::Element(Element::from_start(&start, true)?),
                Event::Text(text) => {
                    // Rejects unknown entities; the raw form is what gets kept.
                    text.unescape()?;
                    Node::Text(utf8(&text)?)
                }
                Event::CData(data) => Node::CData(utf8(&data)?),
                Event::Comment(comment) => Node::Comment(utf8(&comment)?),
                Event::Decl(decl) => Node::Declaration(utf8(&decl)?),
                Event::PI(content) => Node::ProcessingInstruction(utf8(&content)?),
                Event::DocType(content) => Node::DocType(utf8(&content)?),
                Event::Eof => break,
            };
            match open.last_mut() {
                Some(parent) => parent.children.push(node),
                None => nodes.push(node),
            }
        }

        if let Some(element) = open.last() {
            return Err(Error::Parse(format!("unclosed element <{}>", element.name)));
        }
        if nodes
            .iter()
            .any(|node| matches!(node, Node::Text(text) if !is_blank(text)))
        {
            return Err(Error::Parse("text outside of the root element".into()));
        }
        match nodes
            .iter()
            .filter(|node| matches!(node, Node::Element(_)))
            .count()
        {
            1 => Ok(Self { nodes }),
            0 => Err(Error::Parse("document has no root element".into())),
            _ => Err(Error::Parse("document has more than one root element".into())),
        }
    }

    pub fn root(&self) -> &Element {
        self.nodes
            .iter()
            .find_map(|node| match node {
                Node::Element(element) => Some(element),
                _ => None,
            })
            .unwrap_or_else(|| unreachable!("parse guarantees a root element"))
    }

    pub fn root_mut(&mut self) -> &mut Element {
        self.nodes
            .iter_mut()
            .find_map(|node| match node {
                Node::Element(element) => Some(element),
                _ => None,
            })
            .unwrap_or_else(|| unreachable!("parse guarantees a root element"))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = String::new();
        for node in &self.nodes {
            node.write_to(&mut out)?;
        }
        Ok(out.into_bytes())
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|err| Error::Parse(err.to_string()))
}

fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '/' | '=' | '"' | '\'' | '&'));
    if valid {
        Ok(())
    } else {
        Err(Error::Serialize(format!("invalid XML name {name:?}")))
    }
}

fn serialize_err(err: std::fmt::Error) -> Error {
    Error::Serialize(err.to_string())
}
