//! A small ordered-attribute XML tree.
//!
//! Project files are attribute-heavy and element-only, so this keeps just
//! names, attributes in document order, and child elements. Text nodes,
//! comments, and processing instructions are dropped on read.

use std::io::Cursor;
use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::KanimError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parses an attribute, falling back to `default` when it is absent.
    /// A present but unparseable value is an error, not the default.
    pub fn attr_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, KanimError> {
        match self.attr(name) {
            Some(value) => value.parse().map_err(|_| self.bad_attr(name, value)),
            None => Ok(default),
        }
    }

    /// Parses a required attribute.
    pub fn require<T: FromStr>(&self, name: &str) -> Result<T, KanimError> {
        let value = self.attr(name).ok_or_else(|| {
            KanimError::ProjectStructure(format!(
                "<{}> is missing required attribute \"{}\"",
                self.name, name
            ))
        })?;
        value.parse().map_err(|_| self.bad_attr(name, value))
    }

    fn bad_attr(&self, name: &str, value: &str) -> KanimError {
        KanimError::ProjectStructure(format!(
            "<{}> attribute \"{}\" has unparseable value \"{}\"",
            self.name, name, value
        ))
    }

    /// Sets an attribute, replacing in place to preserve attribute order.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn first_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }
}

/// Parses a document into its root element.
pub fn parse_document(text: &str) -> Result<Element, KanimError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(|e| KanimError::Xml(e.to_string()))? {
            Event::Start(ref start) => {
                stack.push(element_from_start(start)?);
            }
            Event::Empty(ref start) => {
                let element = element_from_start(start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| KanimError::Xml("unbalanced closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(KanimError::Xml(
            "document ended with unclosed elements".to_string(),
        ));
    }
    root.ok_or_else(|| KanimError::Xml("document has no root element".to_string()))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), KanimError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_some() {
                return Err(KanimError::Xml(
                    "document has more than one root element".to_string(),
                ));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, KanimError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| KanimError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| KanimError::Xml(e.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

/// Serializes a tree as UTF-8 with an XML declaration and 4-space indent.
pub fn write_document(root: &Element) -> Result<String, KanimError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 4);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| KanimError::Xml(e.to_string()))?;
    write_element(&mut writer, root)?;
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| KanimError::Xml(e.to_string()))
}

fn write_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &Element,
) -> Result<(), KanimError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| KanimError::Xml(e.to_string()))?;
    } else {
        writer
            .write_event(Event::Start(start))
            .map_err(|e| KanimError::Xml(e.to_string()))?;
        for child in &element.children {
            write_element(writer, child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(element.name.as_str())))
            .map_err(|e| KanimError::Xml(e.to_string()))?;
    }
    Ok(())
}
