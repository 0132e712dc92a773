// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ParseError, SerializeError},
    parse::parse_document,
    serialize::serialize_document,
};
use indexmap::map::IndexMap;
use std::io;

/// An XML element, with its attributes and child nodes.
///
/// Attributes are kept in insertion order. Setting an attribute that already exists replaces its
/// value in place, so the attribute keeps its original position in the serialized output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XmlElement {
    /// The name of this element.
    pub name: String,

    /// The attributes of this element, in insertion order.
    pub attributes: IndexMap<String, String>,

    /// The child nodes of this element.
    pub children: Vec<XmlNode>,
}

/// A node within an [`XmlElement`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum XmlNode {
    /// A nested element.
    Element(XmlElement),

    /// Character data. Escaped while serializing.
    Text(String),

    /// A CDATA section. Sections containing `]]>` are split while serializing.
    CData(String),
}

impl XmlElement {
    /// Creates a new element with the given name, no attributes and no children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// Returns the name of this element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets an attribute, replacing any existing value.
    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style version of [`Self::set_attribute`].
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Sets an attribute if `value` is `Some`.
    pub fn set_attribute_opt(
        &mut self,
        name: impl Into<String>,
        value: Option<impl Into<String>>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.set_attribute(name, value);
        }
        self
    }

    /// Returns the value of an attribute, if it is set.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Adds a child element at the end of this element.
    pub fn add_child(&mut self, child: XmlElement) -> &mut Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Adds several child elements at the end of this element.
    pub fn add_children(&mut self, children: impl IntoIterator<Item = XmlElement>) -> &mut Self {
        self.children
            .extend(children.into_iter().map(XmlNode::Element));
        self
    }

    /// Builder-style version of [`Self::add_child`].
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.add_child(child);
        self
    }

    /// Builder-style version of [`Self::add_children`].
    pub fn with_children(mut self, children: impl IntoIterator<Item = XmlElement>) -> Self {
        self.add_children(children);
        self
    }

    /// Inserts a child element before all other children.
    pub fn insert_first(&mut self, child: XmlElement) -> &mut Self {
        self.children.insert(0, XmlNode::Element(child));
        self
    }

    /// Adds a text node at the end of this element.
    pub fn add_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Builder-style version of [`Self::add_text`].
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.add_text(text);
        self
    }

    /// Adds a CDATA section at the end of this element.
    pub fn add_cdata(&mut self, content: impl Into<String>) -> &mut Self {
        self.children.push(XmlNode::CData(content.into()));
        self
    }

    /// Builder-style version of [`Self::add_cdata`].
    pub fn with_cdata(mut self, content: impl Into<String>) -> Self {
        self.add_cdata(content);
        self
    }

    /// Returns the child elements of this element.
    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) | XmlNode::CData(_) => None,
        })
    }

    /// Returns the child elements with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children().filter(move |child| child.name == name)
    }

    /// Returns the first child element with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children().find(|child| child.name == name)
    }

    /// Returns a mutable reference to the first child element with the given name.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find_map(|node| match node {
            XmlNode::Element(element) if element.name == name => Some(element),
            _ => None,
        })
    }

    /// Returns the first child element with the given name, creating an empty one at the end if
    /// it doesn't exist.
    pub fn child_or_insert(&mut self, name: &str) -> &mut XmlElement {
        let index = self.children.iter().position(
            |node| matches!(node, XmlNode::Element(element) if element.name == name),
        );
        let index = match index {
            Some(index) => index,
            None => {
                self.children.push(XmlNode::Element(XmlElement::new(name)));
                self.children.len() - 1
            }
        };
        match &mut self.children[index] {
            XmlNode::Element(element) => element,
            XmlNode::Text(_) | XmlNode::CData(_) => unreachable!("index points to an element"),
        }
    }

    /// Returns all descendant elements (not including `self`) with the given name, in document
    /// order.
    pub fn descendants<'a>(&'a self, name: &'a str) -> Vec<&'a XmlElement> {
        let mut out = Vec::new();
        collect_descendants(self, name, &mut out);
        out
    }

    /// Returns the concatenated text and CDATA content of the direct children of this element.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                XmlNode::Text(text) | XmlNode::CData(text) => out.push_str(text),
                XmlNode::Element(_) => {}
            }
        }
        out
    }

    /// Serializes this element as the root of a document to the given writer.
    ///
    /// The document starts with an XML declaration and ends with a trailing newline.
    pub fn serialize(&self, writer: impl io::Write) -> Result<(), SerializeError> {
        Ok(serialize_document(self, writer)?)
    }

    /// Serializes this element as the root of a document to a string.
    #[allow(clippy::inherent_to_string)]
    pub fn to_string(&self) -> Result<String, SerializeError> {
        let mut buf: Vec<u8> = vec![];
        self.serialize(&mut buf)?;
        String::from_utf8(buf).map_err(|utf8_err| {
            quick_xml::Error::NonDecodable(Some(utf8_err.utf8_error())).into()
        })
    }

    /// Parses a document, returning its root element.
    ///
    /// Text nodes consisting only of whitespace are dropped, since they're produced by
    /// indentation.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        parse_document(input)
    }
}

fn collect_descendants<'a>(element: &'a XmlElement, name: &str, out: &mut Vec<&'a XmlElement>) {
    for child in element.children() {
        if child.name == name {
            out.push(child);
        }
        collect_descendants(child, name, out);
    }
}
