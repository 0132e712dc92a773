// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialize an `XmlElement`.

use crate::{XmlElement, XmlNode};
use quick_xml::{
    Writer,
    events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::io;

static CDATA_END: &str = "]]>";

pub(crate) fn serialize_document(
    root: &XmlElement,
    writer: impl io::Write,
) -> quick_xml::Result<()> {
    let mut writer = Writer::new_with_indent(writer, b' ', 2);

    let decl = BytesDecl::new("1.0", Some("utf-8"), None);
    writer.write_event(Event::Decl(decl))?;

    serialize_element(root, &mut writer)?;

    // Add a trailing newline.
    writer.write_indent()
}

fn serialize_element(
    element: &XmlElement,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    // Use the destructuring syntax to ensure that all fields are handled.
    let XmlElement {
        name,
        attributes,
        children,
    } = element;

    let mut tag = BytesStart::new(name.as_str());
    for (key, value) in attributes {
        // Raw key/value pairs are written as is, so escape the value here.
        let value = escape_attribute(value);
        tag.push_attribute((key.as_bytes(), value.as_bytes()));
    }

    if children.is_empty() {
        return writer.write_event(Event::Empty(tag));
    }

    writer.write_event(Event::Start(tag))?;
    for child in children {
        match child {
            XmlNode::Element(element) => serialize_element(element, writer)?,
            XmlNode::Text(text) => {
                if !text.is_empty() {
                    let text = BytesText::from_escaped(escape_text(text));
                    writer.write_event(Event::Text(text))?;
                }
            }
            XmlNode::CData(content) => serialize_cdata(content, writer)?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(name.as_str())))
}

fn serialize_cdata(content: &str, writer: &mut Writer<impl io::Write>) -> quick_xml::Result<()> {
    let content = sanitize(content);
    let mut rest = content.as_str();
    // A CDATA section can't contain its own end marker, so split it between `]]` and `>`.
    while let Some(index) = rest.find(CDATA_END) {
        let (section, next) = rest.split_at(index + 2);
        writer.write_event(Event::CData(BytesCData::new(section)))?;
        rest = next;
    }
    writer.write_event(Event::CData(BytesCData::new(rest)))
}

/// Removes characters that are not allowed anywhere in an XML 1.0 document.
fn sanitize(s: &str) -> String {
    s.replace(is_invalid_xml_char, "")
}

fn is_invalid_xml_char(c: char) -> bool {
    matches!(
        c,
        '\x00'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f' | '\u{fffe}' | '\u{ffff}'
    )
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            // Parsers normalize a literal carriage return away.
            '\r' => out.push_str("&#xD;"),
            c if is_invalid_xml_char(c) => {}
            c => out.push(c),
        }
    }
    out
}

fn escape_attribute(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            // Attribute value normalization would turn these into spaces.
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c if is_invalid_xml_char(c) => {}
            c => out.push(c),
        }
    }
    out
}
