// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// An error that occurs while serializing an [`XmlElement`](crate::XmlElement).
///
/// Returned by [`XmlElement::serialize`](crate::XmlElement::serialize) and
/// [`XmlElement::to_string`](crate::XmlElement::to_string).
#[derive(Debug, Error)]
#[error("error serializing XML document")]
pub struct SerializeError {
    #[from]
    inner: quick_xml::Error,
}

/// An error that occurs while parsing a document with [`XmlElement::parse`](crate::XmlElement::parse).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The underlying reader failed.
    #[error("error reading XML document")]
    Xml(#[from] quick_xml::Error),

    /// The document ended before an element was closed.
    #[error("element `{name}` was never closed")]
    Unclosed {
        /// The name of the innermost open element.
        name: String,
    },

    /// Content was found outside the root element.
    #[error("unexpected content outside the root element: {content}")]
    OutsideRoot {
        /// A description of the content.
        content: String,
    },

    /// The document had no root element.
    #[error("document has no root element")]
    NoRoot,
}
