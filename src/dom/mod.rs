//! Markup trees for text items.
//!
//! Documents are parsed leniently with html5ever into an arena [`Document`].
//! The prolog (XML declaration, doctype, leading comments) is kept verbatim so
//! that serializing an edited document changes only what was edited.

mod arena;
mod prolog;
mod serialize;
mod tree_sink;
mod xhtml;

pub use arena::{Attribute, Children, Descendants, Document, Node, NodeData, NodeId};
pub use prolog::{HTML5_DOCTYPE, PartKind, Prolog, PrologPart, XHTML11_DOCTYPE};
pub use serialize::{SerializeMethod, SerializeOptions, outer_markup, serialize};
pub use tree_sink::DocumentSink;
pub use xhtml::expand_empty_elements;

use html5ever::driver::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;

/// Parse markup text into a [`Document`].
///
/// Parsing never fails: malformed markup is repaired the way a browser would.
pub fn parse(source: &str) -> Document {
    let (prolog, rest) = Prolog::split(source);
    let markup = rest.trim_end();
    let epilogue = rest[markup.len()..].to_string();

    let sink = parse_document(DocumentSink::new(), ParseOpts::default())
        .from_utf8()
        .one(markup.as_bytes());
    let mut doc = sink.into_document();
    doc.prolog = prolog;
    doc.epilogue = epilogue;
    doc.crlf = source.contains("\r\n");
    doc
}

/// Parse XHTML text, treating `<name/>` as an empty element.
pub fn parse_xhtml(source: &str) -> Document {
    parse(&expand_empty_elements(source))
}
