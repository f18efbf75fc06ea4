//! Markup serialization.

use html5ever::ns;

use super::arena::{Document, NodeData, NodeId};

pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Output syntax for a serialized tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializeMethod {
    /// XHTML for XML mimetypes, HTML otherwise.
    #[default]
    Auto,
    Html,
    Xhtml,
}

impl SerializeMethod {
    /// Pick a concrete method for an item's mimetype.
    pub fn resolve(self, mimetype: &str) -> SerializeMethod {
        match self {
            SerializeMethod::Auto => {
                let mime = mimetype.to_ascii_lowercase();
                if mime.contains("xhtml") || mime.ends_with("xml") {
                    SerializeMethod::Xhtml
                } else {
                    SerializeMethod::Html
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializeOptions {
    pub method: SerializeMethod,
    /// Remove `&#13;` references that carriage returns serialize to.
    pub strip_cr_refs: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            method: SerializeMethod::Auto,
            strip_cr_refs: cfg!(windows),
        }
    }
}

impl SerializeOptions {
    pub fn with_method(mut self, method: SerializeMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_strip_cr_refs(mut self, strip: bool) -> Self {
        self.strip_cr_refs = strip;
        self
    }
}

/// Serialize a whole document, prolog included.
///
/// Carriage returns in text come out as `&#13;`; stripping them is left to the
/// caller so that it can happen after encoding. A document parsed from CRLF
/// source is written with CRLF line endings throughout.
pub fn serialize(doc: &Document, method: SerializeMethod, mimetype: &str) -> String {
    let xml = method.resolve(mimetype) == SerializeMethod::Xhtml;
    let encoding = doc.encoding().output_encoding().name().to_ascii_lowercase();
    let mut out = String::new();
    doc.prolog.write(&mut out, xml, &encoding);
    for child in doc.children(doc.document()) {
        // the prolog always carries the doctype
        if matches!(doc.get(child).map(|n| &n.data), Some(NodeData::Doctype { .. })) {
            continue;
        }
        write_node(doc, child, xml, &mut out);
    }
    out.push_str(&doc.epilogue);
    if doc.crlf {
        // the tree builder turned every CRLF into LF, the prolog kept them
        out = out.replace("\r\n", "\n").replace('\n', "\r\n");
    }
    out
}

/// Serialize a single node and its subtree.
pub fn outer_markup(doc: &Document, id: NodeId, xml: bool) -> String {
    let mut out = String::new();
    write_node(doc, id, xml, &mut out);
    out
}

fn write_node(doc: &Document, id: NodeId, xml: bool, out: &mut String) {
    let Some(node) = doc.get(id) else { return };
    match &node.data {
        NodeData::Document => {
            for child in doc.children(id) {
                write_node(doc, child, xml, out);
            }
        }
        NodeData::Element { name, attrs } => {
            let tag = match &name.prefix {
                Some(prefix) => format!("{}:{}", prefix, name.local),
                None => name.local.to_string(),
            };
            out.push('<');
            out.push_str(&tag);
            for attr in attrs {
                out.push(' ');
                out.push_str(&attr.qualified());
                out.push_str("=\"");
                escape_attr(&attr.value, out);
                out.push('"');
            }

            let is_html = name.ns == ns!(html);
            let local = name.local.as_ref();
            if node.first_child.is_none() {
                if is_html && VOID_ELEMENTS.contains(&local) {
                    out.push_str(if xml { "/>" } else { ">" });
                    return;
                }
                if !is_html {
                    out.push_str("/>");
                    return;
                }
            }
            out.push('>');

            let raw = is_html && RAW_TEXT_ELEMENTS.contains(&local);
            for child in doc.children(id) {
                match doc.text(child) {
                    Some(text) if raw => out.push_str(text),
                    _ => write_node(doc, child, xml, out),
                }
            }

            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
        NodeData::Text(text) => escape_text(text, out),
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            if !public_id.is_empty() {
                out.push_str(&format!(" PUBLIC \"{public_id}\""));
            }
            if !system_id.is_empty() {
                if public_id.is_empty() {
                    out.push_str(" SYSTEM");
                }
                out.push_str(&format!(" \"{system_id}\""));
            }
            out.push('>');
        }
    }
}

fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}
