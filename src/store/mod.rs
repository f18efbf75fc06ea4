//! Content stores: the archive-like collections of items that edits run against.
//!
//! Every editing operation in this crate takes its store as an explicit argument.
//! A store maps an opaque manifest `id` to content and knows how to translate
//! between ids, hrefs, basenames and book paths.

mod epub;
mod memory;

pub use epub::EpubStore;
pub use memory::MemoryStore;

use std::borrow::Cow;

use encoding_rs::Encoding;

use crate::error::{Error, Result};

/// Mimetypes that make up the "text" group of a book.
pub const TEXT_MIMETYPES: &[&str] = &["application/xhtml+xml", "text/html"];

/// Check whether a mimetype belongs to the text group.
pub fn is_text_mime(mimetype: &str) -> bool {
    TEXT_MIMETYPES
        .iter()
        .any(|m| mimetype.eq_ignore_ascii_case(m))
}

/// Identity of an item: its id plus the lookups derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct ItemInfo {
    pub id: String,
    pub href: String,
    pub mimetype: String,
}

impl ItemInfo {
    pub fn new(id: impl Into<String>, href: impl Into<String>, mimetype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            mimetype: mimetype.into(),
        }
    }

    /// The last path segment of the href.
    pub fn basename(&self) -> &str {
        basename(&self.href)
    }

    pub fn is_text(&self) -> bool {
        is_text_mime(&self.mimetype)
    }
}

/// Final segment of a slash-separated path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The content of one item.
///
/// Equality is byte-wise: `Text("a")` equals `Bytes(b"a")`.
#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    Bytes(Vec<u8>),
}

impl Content {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Text(s) => s.as_bytes(),
            Content::Bytes(b) => b,
        }
    }

    /// Borrow as text when the content is text or valid UTF-8 bytes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Bytes(b) => std::str::from_utf8(b).ok(),
        }
    }

    /// Decode to text, honouring the declared encoding of byte content.
    pub fn decode(&self) -> Cow<'_, str> {
        match self {
            Content::Text(s) => Cow::Borrowed(s),
            Content::Bytes(b) => crate::util::decode_text(b).0,
        }
    }

    /// The encoding edited text is stored back in.
    pub fn encoding(&self) -> &'static Encoding {
        match self {
            Content::Text(_) => encoding_rs::UTF_8,
            Content::Bytes(b) => crate::util::detect_encoding(b),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Content::Text(_))
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Content::Text(s) => s.into_bytes(),
            Content::Bytes(b) => b,
        }
    }

    /// Build content of the same kind as `self` from edited text.
    ///
    /// Byte content is re-encoded in the encoding it was read with and keeps its BOM.
    pub(crate) fn same_kind(&self, text: String) -> Content {
        match self {
            Content::Text(_) => Content::Text(text),
            Content::Bytes(raw) => {
                let body = crate::util::strip_bom(raw);
                let mut out = raw[..raw.len() - body.len()].to_vec();
                out.extend_from_slice(&crate::util::encode_text(&text, self.encoding()));
                Content::Bytes(out)
            }
        }
    }
}

impl PartialEq for Content {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Content {}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Content {
    fn from(b: Vec<u8>) -> Self {
        Content::Bytes(b)
    }
}

impl From<&[u8]> for Content {
    fn from(b: &[u8]) -> Self {
        Content::Bytes(b.to_vec())
    }
}

/// An archive of named, typed items.
///
/// A write for a given id must be visible to the next read of that id.
pub trait ContentStore {
    fn read(&self, id: &str) -> Result<Content>;

    fn write(&mut self, id: &str, content: Content) -> Result<()>;

    fn id_to_href(&self, id: &str) -> Result<String>;

    fn id_to_mime(&self, id: &str) -> Result<String>;

    fn href_to_id(&self, href: &str) -> Result<String>;

    fn basename_to_id(&self, name: &str) -> Result<String>;

    fn bookpath_to_id(&self, path: &str) -> Result<String>;

    /// Every item in manifest order.
    fn enumerate_all(&self) -> Vec<ItemInfo>;

    /// `(id, href)` of every text item in manifest order.
    fn enumerate_text(&self) -> Vec<(String, String)>;

    fn item_info(&self, id: &str) -> Result<ItemInfo> {
        Ok(ItemInfo {
            id: id.to_string(),
            href: self.id_to_href(id)?,
            mimetype: self.id_to_mime(id)?,
        })
    }

    fn contains(&self, id: &str) -> bool {
        self.id_to_href(id).is_ok()
    }
}

pub(crate) fn not_found(key: &str) -> Error {
    Error::ItemNotFound(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_equality_is_bytewise() {
        assert_eq!(Content::from("abc"), Content::from(b"abc".to_vec()));
        assert_ne!(Content::from("abc"), Content::from("abd"));
    }

    #[test]
    fn test_content_decode_declared_encoding() {
        let mut bytes = br#"<?xml version="1.0" encoding="windows-1252"?><p>"#.to_vec();
        bytes.push(0xE9);
        let content = Content::Bytes(bytes);
        assert!(content.as_text().is_none());
        assert!(content.decode().ends_with("<p>é"));
    }

    #[test]
    fn test_same_kind_reencodes_bytes() {
        let mut raw = b"\xEF\xBB\xBF<?xml version=\"1.0\" encoding=\"windows-1252\"?><p>".to_vec();
        raw.push(0xE9);
        let content = Content::Bytes(raw);
        let edited = content.same_kind(content.decode().replace("<p>", "<p>caf"));
        let bytes = edited.as_bytes();
        assert!(bytes.starts_with(b"\xEF\xBB\xBF<?xml"));
        assert!(bytes.ends_with(b"<p>caf\xE9"));
        assert!(Content::from("x").same_kind("y".into()).is_text());
    }

    #[test]
    fn test_same_kind_keeps_meta_charset_encoding() {
        let content = Content::Bytes(b"<html><head><meta charset=\"windows-1252\"/></head><body>caf\xE9 noir</body></html>".to_vec());
        assert_eq!(content.encoding(), encoding_rs::WINDOWS_1252);
        let edited = content.same_kind(content.decode().replace("noir", "blanc"));
        let bytes = edited.as_bytes();
        assert!(bytes.windows(10).any(|w| w == b"caf\xE9 blanc"));
        assert!(!bytes.windows(2).any(|w| w == b"\xC3\xA9"));
    }

    #[test]
    fn test_item_info_basename() {
        let info = ItemInfo::new("c1", "Text/chapter1.xhtml", "application/xhtml+xml");
        assert_eq!(info.basename(), "chapter1.xhtml");
        assert!(info.is_text());
        assert_eq!(basename("cover.jpg"), "cover.jpg");
    }

    #[test]
    fn test_text_mimetypes() {
        assert!(is_text_mime("application/xhtml+xml"));
        assert!(is_text_mime("text/HTML"));
        assert!(!is_text_mime("text/css"));
    }
}
