//! Tree edit sessions: parse an item, edit the tree, serialize it back.

use std::borrow::Cow;

use super::{EditOutcome, commit};
use crate::dom::{self, Document, SerializeMethod, SerializeOptions};
use crate::error::{BoxError, Error, Result};
use crate::store::{Content, ContentStore, ItemInfo};
use crate::util;

/// Converts between stored content and an editable tree.
pub trait TreeCodec {
    type Tree;

    fn parse(&self, info: &ItemInfo, content: &Content) -> std::result::Result<Self::Tree, BoxError>;

    /// Produce content for `tree`. `original` is what the tree was parsed from.
    fn serialize(
        &self,
        info: &ItemInfo,
        tree: &Self::Tree,
        original: &Content,
    ) -> std::result::Result<Content, BoxError>;
}

/// The default codec for XHTML and HTML items.
///
/// A tree that was never mutated serializes to the exact bytes it was parsed
/// from. Byte content is re-encoded in the encoding it was read with, and XHTML
/// items are parsed with XML empty-element tags honoured.
#[derive(Debug, Clone, Default)]
pub struct MarkupCodec {
    pub options: SerializeOptions,
}

impl MarkupCodec {
    pub fn new(options: SerializeOptions) -> Self {
        Self { options }
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

impl TreeCodec for MarkupCodec {
    type Tree = Document;

    fn parse(&self, info: &ItemInfo, content: &Content) -> std::result::Result<Document, BoxError> {
        let text = content.decode();
        let mut doc = match SerializeMethod::Auto.resolve(&info.mimetype) {
            SerializeMethod::Xhtml => dom::parse_xhtml(&text),
            _ => dom::parse(&text),
        };
        doc.set_encoding(content.encoding());
        Ok(doc)
    }

    fn serialize(
        &self,
        info: &ItemInfo,
        tree: &Document,
        original: &Content,
    ) -> std::result::Result<Content, BoxError> {
        if !tree.is_modified() {
            return Ok(original.clone());
        }
        let text = dom::serialize(tree, self.options.method, &info.mimetype);

        let encoded = match original {
            Content::Text(_) => Cow::Borrowed(text.as_bytes()),
            Content::Bytes(_) => util::encode_text(&text, tree.encoding()),
        };
        let mut bytes = if self.options.strip_cr_refs {
            util::strip_cr_refs(&encoded).into_owned()
        } else {
            encoded.into_owned()
        };

        Ok(match original {
            Content::Text(_) => Content::Text(String::from_utf8(bytes)?),
            Content::Bytes(raw) => {
                if raw.starts_with(UTF8_BOM) && !bytes.starts_with(UTF8_BOM) {
                    bytes.splice(0..0, UTF8_BOM.iter().copied());
                }
                Content::Bytes(bytes)
            }
        })
    }
}

/// An open tree edit on one item.
///
/// [`TreeSession::close`] serializes the tree and writes it back if the result
/// differs from the stored content.
pub struct TreeSession<'s, S: ContentStore + ?Sized, C: TreeCodec = MarkupCodec> {
    store: &'s mut S,
    info: ItemInfo,
    original: Content,
    tree: C::Tree,
    codec: C,
    discarded: bool,
    closed: bool,
}

impl<'s, S: ContentStore + ?Sized> TreeSession<'s, S, MarkupCodec> {
    pub fn open(store: &'s mut S, id: &str) -> Result<Self> {
        Self::open_with(store, id, MarkupCodec::default())
    }
}

impl<'s, S: ContentStore + ?Sized, C: TreeCodec> TreeSession<'s, S, C> {
    pub fn open_with(store: &'s mut S, id: &str, codec: C) -> Result<Self> {
        let info = store.item_info(id)?;
        let original = store.read(id)?;
        let tree = parse_item(&codec, &info, &original)?;
        Ok(Self {
            store,
            info,
            original,
            tree,
            codec,
            discarded: false,
            closed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &ItemInfo {
        &self.info
    }

    pub fn tree(&self) -> &C::Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut C::Tree {
        &mut self.tree
    }

    pub fn discard(&mut self) {
        self.discarded = true;
    }

    pub fn close(mut self) -> Result<EditOutcome> {
        self.closed = true;
        if self.discarded {
            return Ok(EditOutcome::Discarded);
        }
        let content = serialize_item(&self.codec, &self.info, &self.tree, &self.original)?;
        commit(
            &mut *self.store,
            &self.info.id,
            &self.original,
            EditOutcome::Written(content),
        )
    }
}

impl<S: ContentStore + ?Sized, C: TreeCodec> Drop for TreeSession<'_, S, C> {
    fn drop(&mut self) {
        if !self.closed && !self.discarded {
            tracing::debug!(id = %self.info.id, "tree session dropped without close");
        }
    }
}

pub(crate) fn parse_item<C: TreeCodec>(codec: &C, info: &ItemInfo, content: &Content) -> Result<C::Tree> {
    codec.parse(info, content).map_err(|e| Error::ParseFailed {
        id: info.id.clone(),
        reason: e.to_string(),
    })
}

pub(crate) fn serialize_item<C: TreeCodec>(
    codec: &C,
    info: &ItemInfo,
    tree: &C::Tree,
    original: &Content,
) -> Result<Content> {
    codec
        .serialize(info, tree, original)
        .map_err(|e| Error::SerializeFailed {
            id: info.id.clone(),
            reason: e.to_string(),
        })
}

/// Edit the markup tree of `id` with the default codec.
///
/// # Example
///
/// ```
/// use folio::{MemoryStore, scoped_edit_tree};
///
/// let mut store = MemoryStore::new().with_item(
///     "c1",
///     "c1.xhtml",
///     "application/xhtml+xml",
///     "<html><head></head><body><p>hi</p></body></html>",
/// );
/// scoped_edit_tree(&mut store, "c1", |session| {
///     let doc = session.tree_mut();
///     if let Some(p) = doc.find_by_tag("p") {
///         doc.set_attr(p, "class", "lead");
///     }
///     Ok::<_, folio::Error>(())
/// })
/// .unwrap();
/// assert!(store.text("c1").unwrap().contains(r#"<p class="lead">hi</p>"#));
/// ```
pub fn scoped_edit_tree<S, F, E>(store: &mut S, id: &str, f: F) -> Result<EditOutcome>
where
    S: ContentStore + ?Sized,
    F: FnOnce(&mut TreeSession<'_, S>) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    scoped_edit_tree_with(store, id, MarkupCodec::default(), f)
}

/// Edit the tree of `id` using a caller-supplied codec.
pub fn scoped_edit_tree_with<S, C, F, E>(store: &mut S, id: &str, codec: C, f: F) -> Result<EditOutcome>
where
    S: ContentStore + ?Sized,
    C: TreeCodec,
    F: FnOnce(&mut TreeSession<'_, S, C>) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    let mut session = TreeSession::open_with(store, id, codec)?;
    f(&mut session).map_err(Error::transform)?;
    session.close()
}
