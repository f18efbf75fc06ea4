//! Scoped edit sessions.
//!
//! An edit reads one item, hands it to caller code, and writes the result back
//! only when it differs from what was read. A session that is dropped without
//! being closed writes nothing.

mod tree;

pub use tree::{MarkupCodec, TreeCodec, TreeSession, scoped_edit_tree, scoped_edit_tree_with};
pub(crate) use tree::{parse_item, serialize_item};

use crate::error::{BoxError, Error, Result};
use crate::store::{Content, ContentStore, ItemInfo};

/// What an edit did, and what a transform asks for.
///
/// A transform returns `Written(new)` to propose new content, `Unchanged` to
/// keep the current content, or `Discarded` to throw the edit away. The edit
/// reports `Written` only when content was actually written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome<T = Content> {
    Written(T),
    Unchanged,
    Discarded,
}

impl<T> EditOutcome<T> {
    pub fn is_written(&self) -> bool {
        matches!(self, EditOutcome::Written(_))
    }

    pub fn written(self) -> Option<T> {
        match self {
            EditOutcome::Written(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> EditOutcome<U> {
        match self {
            EditOutcome::Written(value) => EditOutcome::Written(f(value)),
            EditOutcome::Unchanged => EditOutcome::Unchanged,
            EditOutcome::Discarded => EditOutcome::Discarded,
        }
    }
}

impl<T> From<T> for EditOutcome<T> {
    fn from(value: T) -> Self {
        EditOutcome::Written(value)
    }
}

impl From<String> for EditOutcome<Content> {
    fn from(text: String) -> Self {
        EditOutcome::Written(Content::Text(text))
    }
}

impl From<Vec<u8>> for EditOutcome<Content> {
    fn from(bytes: Vec<u8>) -> Self {
        EditOutcome::Written(Content::Bytes(bytes))
    }
}

/// Apply `transform` to the content of `id` and write back a changed result.
///
/// Errors raised by the transform come back as [`Error::TransformFailed`] and
/// nothing is written.
///
/// # Example
///
/// ```
/// use folio::{EditOutcome, MemoryStore, edit};
///
/// let mut store = MemoryStore::new().with_item("A", "a.xhtml", "application/xhtml+xml", "foo");
/// let outcome = edit(&mut store, "A", |content| {
///     Ok::<_, folio::Error>(content.decode().replace("foo", "bar").into())
/// })
/// .unwrap();
/// assert!(outcome.is_written());
/// assert_eq!(store.text("A"), Some("bar"));
/// ```
pub fn edit<S, F, E>(store: &mut S, id: &str, transform: F) -> Result<EditOutcome>
where
    S: ContentStore + ?Sized,
    F: FnOnce(&Content) -> std::result::Result<EditOutcome, E>,
    E: Into<BoxError>,
{
    let original = store.read(id)?;
    let proposed = transform(&original).map_err(Error::transform)?;
    commit(store, id, &original, proposed)
}

pub(crate) fn commit<S>(store: &mut S, id: &str, original: &Content, proposed: EditOutcome) -> Result<EditOutcome>
where
    S: ContentStore + ?Sized,
{
    match proposed {
        EditOutcome::Written(new) if &new != original => {
            store.write(id, new.clone())?;
            tracing::debug!(id, bytes = new.len(), "wrote item");
            Ok(EditOutcome::Written(new))
        }
        EditOutcome::Written(_) | EditOutcome::Unchanged => Ok(EditOutcome::Unchanged),
        EditOutcome::Discarded => Ok(EditOutcome::Discarded),
    }
}

/// An open edit on one item.
///
/// The session owns a working copy of the content. [`Session::close`] writes it
/// back if it changed and was not discarded. Dropping the session without
/// closing it writes nothing.
pub struct Session<'s, S: ContentStore + ?Sized> {
    store: &'s mut S,
    info: ItemInfo,
    original: Content,
    content: Content,
    discarded: bool,
    closed: bool,
}

impl<'s, S: ContentStore + ?Sized> Session<'s, S> {
    pub fn open(store: &'s mut S, id: &str) -> Result<Self> {
        let info = store.item_info(id)?;
        let original = store.read(id)?;
        tracing::trace!(id, "opened edit session");
        Ok(Self {
            store,
            info,
            content: original.clone(),
            original,
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

    /// Content as it was when the session opened.
    pub fn original(&self) -> &Content {
        &self.original
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut Content {
        &mut self.content
    }

    pub fn set_content(&mut self, content: impl Into<Content>) {
        self.content = content.into();
    }

    /// Decoded working text.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        self.content.decode()
    }

    /// Replace the working content with text, keeping the stored kind.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content = self.original.same_kind(text.into());
    }

    /// Abandon the edit. Closing afterwards writes nothing.
    pub fn discard(&mut self) {
        self.discarded = true;
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    pub fn is_changed(&self) -> bool {
        self.content != self.original
    }

    /// Finish the session, writing back changed content.
    pub fn close(mut self) -> Result<EditOutcome> {
        self.closed = true;
        let proposed = if self.discarded {
            EditOutcome::Discarded
        } else {
            let content = std::mem::replace(&mut self.content, Content::Bytes(Vec::new()));
            EditOutcome::Written(content)
        };
        commit(&mut *self.store, &self.info.id, &self.original, proposed)
    }
}

impl<S: ContentStore + ?Sized> Drop for Session<'_, S> {
    fn drop(&mut self) {
        if !self.closed && !self.discarded && self.is_changed() {
            tracing::warn!(id = %self.info.id, "edit session dropped without close; changes not written");
        }
    }
}

/// Run `f` inside a session on `id` and close it.
///
/// If `f` fails the session is abandoned and the error is returned as
/// [`Error::TransformFailed`].
pub fn scoped_edit<S, F, E>(store: &mut S, id: &str, f: F) -> Result<EditOutcome>
where
    S: ContentStore + ?Sized,
    F: FnOnce(&mut Session<'_, S>) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    let mut session = Session::open(store, id)?;
    f(&mut session).map_err(Error::transform)?;
    session.close()
}
