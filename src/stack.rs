//! Edit stacks: lazily opened, batch-committed edits over many items.
//!
//! An [`EditStack`] behaves like a map from id to editable value. The first
//! access to an id reads it from the store; later accesses return the cached
//! value, so asking for the same item twice yields the same entry. Nothing is
//! written until [`EditStack::close`], which writes every entry that changed and
//! empties the cache. Closing again has nothing left to write. Dropping the
//! stack closes it.

use std::collections::HashMap;

use crate::dom::Document;
use crate::error::{Error, Result};
use crate::session::{EditOutcome, MarkupCodec, commit, parse_item, serialize_item};
use crate::store::{Content, ContentStore, ItemInfo};

/// How a stack opens and commits its entries.
pub trait EntryKind: Sized {
    type Value;

    /// Whether [`EditStack::items`] lists only text items.
    const TEXT_ONLY: bool;

    fn open(info: ItemInfo, content: Content) -> Result<Self>;

    fn info(&self) -> &ItemInfo;

    fn value(&self) -> &Self::Value;

    fn value_mut(&mut self) -> &mut Self::Value;

    /// The content that was read and the content to propose for writing.
    fn finish(self) -> Result<(Content, Content)>;
}

/// Raw content entry.
#[derive(Debug)]
pub struct RawEntry {
    info: ItemInfo,
    original: Content,
    content: Content,
}

impl EntryKind for RawEntry {
    type Value = Content;
    const TEXT_ONLY: bool = false;

    fn open(info: ItemInfo, content: Content) -> Result<Self> {
        Ok(Self {
            info,
            original: content.clone(),
            content,
        })
    }

    fn info(&self) -> &ItemInfo {
        &self.info
    }

    fn value(&self) -> &Content {
        &self.content
    }

    fn value_mut(&mut self) -> &mut Content {
        &mut self.content
    }

    fn finish(self) -> Result<(Content, Content)> {
        Ok((self.original, self.content))
    }
}

/// Parsed markup entry.
#[derive(Debug)]
pub struct TreeEntry {
    info: ItemInfo,
    original: Content,
    tree: Document,
}

impl EntryKind for TreeEntry {
    type Value = Document;
    const TEXT_ONLY: bool = true;

    fn open(info: ItemInfo, content: Content) -> Result<Self> {
        let tree = parse_item(&MarkupCodec::default(), &info, &content)?;
        Ok(Self {
            info,
            original: content,
            tree,
        })
    }

    fn info(&self) -> &ItemInfo {
        &self.info
    }

    fn value(&self) -> &Document {
        &self.tree
    }

    fn value_mut(&mut self) -> &mut Document {
        &mut self.tree
    }

    fn finish(self) -> Result<(Content, Content)> {
        let codec = MarkupCodec::default();
        let proposed = serialize_item(&codec, &self.info, &self.tree, &self.original)?;
        Ok((self.original, proposed))
    }
}

/// A lazy cache of open edits.
///
/// # Example
///
/// ```
/// use folio::{Content, EditStack, MemoryStore};
///
/// let mut store = MemoryStore::new()
///     .with_item("A", "Text/a.xhtml", "application/xhtml+xml", "one")
///     .with_item("B", "Text/b.xhtml", "application/xhtml+xml", "two");
///
/// let mut stack: EditStack<'_, _> = EditStack::new(&mut store);
/// *stack.get("A").unwrap() = Content::from("uno");
/// stack.get_by_basename("b.xhtml").unwrap();
/// assert_eq!(stack.close().unwrap(), ["A"]);
/// drop(stack);
///
/// assert_eq!(store.text("A"), Some("uno"));
/// assert_eq!(store.writes("B"), 0);
/// ```
pub struct EditStack<'s, S: ContentStore + ?Sized, K: EntryKind = RawEntry> {
    store: &'s mut S,
    entries: Vec<K>,
    index: HashMap<String, usize>,
}

/// An edit stack over text items whose entries are parsed markup trees.
pub type TextEditStack<'s, S> = EditStack<'s, S, TreeEntry>;

impl<'s, S: ContentStore + ?Sized, K: EntryKind> EditStack<'s, S, K> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The editable value for `id`, opening it on first access.
    pub fn get(&mut self, id: &str) -> Result<&mut K::Value> {
        let idx = match self.index.get(id) {
            Some(&idx) => idx,
            None => {
                let info = self.store.item_info(id)?;
                let content = self.store.read(id)?;
                let entry = K::open(info, content)?;
                tracing::trace!(id, "opened stack entry");
                self.entries.push(entry);
                let idx = self.entries.len() - 1;
                self.index.insert(id.to_string(), idx);
                idx
            }
        };
        Ok(self.entries[idx].value_mut())
    }

    pub fn get_by_href(&mut self, href: &str) -> Result<&mut K::Value> {
        let id = resolve(self.store.href_to_id(href), href)?;
        self.get(&id)
    }

    pub fn get_by_basename(&mut self, name: &str) -> Result<&mut K::Value> {
        let id = resolve(self.store.basename_to_id(name), name)?;
        self.get(&id)
    }

    pub fn get_by_bookpath(&mut self, path: &str) -> Result<&mut K::Value> {
        let id = resolve(self.store.bookpath_to_id(path), path)?;
        self.get(&id)
    }

    /// A cached value, without opening anything.
    pub fn peek(&self, id: &str) -> Option<&K::Value> {
        self.index.get(id).map(|&idx| self.entries[idx].value())
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Ids of the cached entries, in opening order.
    pub fn open_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.info().id.as_str())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The items currently in the store, regardless of what is cached.
    pub fn items(&self) -> Vec<ItemInfo> {
        if K::TEXT_ONLY {
            self.store
                .enumerate_text()
                .into_iter()
                .filter_map(|(id, href)| {
                    let mime = self.store.id_to_mime(&id).ok()?;
                    Some(ItemInfo::new(id, href, mime))
                })
                .collect()
        } else {
            self.store.enumerate_all()
        }
    }

    /// Drop a cached entry without writing it.
    pub fn discard(&mut self, id: &str) -> bool {
        let Some(idx) = self.index.remove(id) else {
            return false;
        };
        self.entries.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        true
    }

    /// Write back every changed entry and empty the cache.
    ///
    /// Returns the ids that were written. All entries are attempted; the first
    /// failure is returned after the cache has been emptied.
    pub fn close(&mut self) -> Result<Vec<String>> {
        let entries = std::mem::take(&mut self.entries);
        self.index.clear();

        let mut written = Vec::new();
        let mut first_err = None;
        for entry in entries {
            let id = entry.info().id.clone();
            let result = entry.finish().and_then(|(original, proposed)| {
                commit(&mut *self.store, &id, &original, EditOutcome::Written(proposed))
            });
            match result {
                Ok(outcome) if outcome.is_written() => written.push(id),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(id, error = %err, "failed to commit stack entry");
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    /// Same as [`EditStack::close`].
    pub fn clear(&mut self) -> Result<Vec<String>> {
        self.close()
    }
}

fn resolve(lookup: Result<String>, key: &str) -> Result<String> {
    lookup.map_err(|_| Error::ItemNotFound(key.to_string()))
}

impl<S: ContentStore + ?Sized, K: EntryKind> Drop for EditStack<'_, S, K> {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "edit stack dropped with entries that could not be written");
        }
    }
}
