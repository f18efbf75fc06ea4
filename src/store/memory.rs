use std::cell::Cell;
use std::collections::HashMap;

use super::{Content, ContentStore, ItemInfo, basename, is_text_mime, not_found};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    info: ItemInfo,
    content: Content,
    writes: usize,
}

/// An in-memory [`ContentStore`] that keeps items in insertion order.
///
/// Every call to [`ContentStore::write`] is counted per item, which makes it easy to
/// verify that unchanged items are never written back.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    reads: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an item. The href doubles as the book path.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        href: impl Into<String>,
        mimetype: impl Into<String>,
        content: impl Into<Content>,
    ) {
        let info = ItemInfo::new(id, href, mimetype);
        let entry = Entry {
            info,
            content: content.into(),
            writes: 0,
        };
        match self.index.get(&entry.info.id) {
            Some(&idx) => self.entries[idx] = entry,
            None => {
                self.index.insert(entry.info.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn with_item(
        mut self,
        id: impl Into<String>,
        href: impl Into<String>,
        mimetype: impl Into<String>,
        content: impl Into<Content>,
    ) -> Self {
        self.insert(id, href, mimetype, content);
        self
    }

    /// Current content of an item without counting a read.
    pub fn get(&self, id: &str) -> Option<&Content> {
        self.entry(id).map(|e| &e.content)
    }

    /// Current content as text, for assertions.
    pub fn text(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(Content::as_text)
    }

    /// Number of times `id` was written.
    pub fn writes(&self, id: &str) -> usize {
        self.entry(id).map_or(0, |e| e.writes)
    }

    pub fn total_writes(&self) -> usize {
        self.entries.iter().map(|e| e.writes).sum()
    }

    pub fn total_reads(&self) -> usize {
        self.reads.get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: &str) -> Option<&Entry> {
        self.index.get(id).map(|&idx| &self.entries[idx])
    }

    fn find_id(&self, pred: impl Fn(&ItemInfo) -> bool, key: &str) -> Result<String> {
        self.entries
            .iter()
            .find(|e| pred(&e.info))
            .map(|e| e.info.id.clone())
            .ok_or_else(|| not_found(key))
    }
}

impl ContentStore for MemoryStore {
    fn read(&self, id: &str) -> Result<Content> {
        self.reads.set(self.reads.get() + 1);
        self.entry(id)
            .map(|e| e.content.clone())
            .ok_or_else(|| not_found(id))
    }

    fn write(&mut self, id: &str, content: Content) -> Result<()> {
        let idx = *self.index.get(id).ok_or_else(|| not_found(id))?;
        let entry = &mut self.entries[idx];
        entry.content = content;
        entry.writes += 1;
        Ok(())
    }

    fn id_to_href(&self, id: &str) -> Result<String> {
        self.entry(id)
            .map(|e| e.info.href.clone())
            .ok_or_else(|| not_found(id))
    }

    fn id_to_mime(&self, id: &str) -> Result<String> {
        self.entry(id)
            .map(|e| e.info.mimetype.clone())
            .ok_or_else(|| not_found(id))
    }

    fn href_to_id(&self, href: &str) -> Result<String> {
        self.find_id(|info| info.href == href, href)
    }

    fn basename_to_id(&self, name: &str) -> Result<String> {
        self.find_id(|info| basename(&info.href) == name, name)
    }

    fn bookpath_to_id(&self, path: &str) -> Result<String> {
        self.find_id(|info| info.href == path, path)
    }

    fn enumerate_all(&self) -> Vec<ItemInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    fn enumerate_text(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|e| is_text_mime(&e.info.mimetype))
            .map(|e| (e.info.id.clone(), e.info.href.clone()))
            .collect()
    }
}
