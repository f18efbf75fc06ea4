//! Batch iteration: run edit sessions over a filtered sequence of items.
//!
//! A [`Batch`] describes which items to visit (explicit ids, every item, or only
//! text items), a [`Predicate`] to filter them, and an [`ErrorPolicy`] that
//! decides what happens when one item fails. Each run produces a
//! [`BatchStatus`] with one entry per item the predicate accepted.
//!
//! Three observation modes are offered:
//!
//! - [`Batch::each_content`] hands each item's content to a transform.
//! - [`Batch::each_record`] hands a mutable [`ItemRecord`] whose `write_back`
//!   flag the caller may clear.
//! - [`edit_batch`] only reports the status map.
//!
//! Tree variants ([`Batch::each_tree`], [`edit_tree_batch`]) parse each item
//! with a [`TreeCodec`] first.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::dom::Document;
use crate::error::{BoxError, Error, Result};
use crate::predicate::Predicate;
use crate::session::{EditOutcome, MarkupCodec, TreeCodec, commit, parse_item, serialize_item};
use crate::store::{Content, ContentStore, ItemInfo};

/// What to do when processing one item fails.
///
/// A missing explicitly-listed id is always returned as an error, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
#[cfg_attr(feature = "cli", serde(rename_all = "lowercase"))]
pub enum ErrorPolicy {
    /// Record the failure and continue; counters keep what the item consumed.
    #[default]
    Ignore,
    /// Stop the batch and return the error.
    Raise,
    /// Record the failure and continue as if the item had not been visited.
    Skip,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(ErrorPolicy::Ignore),
            "raise" => Ok(ErrorPolicy::Raise),
            "skip" => Ok(ErrorPolicy::Skip),
            other => Err(format!("unknown error policy: {other}")),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorPolicy::Ignore => "ignore",
            ErrorPolicy::Raise => "raise",
            ErrorPolicy::Skip => "skip",
        })
    }
}

/// Correlation numbers for a batch run.
///
/// All three are 1-based once something has been counted. `local_no` restarts
/// with every item, `global_no` never does, and `file_no` counts visited items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Counters {
    pub local_no: usize,
    pub global_no: usize,
    pub file_no: usize,
}

impl Counters {
    pub(crate) fn begin_item(&mut self) {
        self.file_no += 1;
        self.local_no = 0;
    }

    /// Count one match or element and return the numbers assigned to it.
    pub(crate) fn advance(&mut self) -> Counters {
        self.local_no += 1;
        self.global_no += 1;
        *self
    }
}

/// Per-item success, in visiting order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStatus {
    entries: Vec<(String, bool)>,
}

impl BatchStatus {
    pub(crate) fn record(&mut self, id: &str, ok: bool) {
        self.entries.push((id.to_string(), ok));
    }

    pub fn get(&self, id: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == id)
            .map(|&(_, ok)| ok)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(id, ok)| (id.as_str(), *ok))
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|&(_, ok)| ok).map(|(id, _)| id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|&(_, ok)| !ok).map(|(id, _)| id)
    }

    /// True when no item failed.
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|&(_, ok)| ok)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(feature = "cli")]
impl serde::Serialize for BatchStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, ok) in &self.entries {
            map.serialize_entry(id, ok)?;
        }
        map.end()
    }
}

/// Which items a batch visits before the predicate is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    Ids(Vec<String>),
    #[default]
    All,
    Text,
}

/// An item handed to [`Batch::each_record`].
#[derive(Debug)]
pub struct ItemRecord {
    pub info: ItemInfo,
    pub content: Content,
    /// Clear to drop this item's edits.
    pub write_back: bool,
    pub file_no: usize,
}

/// A parsed item handed to [`Batch::each_tree`].
#[derive(Debug)]
pub struct TreeRecord<T> {
    pub info: ItemInfo,
    pub tree: T,
    pub write_back: bool,
    pub file_no: usize,
}

/// Configuration for a batch run.
///
/// # Example
///
/// ```
/// use folio::{Batch, EditOutcome, ErrorPolicy, MemoryStore, Predicate};
///
/// let mut store = MemoryStore::new()
///     .with_item("A", "a.xhtml", "application/xhtml+xml", "old")
///     .with_item("B", "b.xhtml", "application/xhtml+xml", "old");
///
/// let status = Batch::new()
///     .predicate(Predicate::by_id(|id| id == "A"))
///     .on_error(ErrorPolicy::Skip)
///     .each_content(&mut store, |_| Ok::<_, folio::Error>("new".to_string().into()))
///     .unwrap();
///
/// assert_eq!(status.get("A"), Some(true));
/// assert!(!status.contains("B"));
/// assert_eq!(store.text("B"), Some("old"));
/// ```
#[derive(Debug, Default)]
pub struct Batch<'p> {
    selection: Selection,
    predicate: Predicate<'p>,
    on_error: ErrorPolicy,
}

enum Candidate {
    Known(ItemInfo),
    Id(String),
}

impl<'p> Batch<'p> {
    /// Visit every item, accept all, ignore failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit only text items.
    pub fn text() -> Self {
        Self::new().text_items()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = Selection::Ids(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn all_items(mut self) -> Self {
        self.selection = Selection::All;
        self
    }

    pub fn text_items(mut self) -> Self {
        self.selection = Selection::Text;
        self
    }

    pub fn select(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn predicate(mut self, predicate: Predicate<'p>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.on_error
    }

    fn candidates<S: ContentStore + ?Sized>(&self, store: &S, text_only: bool) -> Vec<Candidate> {
        match &self.selection {
            Selection::Ids(ids) => {
                // a repeated id is visited once, at its first position
                let mut seen = HashSet::new();
                ids.iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .cloned()
                    .map(Candidate::Id)
                    .collect()
            }
            Selection::All if !text_only => store
                .enumerate_all()
                .into_iter()
                .map(Candidate::Known)
                .collect(),
            Selection::All | Selection::Text => store
                .enumerate_text()
                .into_iter()
                .filter_map(|(id, href)| {
                    store
                        .id_to_mime(&id)
                        .ok()
                        .map(|mime| Candidate::Known(ItemInfo::new(id, href, mime)))
                })
                .collect(),
        }
    }

    /// Drive `visit` over every accepted item, applying the error policy.
    ///
    /// Counters are advanced by `visit`; under [`ErrorPolicy::Skip`] they are
    /// restored to their value before the failing item.
    pub(crate) fn run<S, F>(&self, store: &mut S, counters: &mut Counters, visit: F) -> Result<BatchStatus>
    where
        S: ContentStore + ?Sized,
        F: FnMut(&mut S, &ItemInfo, &mut Counters) -> Result<()>,
    {
        self.run_with(store, counters, false, visit)
    }

    /// Like [`Batch::run`], but passes over items that are not text.
    pub(crate) fn run_text<S, F>(&self, store: &mut S, counters: &mut Counters, visit: F) -> Result<BatchStatus>
    where
        S: ContentStore + ?Sized,
        F: FnMut(&mut S, &ItemInfo, &mut Counters) -> Result<()>,
    {
        self.run_with(store, counters, true, visit)
    }

    fn run_with<S, F>(&self, store: &mut S, counters: &mut Counters, text_only: bool, mut visit: F) -> Result<BatchStatus>
    where
        S: ContentStore + ?Sized,
        F: FnMut(&mut S, &ItemInfo, &mut Counters) -> Result<()>,
    {
        let mut status = BatchStatus::default();
        for candidate in self.candidates(store, text_only) {
            let info = match candidate {
                Candidate::Known(info) => info,
                Candidate::Id(id) => store.item_info(&id)?,
            };
            if text_only && !info.is_text() {
                tracing::trace!(id = %info.id, "not a text item");
                continue;
            }
            if !self.predicate.test(&info.id, &info.href, &info.mimetype) {
                tracing::trace!(id = %info.id, "rejected by predicate");
                continue;
            }

            let before = *counters;
            counters.begin_item();
            match visit(store, &info, counters) {
                Ok(()) => status.record(&info.id, true),
                Err(err) if err.is_item_not_found() => return Err(err),
                Err(err) => match self.on_error {
                    ErrorPolicy::Raise => return Err(err),
                    ErrorPolicy::Ignore => {
                        tracing::warn!(id = %info.id, error = %err, "item failed, ignored");
                        status.record(&info.id, false);
                    }
                    ErrorPolicy::Skip => {
                        tracing::warn!(id = %info.id, error = %err, "item failed, skipped");
                        *counters = before;
                        status.record(&info.id, false);
                    }
                },
            }
        }
        if !status.is_success() {
            tracing::debug!(failed = status.failed().count(), "batch finished with failures");
        }
        Ok(status)
    }

    /// Apply `transform` to the content of each item.
    pub fn each_content<S, F, E>(&self, store: &mut S, mut transform: F) -> Result<BatchStatus>
    where
        S: ContentStore + ?Sized,
        F: FnMut(&Content) -> std::result::Result<EditOutcome, E>,
        E: Into<BoxError>,
    {
        let mut counters = Counters::default();
        self.run(store, &mut counters, |store, info, _| {
            crate::session::edit(store, &info.id, &mut transform).map(drop)
        })
    }

    /// Hand each item to `f` as an [`ItemRecord`].
    ///
    /// The record's content is written back when `write_back` is still set and
    /// the content differs from what was read.
    pub fn each_record<S, F, E>(&self, store: &mut S, mut f: F) -> Result<BatchStatus>
    where
        S: ContentStore + ?Sized,
        F: FnMut(&mut ItemRecord) -> std::result::Result<(), E>,
        E: Into<BoxError>,
    {
        let mut counters = Counters::default();
        self.run(store, &mut counters, |store, info, counters| {
            let original = store.read(&info.id)?;
            let mut record = ItemRecord {
                info: info.clone(),
                content: original.clone(),
                write_back: true,
                file_no: counters.file_no,
            };
            f(&mut record).map_err(Error::transform)?;
            let proposed = if record.write_back {
                EditOutcome::Written(record.content)
            } else {
                EditOutcome::Discarded
            };
            commit(store, &info.id, &original, proposed).map(drop)
        })
    }

    /// Parse each text item with `codec` and hand it to `f` as a [`TreeRecord`].
    ///
    /// Items that are not text are passed over.
    pub fn each_tree<S, C, F, E>(&self, store: &mut S, codec: &C, mut f: F) -> Result<BatchStatus>
    where
        S: ContentStore + ?Sized,
        C: TreeCodec,
        F: FnMut(&mut TreeRecord<C::Tree>) -> std::result::Result<(), E>,
        E: Into<BoxError>,
    {
        let mut counters = Counters::default();
        self.run_text(store, &mut counters, |store, info, counters| {
            let original = store.read(&info.id)?;
            let tree = parse_item(codec, info, &original)?;
            let mut record = TreeRecord {
                info: info.clone(),
                tree,
                write_back: true,
                file_no: counters.file_no,
            };
            f(&mut record).map_err(Error::transform)?;
            if !record.write_back {
                return Ok(());
            }
            let content = serialize_item(codec, info, &record.tree, &original)?;
            commit(store, &info.id, &original, EditOutcome::Written(content)).map(drop)
        })
    }
}

/// Rewrite every selected item with `operate`, writing back changed content.
pub fn edit_batch<S, F, E>(store: &mut S, batch: &Batch<'_>, mut operate: F) -> Result<BatchStatus>
where
    S: ContentStore + ?Sized,
    F: FnMut(&Content) -> std::result::Result<Content, E>,
    E: Into<BoxError>,
{
    batch.each_content(store, |content| operate(content).map(EditOutcome::Written))
}

/// Edit the markup tree of every selected item in place.
pub fn edit_tree_batch<S, F, E>(store: &mut S, batch: &Batch<'_>, mut operate: F) -> Result<BatchStatus>
where
    S: ContentStore + ?Sized,
    F: FnMut(&mut Document) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    batch.each_tree(store, &MarkupCodec::default(), |record| operate(&mut record.tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const XHTML: &str = "application/xhtml+xml";

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_item("A", "a.xhtml", XHTML, "foo")
            .with_item("css", "s.css", "text/css", "p {}")
            .with_item("B", "b.xhtml", XHTML, "bar")
    }

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!("SKIP".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Skip));
        assert!("panic".parse::<ErrorPolicy>().is_err());
        assert_eq!(ErrorPolicy::Raise.to_string(), "raise");
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Ignore);
    }

    #[test]
    fn test_selection_modes() {
        let mut store = store();
        let status = Batch::new()
            .each_content(&mut store, |_| Ok::<_, Error>(EditOutcome::Unchanged))
            .unwrap();
        assert_eq!(status.iter().map(|(id, _)| id).collect::<Vec<_>>(), ["A", "css", "B"]);

        let status = Batch::text()
            .each_content(&mut store, |_| Ok::<_, Error>(EditOutcome::Unchanged))
            .unwrap();
        assert_eq!(status.iter().map(|(id, _)| id).collect::<Vec<_>>(), ["A", "B"]);

        let status = Batch::new()
            .ids(["B", "A"])
            .each_content(&mut store, |_| Ok::<_, Error>(EditOutcome::Unchanged))
            .unwrap();
        assert_eq!(status.iter().map(|(id, _)| id).collect::<Vec<_>>(), ["B", "A"]);
    }

    #[test]
    fn test_missing_explicit_id_always_surfaces() {
        for policy in [ErrorPolicy::Ignore, ErrorPolicy::Skip, ErrorPolicy::Raise] {
            let mut store = store();
            let err = Batch::new()
                .ids(["A", "nope"])
                .on_error(policy)
                .each_content(&mut store, |_| Ok::<_, Error>(EditOutcome::Unchanged))
                .unwrap_err();
            assert!(err.is_item_not_found());
        }
    }

    #[test]
    fn test_raise_stops_at_failing_item() {
        let mut store = store();
        let err = Batch::text()
            .on_error(ErrorPolicy::Raise)
            .each_content(&mut store, |c| {
                if c.as_bytes() == b"foo" {
                    Err("bad item")
                } else {
                    Ok("changed".to_string().into())
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::TransformFailed(_)));
        assert_eq!(store.total_writes(), 0);
    }

    #[test]
    fn test_ignore_records_failure_and_continues() {
        let mut store = store();
        let status = Batch::text()
            .each_content(&mut store, |c| {
                if c.as_bytes() == b"foo" {
                    Err("bad item")
                } else {
                    Ok("changed".to_string().into())
                }
            })
            .unwrap();
        assert_eq!(status.get("A"), Some(false));
        assert_eq!(status.get("B"), Some(true));
        assert_eq!(status.failed().collect::<Vec<_>>(), ["A"]);
        assert!(!status.is_success());
        assert_eq!(store.text("A"), Some("foo"));
        assert_eq!(store.text("B"), Some("changed"));
    }

    #[test]
    fn test_skip_restores_counters() {
        let mut store = store();
        let batch = Batch::text().on_error(ErrorPolicy::Skip);
        let mut counters = Counters::default();
        let status = batch
            .run(&mut store, &mut counters, |_, info, counters| {
                counters.advance();
                counters.advance();
                if info.id == "A" {
                    return Err(Error::transform("fail after two"));
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(status.get("A"), Some(false));
        assert_eq!(counters.global_no, 2);
        assert_eq!(counters.file_no, 1);

        let batch = Batch::text().on_error(ErrorPolicy::Ignore);
        let mut counters = Counters::default();
        batch
            .run(&mut store, &mut counters, |_, info, counters| {
                counters.advance();
                counters.advance();
                if info.id == "A" {
                    return Err(Error::transform("fail after two"));
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(counters.global_no, 4);
        assert_eq!(counters.file_no, 2);
    }

    #[test]
    fn test_each_record_write_back_flag() {
        let mut store = store();
        let status = Batch::text()
            .each_record(&mut store, |record| {
                record.content = Content::from(format!("{}!", record.content.decode()));
                record.write_back = record.info.id == "B";
                Ok::<_, Error>(())
            })
            .unwrap();
        assert!(status.is_success());
        assert_eq!(store.text("A"), Some("foo"));
        assert_eq!(store.text("B"), Some("bar!"));
        assert_eq!(store.total_writes(), 1);
    }

    #[test]
    fn test_edit_batch_writes_only_changes() {
        let mut store = store();
        let status = edit_batch(&mut store, &Batch::text(), |c| {
            Ok::<_, Error>(Content::from(c.decode().replace("foo", "baz")))
        })
        .unwrap();
        assert_eq!(status.len(), 2);
        assert!(status.is_success());
        assert_eq!(store.writes("A"), 1);
        assert_eq!(store.writes("B"), 0);
    }

    #[test]
    fn test_each_tree_passes_over_non_text_items() {
        let mut store = store();
        let mut seen = Vec::new();
        let status = Batch::new()
            .each_tree(&mut store, &MarkupCodec::default(), |record| {
                seen.push(record.info.id.clone());
                Ok::<_, Error>(())
            })
            .unwrap();
        assert_eq!(seen, ["A", "B"]);
        assert!(!status.contains("css"));
        assert_eq!(store.total_writes(), 0);
    }

    #[test]
    fn test_edit_tree_batch() {
        let mut store = MemoryStore::new()
            .with_item("A", "a.xhtml", XHTML, "<html><head></head><body><p>x</p></body></html>")
            .with_item("B", "b.xhtml", XHTML, "<html><head></head><body><div>y</div></body></html>");
        let status = edit_tree_batch(&mut store, &Batch::text(), |doc| {
            if let Some(p) = doc.find_by_tag("p") {
                doc.set_attr(p, "class", "x");
            }
            Ok::<_, Error>(())
        })
        .unwrap();
        assert!(status.is_success());
        assert_eq!(store.writes("A"), 1);
        assert_eq!(store.writes("B"), 0);
        assert!(store.text("A").unwrap().contains("<p class=\"x\">x</p>"));
    }
}
