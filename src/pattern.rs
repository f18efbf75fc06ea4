//! Regular-expression search and replace across items.
//!
//! Both operations run on top of [`Batch`]: the pattern is compiled once, items
//! are selected and filtered the same way, and every match is numbered with the
//! batch [`Counters`].

use std::fmt;
use std::ops::Range;

use regex::{Captures, Regex};

use crate::batch::{Batch, BatchStatus, Counters};
use crate::error::{BoxError, Error, Result};
use crate::session::{EditOutcome, commit};
use crate::store::{ContentStore, ItemInfo};

/// Anything that can be turned into a compiled pattern.
pub trait ToRegex {
    fn to_regex(&self) -> Result<Regex>;
}

impl ToRegex for str {
    fn to_regex(&self) -> Result<Regex> {
        Ok(Regex::new(self)?)
    }
}

impl ToRegex for String {
    fn to_regex(&self) -> Result<Regex> {
        self.as_str().to_regex()
    }
}

impl ToRegex for Regex {
    fn to_regex(&self) -> Result<Regex> {
        Ok(self.clone())
    }
}

/// One match, with the item it came from and its correlation numbers.
#[derive(Debug)]
pub struct MatchContext<'a> {
    pub info: &'a ItemInfo,
    pub local_no: usize,
    pub global_no: usize,
    pub file_no: usize,
    pub captures: &'a Captures<'a>,
    /// The whole decoded item content.
    pub content: &'a str,
}

impl MatchContext<'_> {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn href(&self) -> &str {
        &self.info.href
    }

    pub fn mimetype(&self) -> &str {
        &self.info.mimetype
    }

    /// The matched text.
    pub fn as_str(&self) -> &str {
        self.captures.get(0).map_or("", |m| m.as_str())
    }

    pub fn range(&self) -> Range<usize> {
        self.captures.get(0).map_or(0..0, |m| m.range())
    }

    /// Text of capture group `i`.
    pub fn group(&self, i: usize) -> Option<&str> {
        self.captures.get(i).map(|m| m.as_str())
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.captures.name(name).map(|m| m.as_str())
    }

    pub fn counters(&self) -> Counters {
        Counters {
            local_no: self.local_no,
            global_no: self.global_no,
            file_no: self.file_no,
        }
    }
}

/// An owned match summary.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct MatchRecord {
    pub id: String,
    pub href: String,
    pub local_no: usize,
    pub global_no: usize,
    pub file_no: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

type CapturesFn<'r> = Box<dyn FnMut(&Captures<'_>) -> std::result::Result<String, BoxError> + 'r>;
type ContextFn<'r> = Box<dyn FnMut(&MatchContext<'_>) -> std::result::Result<String, BoxError> + 'r>;

/// What a match is replaced with.
pub enum Replacement<'r> {
    /// Template text; `$1`, `${name}` and `$$` expand as in [`Captures::expand`].
    Literal(String),
    /// Computed from the captures alone.
    Func(CapturesFn<'r>),
    /// Computed from the full [`MatchContext`].
    WithContext(ContextFn<'r>),
}

impl<'r> Replacement<'r> {
    pub fn literal(template: impl Into<String>) -> Self {
        Replacement::Literal(template.into())
    }

    pub fn func<F, E>(mut f: F) -> Self
    where
        F: FnMut(&Captures<'_>) -> std::result::Result<String, E> + 'r,
        E: Into<BoxError>,
    {
        Replacement::Func(Box::new(move |caps| f(caps).map_err(Into::into)))
    }

    pub fn with_context<F, E>(mut f: F) -> Self
    where
        F: FnMut(&MatchContext<'_>) -> std::result::Result<String, E> + 'r,
        E: Into<BoxError>,
    {
        Replacement::WithContext(Box::new(move |ctx| f(ctx).map_err(Into::into)))
    }
}

impl From<&str> for Replacement<'_> {
    fn from(s: &str) -> Self {
        Replacement::literal(s)
    }
}

impl From<String> for Replacement<'_> {
    fn from(s: String) -> Self {
        Replacement::Literal(s)
    }
}

impl fmt::Debug for Replacement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Replacement::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Replacement::Func(_) => f.write_str("Func(..)"),
            Replacement::WithContext(_) => f.write_str("WithContext(..)"),
        }
    }
}

/// Visit every match of `pattern` in the selected items.
///
/// Items without matches still count towards `file_no`. Matches reach `visit`
/// as they are found; use [`match_map`] to keep only the output of items that
/// finish.
pub fn match_iter<S, P, F, E>(store: &mut S, batch: &Batch<'_>, pattern: &P, mut visit: F) -> Result<BatchStatus>
where
    S: ContentStore + ?Sized,
    P: ToRegex + ?Sized,
    F: FnMut(&MatchContext<'_>) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    let re = pattern.to_regex()?;
    let mut counters = Counters::default();
    batch.run(store, &mut counters, |store, info, counters| {
        let content = store.read(&info.id)?;
        let text = content.decode();
        for caps in re.captures_iter(&text) {
            let numbers = counters.advance();
            let ctx = MatchContext {
                info,
                local_no: numbers.local_no,
                global_no: numbers.global_no,
                file_no: numbers.file_no,
                captures: &caps,
                content: &text,
            };
            tracing::trace!(id = %info.id, global_no = numbers.global_no, "match");
            visit(&ctx).map_err(Error::transform)?;
        }
        Ok(())
    })
}

/// Map every match of `pattern` in the selected items to a value.
///
/// Values are buffered per item and kept only once the whole item has been
/// scanned. When `map` fails under [`ErrorPolicy::Skip`], nothing from that
/// item is returned and the counters rewind to where they stood before it.
///
/// [`ErrorPolicy::Skip`]: crate::ErrorPolicy::Skip
pub fn match_map<S, P, T, F, E>(
    store: &mut S,
    batch: &Batch<'_>,
    pattern: &P,
    mut map: F,
) -> Result<(Vec<T>, BatchStatus)>
where
    S: ContentStore + ?Sized,
    P: ToRegex + ?Sized,
    F: FnMut(&MatchContext<'_>) -> std::result::Result<T, E>,
    E: Into<BoxError>,
{
    let re = pattern.to_regex()?;
    let mut counters = Counters::default();
    let mut values = Vec::new();
    let status = batch.run(store, &mut counters, |store, info, counters| {
        let content = store.read(&info.id)?;
        let text = content.decode();
        let mut pending = Vec::new();
        for caps in re.captures_iter(&text) {
            let numbers = counters.advance();
            let ctx = MatchContext {
                info,
                local_no: numbers.local_no,
                global_no: numbers.global_no,
                file_no: numbers.file_no,
                captures: &caps,
                content: &text,
            };
            pending.push(map(&ctx).map_err(Error::transform)?);
        }
        tracing::trace!(id = %info.id, matches = pending.len(), "item scanned");
        values.append(&mut pending);
        Ok(())
    })?;
    Ok((values, status))
}

/// Collect every match of `pattern` in the selected items.
pub fn find_all<S, P>(store: &mut S, batch: &Batch<'_>, pattern: &P) -> Result<Vec<MatchRecord>>
where
    S: ContentStore + ?Sized,
    P: ToRegex + ?Sized,
{
    let (records, _) = match_map(store, batch, pattern, |ctx| {
        let range = ctx.range();
        Ok::<_, Error>(MatchRecord {
            id: ctx.id().to_string(),
            href: ctx.href().to_string(),
            local_no: ctx.local_no,
            global_no: ctx.global_no,
            file_no: ctx.file_no,
            start: range.start,
            end: range.end,
            text: ctx.as_str().to_string(),
        })
    })?;
    Ok(records)
}

/// Replace every match of `pattern` in the selected items.
///
/// An item is written back only when the substituted content differs from the
/// stored content. When a replacement fails under [`ErrorPolicy::Skip`], the
/// counters rewind to where they stood before that item.
///
/// [`ErrorPolicy::Skip`]: crate::ErrorPolicy::Skip
///
/// # Example
///
/// ```
/// use folio::{Batch, MemoryStore, match_substitute};
///
/// let mut store = MemoryStore::new()
///     .with_item("A", "a.xhtml", "application/xhtml+xml", "foo bar foo")
///     .with_item("B", "b.xhtml", "application/xhtml+xml", "bar bar");
///
/// let status = match_substitute(&mut store, &Batch::text(), "foo", "baz").unwrap();
/// assert_eq!(store.text("A"), Some("baz bar baz"));
/// assert_eq!(store.writes("B"), 0);
/// assert!(status.is_success());
/// ```
pub fn match_substitute<'r, S, P, R>(
    store: &mut S,
    batch: &Batch<'_>,
    pattern: &P,
    replacement: R,
) -> Result<BatchStatus>
where
    S: ContentStore + ?Sized,
    P: ToRegex + ?Sized,
    R: Into<Replacement<'r>>,
{
    let re = pattern.to_regex()?;
    let mut replacement = replacement.into();
    let mut counters = Counters::default();
    batch.run(store, &mut counters, |store, info, counters| {
        let original = store.read(&info.id)?;
        let text = original.decode();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in re.captures_iter(&text) {
            let Some(m) = caps.get(0) else { continue };
            let numbers = counters.advance();
            out.push_str(&text[last..m.start()]);
            match &mut replacement {
                Replacement::Literal(template) => caps.expand(template, &mut out),
                Replacement::Func(f) => out.push_str(&f(&caps).map_err(Error::TransformFailed)?),
                Replacement::WithContext(f) => {
                    let ctx = MatchContext {
                        info,
                        local_no: numbers.local_no,
                        global_no: numbers.global_no,
                        file_no: numbers.file_no,
                        captures: &caps,
                        content: &text,
                    };
                    out.push_str(&f(&ctx).map_err(Error::TransformFailed)?);
                }
            }
            last = m.end();
        }

        if counters.local_no == 0 {
            return Ok(());
        }
        out.push_str(&text[last..]);
        tracing::debug!(id = %info.id, matches = counters.local_no, "substituted");
        let updated = original.same_kind(out);
        commit(store, &info.id, &original, EditOutcome::Written(updated)).map(drop)
    })
}
