//! Item filters.
//!
//! Callers filter items with functions of several shapes: no arguments, the id only,
//! id and href, or the full `(id, href, mimetype)` triple. [`Predicate`] captures
//! the shape once at construction so that every test is a plain call.

use std::fmt;

use regex::Regex;

use crate::error::{Error, Result};

type Nullary<'a> = Box<dyn Fn() -> bool + 'a>;
type ById<'a> = Box<dyn Fn(&str) -> bool + 'a>;
type ByIdHref<'a> = Box<dyn Fn(&str, &str) -> bool + 'a>;
type Full<'a> = Box<dyn Fn(&str, &str, &str) -> bool + 'a>;

/// A filter over `(id, href, mimetype)`.
///
/// # Example
///
/// ```
/// use folio::Predicate;
///
/// let only_a = Predicate::by_id(|id| id == "A");
/// assert!(only_a.test("A", "a.xhtml", "application/xhtml+xml"));
/// assert!(!only_a.test("B", "b.xhtml", "application/xhtml+xml"));
/// ```
#[derive(Default)]
pub enum Predicate<'a> {
    #[default]
    Always,
    Nullary(Nullary<'a>),
    ById(ById<'a>),
    ByIdHref(ByIdHref<'a>),
    Full(Full<'a>),
    AllOf(Vec<Predicate<'a>>),
    AnyOf(Vec<Predicate<'a>>),
}

impl<'a> Predicate<'a> {
    /// Accept every item.
    pub fn always() -> Self {
        Predicate::Always
    }

    /// A filter that ignores the item entirely.
    pub fn nullary(f: impl Fn() -> bool + 'a) -> Self {
        Predicate::Nullary(Box::new(f))
    }

    pub fn by_id(f: impl Fn(&str) -> bool + 'a) -> Self {
        Predicate::ById(Box::new(f))
    }

    pub fn by_id_href(f: impl Fn(&str, &str) -> bool + 'a) -> Self {
        Predicate::ByIdHref(Box::new(f))
    }

    /// A filter over the full `(id, href, mimetype)` triple.
    pub fn new(f: impl Fn(&str, &str, &str) -> bool + 'a) -> Self {
        Predicate::Full(Box::new(f))
    }

    pub fn all_of(preds: impl IntoIterator<Item = Predicate<'a>>) -> Self {
        Predicate::AllOf(preds.into_iter().collect())
    }

    pub fn any_of(preds: impl IntoIterator<Item = Predicate<'a>>) -> Self {
        Predicate::AnyOf(preds.into_iter().collect())
    }

    /// Accept only the listed ids.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        Predicate::by_id(move |id| ids.iter().any(|x| x == id))
    }

    pub fn test(&self, id: &str, href: &str, mimetype: &str) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Nullary(f) => f(),
            Predicate::ById(f) => f(id),
            Predicate::ByIdHref(f) => f(id, href),
            Predicate::Full(f) => f(id, href, mimetype),
            Predicate::AllOf(preds) => preds.iter().all(|p| p.test(id, href, mimetype)),
            Predicate::AnyOf(preds) => preds.iter().any(|p| p.test(id, href, mimetype)),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }
}

impl Predicate<'static> {
    /// Parse a textual filter.
    ///
    /// Terms are separated by commas and must all hold:
    ///
    /// - `id:<regex>` matches the manifest id
    /// - `href:<regex>` matches the href
    /// - `mime:<prefix>` matches the start of the mimetype
    ///
    /// An empty expression accepts everything.
    pub fn parse(expr: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for term in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (field, value) = term.split_once(':').ok_or_else(|| {
                Error::PredicateAdaptationFailed(format!("expected field:value, got {term:?}"))
            })?;
            let pred = match field.trim() {
                "id" => {
                    let re = compile(value)?;
                    Predicate::by_id(move |id| re.is_match(id))
                }
                "href" => {
                    let re = compile(value)?;
                    Predicate::by_id_href(move |_, href| re.is_match(href))
                }
                "mime" => {
                    let prefix = value.to_ascii_lowercase();
                    Predicate::new(move |_, _, mime| mime.to_ascii_lowercase().starts_with(&prefix))
                }
                other => {
                    return Err(Error::PredicateAdaptationFailed(format!(
                        "unknown field {other:?}"
                    )));
                }
            };
            terms.push(pred);
        }
        Ok(match terms.len() {
            0 => Predicate::Always,
            1 => terms.remove(0),
            _ => Predicate::AllOf(terms),
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::PredicateAdaptationFailed(e.to_string()))
}

impl fmt::Debug for Predicate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => f.write_str("Always"),
            Predicate::Nullary(_) => f.write_str("Nullary(..)"),
            Predicate::ById(_) => f.write_str("ById(..)"),
            Predicate::ByIdHref(_) => f.write_str("ByIdHref(..)"),
            Predicate::Full(_) => f.write_str("Full(..)"),
            Predicate::AllOf(p) => f.debug_tuple("AllOf").field(p).finish(),
            Predicate::AnyOf(p) => f.debug_tuple("AnyOf").field(p).finish(),
        }
    }
}
