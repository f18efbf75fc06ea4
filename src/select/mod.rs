//! Selector-driven element search across text items.
//!
//! An expression is either a path expression ([`SelectorKind::Path`], an
//! XPath 1.0 subset) or a CSS selector ([`SelectorKind::CssLike`]). Both
//! compile to a [`CompiledSelector`], which can be reused across calls.
//!
//! [`find_elements`] parses every selected text item, evaluates the selector,
//! and hands each matching element to a visitor together with its
//! correlation numbers. Items without matches produce nothing and are never
//! written. Items with matches are written back only if the visitor changed
//! the tree.

mod css;
mod element_ref;
mod xpath;

pub use css::CssSelector;
pub use element_ref::{ElementRef, FolioSelectors};
pub use xpath::XPath;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::batch::{Batch, BatchStatus, Counters};
use crate::dom::{Document, NodeId, SerializeMethod, outer_markup};
use crate::error::{BoxError, Error, Result};
use crate::session::{EditOutcome, MarkupCodec, commit, parse_item, serialize_item};
use crate::store::{ContentStore, ItemInfo};

/// The XHTML namespace, for binding a prefix such as `h`.
pub const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Which language an expression is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum SelectorKind {
    Path,
    #[default]
    CssLike,
}

impl FromStr for SelectorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xpath" | "path" => Ok(SelectorKind::Path),
            "css" | "cssselect" => Ok(SelectorKind::CssLike),
            other => Err(format!("unknown selector type: {other}")),
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectorKind::Path => "xpath",
            SelectorKind::CssLike => "css",
        })
    }
}

/// How CSS selectors compare names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CssDialect {
    /// Names compare exactly.
    #[default]
    Xml,
    /// Names of XHTML elements and their attributes compare ASCII case-insensitively.
    Html,
}

/// Compilation options shared by both selector kinds.
///
/// `namespaces` maps prefixes to namespace URIs. An entry for the empty prefix
/// sets the default namespace for unprefixed element names.
#[derive(Debug, Clone, Default)]
pub struct SelectorOptions {
    pub namespaces: HashMap<String, String>,
    pub dialect: CssDialect,
}

impl SelectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), uri.into());
        self
    }

    pub fn with_dialect(mut self, dialect: CssDialect) -> Self {
        self.dialect = dialect;
        self
    }
}

/// A selector ready to run against documents.
#[derive(Debug, Clone)]
pub enum CompiledSelector {
    Path(XPath),
    Css(CssSelector),
}

impl CompiledSelector {
    /// Compile `expr` as the given kind.
    ///
    /// Syntax errors and unknown namespace prefixes are [`Error::InvalidSelector`].
    pub fn compile(expr: &str, kind: SelectorKind, options: &SelectorOptions) -> Result<Self> {
        let compiled = match kind {
            SelectorKind::Path => CompiledSelector::Path(XPath::compile(expr, &options.namespaces)?),
            SelectorKind::CssLike => CompiledSelector::Css(CssSelector::compile(
                expr,
                &options.namespaces,
                options.dialect == CssDialect::Html,
            )?),
        };
        tracing::debug!(expr, %kind, "compiled selector");
        Ok(compiled)
    }

    /// Compile a path expression with no namespace bindings.
    pub fn xpath(expr: &str) -> Result<Self> {
        Self::compile(expr, SelectorKind::Path, &SelectorOptions::default())
    }

    /// Compile a CSS selector with no namespace bindings.
    pub fn css(expr: &str) -> Result<Self> {
        Self::compile(expr, SelectorKind::CssLike, &SelectorOptions::default())
    }

    pub fn kind(&self) -> SelectorKind {
        match self {
            CompiledSelector::Path(_) => SelectorKind::Path,
            CompiledSelector::Css(_) => SelectorKind::CssLike,
        }
    }

    /// Matching elements of `doc`, in document order.
    pub fn select(&self, doc: &Document) -> Vec<NodeId> {
        match self {
            CompiledSelector::Path(xpath) => xpath.select(doc),
            CompiledSelector::Css(css) => css.select(doc),
        }
    }
}

impl From<XPath> for CompiledSelector {
    fn from(xpath: XPath) -> Self {
        CompiledSelector::Path(xpath)
    }
}

impl From<CssSelector> for CompiledSelector {
    fn from(css: CssSelector) -> Self {
        CompiledSelector::Css(css)
    }
}

/// A matched element handed to the [`find_elements`] visitor.
///
/// The document may be edited freely; the item is written back after its last
/// element has been visited if the document changed.
pub struct ElementHit<'a> {
    pub info: &'a ItemInfo,
    pub doc: &'a mut Document,
    pub node: NodeId,
    pub local_no: usize,
    pub global_no: usize,
    pub file_no: usize,
}

impl ElementHit<'_> {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn href(&self) -> &str {
        &self.info.href
    }

    pub fn tag(&self) -> Option<&str> {
        self.doc.tag_name(self.node)
    }

    pub fn text(&self) -> String {
        self.doc.text_content(self.node)
    }

    /// Serialized markup of the element, in the item's output flavour.
    pub fn markup(&self) -> String {
        let xml = SerializeMethod::Auto.resolve(&self.info.mimetype) == SerializeMethod::Xhtml;
        outer_markup(self.doc, self.node, xml)
    }

    pub fn counters(&self) -> Counters {
        Counters {
            local_no: self.local_no,
            global_no: self.global_no,
            file_no: self.file_no,
        }
    }
}

/// An owned summary of a matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct ElementInfo {
    pub id: String,
    pub href: String,
    pub local_no: usize,
    pub global_no: usize,
    pub file_no: usize,
    pub tag: String,
    pub markup: String,
}

/// Visit every element matched by `selector` in the selected text items.
///
/// Matches are computed once per item before the first visit. Counters follow
/// the same rules as pattern matching, counted over elements.
///
/// # Example
///
/// ```
/// use folio::{Batch, CompiledSelector, MemoryStore, find_elements};
///
/// let mut store = MemoryStore::new().with_item(
///     "A",
///     "a.xhtml",
///     "text/html",
///     "<html><head></head><body><p>one</p><p>two</p></body></html>",
/// );
///
/// let selector = CompiledSelector::css("p").unwrap();
/// find_elements(&mut store, &Batch::text(), &selector, |hit| {
///     let n = hit.global_no.to_string();
///     hit.doc.set_attr(hit.node, "data-n", n);
///     Ok::<_, folio::Error>(())
/// })
/// .unwrap();
///
/// assert!(store.text("A").unwrap().contains(r#"<p data-n="2">two</p>"#));
/// ```
pub fn find_elements<S, F, E>(
    store: &mut S,
    batch: &Batch<'_>,
    selector: &CompiledSelector,
    visit: F,
) -> Result<BatchStatus>
where
    S: ContentStore + ?Sized,
    F: FnMut(&mut ElementHit<'_>) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    map_elements(store, batch, selector, visit).map(|(_, status)| status)
}

/// Map every element matched by `selector` to a value.
///
/// Values are buffered per item and kept only once the item has been visited
/// and, if the tree changed, written back. An item that fails under
/// [`ErrorPolicy::Skip`] contributes nothing.
///
/// [`ErrorPolicy::Skip`]: crate::ErrorPolicy::Skip
pub fn map_elements<S, T, F, E>(
    store: &mut S,
    batch: &Batch<'_>,
    selector: &CompiledSelector,
    mut map: F,
) -> Result<(Vec<T>, BatchStatus)>
where
    S: ContentStore + ?Sized,
    F: FnMut(&mut ElementHit<'_>) -> std::result::Result<T, E>,
    E: Into<BoxError>,
{
    let codec = MarkupCodec::default();
    let mut counters = Counters::default();
    let mut values = Vec::new();
    let status = batch.run_text(store, &mut counters, |store, info, counters| {
        let original = store.read(&info.id)?;
        let mut doc = parse_item(&codec, info, &original)?;
        let nodes = selector.select(&doc);
        if nodes.is_empty() {
            tracing::trace!(id = %info.id, "no matching elements");
            return Ok(());
        }

        tracing::debug!(id = %info.id, matches = nodes.len(), "visiting elements");
        let mut pending = Vec::with_capacity(nodes.len());
        for node in nodes {
            let numbers = counters.advance();
            let mut hit = ElementHit {
                info,
                doc: &mut doc,
                node,
                local_no: numbers.local_no,
                global_no: numbers.global_no,
                file_no: numbers.file_no,
            };
            pending.push(map(&mut hit).map_err(Error::transform)?);
        }

        if doc.is_modified() {
            let content = serialize_item(&codec, info, &doc, &original)?;
            commit(store, &info.id, &original, EditOutcome::Written(content))?;
        }
        values.append(&mut pending);
        Ok(())
    })?;
    Ok((values, status))
}

/// Collect a summary of every element matched by `selector`.
pub fn select_all<S>(store: &mut S, batch: &Batch<'_>, selector: &CompiledSelector) -> Result<Vec<ElementInfo>>
where
    S: ContentStore + ?Sized,
{
    let (found, _) = map_elements(store, batch, selector, |hit| {
        Ok::<_, Error>(ElementInfo {
            id: hit.id().to_string(),
            href: hit.href().to_string(),
            local_no: hit.local_no,
            global_no: hit.global_no,
            file_no: hit.file_no,
            tag: hit.tag().unwrap_or_default().to_string(),
            markup: hit.markup(),
        })
    })?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ErrorPolicy;
    use crate::store::MemoryStore;

    const XHTML: &str = "application/xhtml+xml";

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_item(
                "A",
                "a.xhtml",
                XHTML,
                "<html><head></head><body><p class=\"x\">a1</p><p>a2</p></body></html>",
            )
            .with_item("css", "s.css", "text/css", "p.x {}")
            .with_item(
                "B",
                "b.xhtml",
                XHTML,
                "<html><head></head><body><div><p class=\"x\">b1</p></div></body></html>",
            )
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("XPath".parse::<SelectorKind>(), Ok(SelectorKind::Path));
        assert_eq!("cssselect".parse::<SelectorKind>(), Ok(SelectorKind::CssLike));
        assert!("regex".parse::<SelectorKind>().is_err());
        assert_eq!(SelectorKind::default(), SelectorKind::CssLike);
    }

    #[test]
    fn test_both_kinds_agree() {
        let mut store = store();
        let css = select_all(&mut store, &Batch::text(), &CompiledSelector::css("p.x").unwrap()).unwrap();
        let xpath = select_all(
            &mut store,
            &Batch::text(),
            &CompiledSelector::xpath("//p[@class='x']").unwrap(),
        )
        .unwrap();
        assert_eq!(css, xpath);
        assert_eq!(css.len(), 2);
        assert_eq!(css[1].markup, "<p class=\"x\">b1</p>");
    }

    #[test]
    fn test_counters_over_elements() {
        let mut store = store();
        let found = select_all(&mut store, &Batch::text(), &CompiledSelector::css("p").unwrap()).unwrap();
        let numbers: Vec<_> = found.iter().map(|e| (e.local_no, e.global_no, e.file_no)).collect();
        assert_eq!(numbers, [(1, 1, 1), (2, 2, 1), (1, 3, 2)]);
    }

    #[test]
    fn test_zero_matches_writes_nothing() {
        let mut store = store();
        let mut visits = 0;
        let status = find_elements(&mut store, &Batch::text(), &CompiledSelector::css("table").unwrap(), |_| {
            visits += 1;
            Ok::<_, Error>(())
        })
        .unwrap();
        assert_eq!(visits, 0);
        assert!(status.is_success());
        assert_eq!(store.total_writes(), 0);
    }

    #[test]
    fn test_only_modified_items_are_written() {
        let mut store = store();
        find_elements(&mut store, &Batch::text(), &CompiledSelector::css("p").unwrap(), |hit| {
            if hit.id() == "B" {
                hit.doc.set_text(hit.node, "changed");
            }
            Ok::<_, Error>(())
        })
        .unwrap();
        assert_eq!(store.writes("A"), 0);
        assert_eq!(store.writes("B"), 1);
        assert!(store.text("B").unwrap().contains("<p class=\"x\">changed</p>"));
    }

    #[test]
    fn test_skip_discards_item_edits_and_numbers() {
        let mut store = store();
        let mut seen = Vec::new();
        let status = find_elements(
            &mut store,
            &Batch::text().on_error(ErrorPolicy::Skip),
            &CompiledSelector::css("p").unwrap(),
            |hit| {
                hit.doc.set_attr(hit.node, "seen", "1");
                if hit.id() == "A" && hit.local_no == 2 {
                    return Err("stop");
                }
                seen.push(hit.counters());
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(status.get("A"), Some(false));
        assert_eq!(store.writes("A"), 0);
        assert_eq!(store.writes("B"), 1);
        // B was numbered as if A had never been visited
        assert_eq!(
            seen.last().copied(),
            Some(Counters {
                local_no: 1,
                global_no: 1,
                file_no: 1
            })
        );
    }

    #[test]
    fn test_namespaced_options() {
        let mut store = store();
        let options = SelectorOptions::new().with_namespace("h", XHTML_NAMESPACE);
        let xpath = CompiledSelector::compile("//h:div/h:p", SelectorKind::Path, &options).unwrap();
        let css = CompiledSelector::compile("h|div > h|p", SelectorKind::CssLike, &options).unwrap();
        assert_eq!(select_all(&mut store, &Batch::text(), &xpath).unwrap().len(), 1);
        assert_eq!(select_all(&mut store, &Batch::text(), &css).unwrap().len(), 1);
        assert_eq!(xpath.kind(), SelectorKind::Path);
    }

    #[test]
    fn test_invalid_selector() {
        assert!(matches!(CompiledSelector::css("p["), Err(Error::InvalidSelector(_))));
        assert!(matches!(CompiledSelector::xpath("//p["), Err(Error::InvalidSelector(_))));
    }
}
