//! CSS selector compilation and matching.

use std::collections::HashMap;

use cssparser::{Parser, ParserInput};
use selectors::context::{MatchingContext, SelectorCaches};
use selectors::parser::{ParseRelative, Selector, SelectorList};

use super::element_ref::{ElementRef, FolioSelectors, NamespaceParser};
use crate::dom::{Document, NodeId};
use crate::error::{Error, Result};

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone)]
pub struct CssSelector {
    selectors: Vec<Selector<FolioSelectors>>,
    html: bool,
}

impl CssSelector {
    /// Parse `source`, resolving `prefix|name` through `namespaces`.
    ///
    /// With `html` set, element and attribute names of XHTML elements are
    /// matched ASCII case-insensitively.
    pub fn compile(source: &str, namespaces: &HashMap<String, String>, html: bool) -> Result<Self> {
        let mut input = ParserInput::new(source);
        let mut parser = Parser::new(&mut input);
        let list = SelectorList::parse(&NamespaceParser { namespaces }, &mut parser, ParseRelative::No)
            .map_err(|err| Error::InvalidSelector(format!("{source:?}: {:?}", err.kind)))?;
        Ok(Self {
            selectors: list.slice().to_vec(),
            html,
        })
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let mut caches = SelectorCaches::default();
        self.matches_with_caches(doc, id, &mut caches)
    }

    fn matches_with_caches(&self, doc: &Document, id: NodeId, caches: &mut SelectorCaches) -> bool {
        if !doc.is_element(id) {
            return false;
        }
        let elem = ElementRef::new(doc, id, self.html);
        let mut context = MatchingContext::new(
            selectors::matching::MatchingMode::Normal,
            None,
            caches,
            selectors::context::QuirksMode::NoQuirks,
            selectors::matching::NeedsSelectorFlags::No,
            selectors::matching::MatchingForInvalidation::No,
        );

        self.selectors.iter().any(|selector| {
            selectors::matching::matches_selector(selector, 0, None, &elem, &mut context)
        })
    }

    /// Matching elements in document order.
    pub fn select(&self, doc: &Document) -> Vec<NodeId> {
        let mut caches = SelectorCaches::default();
        doc.elements()
            .filter(|&id| self.matches_with_caches(doc, id, &mut caches))
            .collect()
    }
}
