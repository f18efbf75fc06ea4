//! selectors crate bindings for [`Document`].
//!
//! This is what lets CSS selector matching run against the arena tree.

use std::collections::HashMap;
use std::fmt;

use html5ever::{LocalName, Namespace, ns};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::context::MatchingContext;
use selectors::matching::ElementSelectorFlags;
use selectors::parser::SelectorParseErrorKind;
use selectors::{OpaqueElement, SelectorImpl};

use crate::dom::{Document, Node, NodeData, NodeId};

/// Selector vocabulary for matching against [`Document`] elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolioSelectors;

/// Newtypes that give the selectors crate the hashing, `ToCss` and
/// conversions it needs for each string-like slot.
macro_rules! css_atom {
    ($(#[$meta:meta])* $name:ident($inner:ty), |$atom:ident| $hash:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub $inner);

        impl precomputed_hash::PrecomputedHash for $name {
            fn precomputed_hash(&self) -> u32 {
                let $atom = &self.0;
                $hash
            }
        }

        impl cssparser::ToCss for $name {
            fn to_css<W: fmt::Write>(&self, dest: &mut W) -> fmt::Result {
                dest.write_str(self.as_ref())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_ref()
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(<$inner>::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(<$inner>::from(s))
            }
        }
    };
}

css_atom!(
    /// Class names, ids, attribute values and prefixes.
    CssString(String),
    |s| s.bytes().fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)))
);

css_atom!(
    /// An element or attribute local name.
    CssLocalName(LocalName),
    |name| precomputed_hash::PrecomputedHash::precomputed_hash(name)
);

css_atom!(
    /// A namespace URI.
    CssNamespace(Namespace),
    |url| precomputed_hash::PrecomputedHash::precomputed_hash(url)
);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PseudoElement {}

impl cssparser::ToCss for PseudoElement {
    fn to_css<W: fmt::Write>(&self, _dest: &mut W) -> fmt::Result {
        match *self {}
    }
}

impl selectors::parser::PseudoElement for PseudoElement {
    type Impl = FolioSelectors;

    fn accepts_state_pseudo_classes(&self) -> bool {
        false
    }

    fn valid_after_slotted(&self) -> bool {
        false
    }
}

/// No state pseudo-classes: documents are never rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NonTSPseudoClass {}

impl selectors::parser::NonTSPseudoClass for NonTSPseudoClass {
    type Impl = FolioSelectors;

    fn is_active_or_hover(&self) -> bool {
        match *self {}
    }

    fn is_user_action_state(&self) -> bool {
        match *self {}
    }
}

impl cssparser::ToCss for NonTSPseudoClass {
    fn to_css<W: fmt::Write>(&self, _dest: &mut W) -> fmt::Result {
        match *self {}
    }
}

impl SelectorImpl for FolioSelectors {
    type ExtraMatchingData<'a> = ();
    type AttrValue = CssString;
    type Identifier = CssString;
    type LocalName = CssLocalName;
    type NamespaceUrl = CssNamespace;
    type NamespacePrefix = CssString;
    type BorrowedLocalName = CssLocalName;
    type BorrowedNamespaceUrl = CssNamespace;
    type NonTSPseudoClass = NonTSPseudoClass;
    type PseudoElement = PseudoElement;
}

/// Selector parser that resolves namespace prefixes through a caller map.
///
/// The empty prefix, if present, names the default namespace.
pub struct NamespaceParser<'a> {
    pub namespaces: &'a HashMap<String, String>,
}

impl<'i> selectors::parser::Parser<'i> for NamespaceParser<'_> {
    type Impl = FolioSelectors;
    type Error = SelectorParseErrorKind<'i>;

    fn default_namespace(&self) -> Option<CssNamespace> {
        self.namespaces
            .get("")
            .map(|uri| CssNamespace::from(uri.as_str()))
    }

    fn namespace_for_prefix(&self, prefix: &CssString) -> Option<CssNamespace> {
        self.namespaces
            .get(&prefix.0)
            .map(|uri| CssNamespace::from(uri.as_str()))
    }
}

/// Reference to an element for selector matching.
///
/// `html` selects HTML matching rules: type and attribute selectors compare
/// names of XHTML elements ASCII case-insensitively.
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
    pub doc: &'a Document,
    pub id: NodeId,
    pub html: bool,
}

impl<'a> ElementRef<'a> {
    pub fn new(doc: &'a Document, id: NodeId, html: bool) -> Self {
        Self { doc, id, html }
    }

    fn with(&self, id: NodeId) -> Self {
        Self::new(self.doc, id, self.html)
    }

    /// Nearest element along a sibling link.
    fn sibling_element(&self, step: impl Fn(&Node) -> NodeId) -> Option<Self> {
        let mut current = step(self.doc.get(self.id)?);
        while current.is_some() {
            if self.doc.is_element(current) {
                return Some(self.with(current));
            }
            current = step(self.doc.get(current)?);
        }
        None
    }
}

impl fmt::Debug for ElementRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementRef")
            .field("id", &self.id)
            .field("name", &self.doc.element_name(self.id))
            .finish()
    }
}

impl selectors::Element for ElementRef<'_> {
    type Impl = FolioSelectors;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(self)
    }

    fn parent_element(&self) -> Option<Self> {
        self.doc.parent_element(self.id).map(|p| self.with(p))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.sibling_element(|node| node.prev_sibling)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.sibling_element(|node| node.next_sibling)
    }

    fn first_element_child(&self) -> Option<Self> {
        self.doc.element_children(self.id).next().map(|c| self.with(c))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        self.html && self.doc.element_namespace(self.id) == Some(&ns!(html))
    }

    fn has_local_name(&self, name: &CssLocalName) -> bool {
        self.doc
            .element_name(self.id)
            .is_some_and(|n| n == &name.0)
    }

    fn has_namespace(&self, ns: &CssNamespace) -> bool {
        self.doc
            .element_namespace(self.id)
            .is_some_and(|n| n == &ns.0)
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.doc.qual_name(self.id) == other.doc.qual_name(other.id)
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&CssNamespace>,
        local_name: &CssLocalName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        self.doc.attrs(self.id).iter().any(|attr| {
            let ns_match = match ns {
                NamespaceConstraint::Any => true,
                NamespaceConstraint::Specific(ns) => attr.name.ns == ns.0,
            };
            ns_match && attr.name.local == local_name.0 && operation.eval_str(&attr.value)
        })
    }

    fn match_non_ts_pseudo_class(
        &self,
        pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        match *pc {}
    }

    fn match_pseudo_element(
        &self,
        pe: &PseudoElement,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        match *pe {}
    }

    fn is_link(&self) -> bool {
        self.doc.is_tag(self.id, "a") && self.doc.get_attr(self.id, "href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.doc
            .element_id(self.id)
            .is_some_and(|value| case_sensitivity.eq(value.as_bytes(), id.0.as_bytes()))
    }

    fn has_class(&self, name: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.doc
            .classes(self.id)
            .any(|c| case_sensitivity.eq(c.as_bytes(), name.0.as_bytes()))
    }

    fn imported_part(&self, _name: &CssString) -> Option<CssString> {
        None
    }

    fn is_part(&self, _name: &CssString) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.doc.children(self.id).all(|child| match self.doc.get(child).map(|n| &n.data) {
            Some(NodeData::Element { .. }) => false,
            Some(NodeData::Text(t)) => t.is_empty(),
            _ => true,
        })
    }

    fn is_root(&self) -> bool {
        self.doc.parent(self.id) == Some(self.doc.document())
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn add_element_unique_hashes(&self, _filter: &mut selectors::bloom::BloomFilter) -> bool {
        false
    }

    fn has_custom_state(&self, _name: &CssString) -> bool {
        false
    }
}
