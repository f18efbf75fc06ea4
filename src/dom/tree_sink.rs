//! html5ever TreeSink implementation for [`Document`].

use std::borrow::Cow;
use std::cell::{Ref, RefCell};

use html5ever::tendril::StrTendril;
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute as Html5Attribute, QualName};

use super::arena::{Attribute, Document, NodeData, NodeId};

/// Handle used by TreeSink to reference nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub NodeId);

impl Default for NodeHandle {
    fn default() -> Self {
        NodeHandle(NodeId::NONE)
    }
}

/// TreeSink that builds a [`Document`].
///
/// html5ever's TreeSink methods take `&self`, so the document sits in a RefCell.
pub struct DocumentSink {
    doc: RefCell<Document>,
    errors: RefCell<usize>,
}

impl Default for DocumentSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentSink {
    pub fn new() -> Self {
        Self {
            doc: RefCell::new(Document::new()),
            errors: RefCell::new(0),
        }
    }

    /// Consume the sink and return the document with its modified flag cleared.
    pub fn into_document(self) -> Document {
        let errors = self.errors.into_inner();
        if errors > 0 {
            tracing::trace!(errors, "markup parsed with recoverable errors");
        }
        let mut doc = self.doc.into_inner();
        doc.reset_modified();
        doc
    }
}

impl TreeSink for DocumentSink {
    type Handle = NodeHandle;
    type Output = Self;
    type ElemName<'a>
        = Ref<'a, QualName>
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {
        *self.errors.borrow_mut() += 1;
    }

    fn get_document(&self) -> Self::Handle {
        NodeHandle(self.doc.borrow().document())
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        static EMPTY: QualName = QualName {
            prefix: None,
            ns: html5ever::ns!(),
            local: html5ever::local_name!(""),
        };

        Ref::map(self.doc.borrow(), |doc| match doc.get(target.0).map(|n| &n.data) {
            Some(NodeData::Element { name, .. }) => name,
            _ => &EMPTY,
        })
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Html5Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let attrs = attrs
            .into_iter()
            .map(|a| Attribute {
                name: a.name,
                value: a.value.to_string(),
            })
            .collect();
        NodeHandle(self.doc.borrow_mut().create_element_ns(name, attrs))
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        NodeHandle(self.doc.borrow_mut().create_comment(text.to_string()))
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Self::Handle {
        NodeHandle(self.doc.borrow_mut().create_comment(String::new()))
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        let mut doc = self.doc.borrow_mut();
        match child {
            NodeOrText::AppendNode(node) => doc.append(parent.0, node.0),
            NodeOrText::AppendText(text) => doc.append_text(parent.0, &text),
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        let parent = self.doc.borrow().parent(element.0);
        match parent {
            Some(_) => self.append_before_sibling(element, child),
            None => self.append(prev_element, child),
        }
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        let mut doc = self.doc.borrow_mut();
        let root = doc.document();
        let doctype = doc.create_doctype(
            name.to_string(),
            public_id.to_string(),
            system_id.to_string(),
        );
        doc.append(root, doctype);
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        *target
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        x.0 == y.0
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn append_before_sibling(&self, sibling: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let mut doc = self.doc.borrow_mut();
        let node = match new_node {
            NodeOrText::AppendNode(node) => node.0,
            NodeOrText::AppendText(text) => doc.create_text(text.to_string()),
        };
        doc.insert_before(sibling.0, node);
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<Html5Attribute>) {
        let mut doc = self.doc.borrow_mut();
        if let Some(node) = doc.get_mut(target.0)
            && let NodeData::Element {
                attrs: existing, ..
            } = &mut node.data
        {
            for attr in attrs {
                if !existing.iter().any(|a| a.name == attr.name) {
                    existing.push(Attribute {
                        name: attr.name,
                        value: attr.value.to_string(),
                    });
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        self.doc.borrow_mut().detach(target.0);
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        self.doc.borrow_mut().reparent_children(node.0, new_parent.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse;

    #[test]
    fn test_basic_parse() {
        let doc = parse("<html><body><p>Hello</p></body></html>");
        assert!(!doc.is_modified());

        let p = doc.find_by_tag("p").expect("should find p");
        assert_eq!(doc.tag_name(p), Some("p"));

        let text_id = doc.children(p).next().expect("p should have child");
        assert_eq!(doc.text(text_id), Some("Hello"));
    }

    #[test]
    fn test_attributes() {
        let doc = parse(r#"<div id="main" class="container header">Content</div>"#);

        let div = doc.find_by_tag("div").expect("should find div");
        assert_eq!(doc.element_id(div), Some("main"));
        let classes: Vec<_> = doc.classes(div).collect();
        assert_eq!(classes, ["container", "header"]);
    }

    #[test]
    fn test_implied_structure() {
        let doc = parse("<p>loose</p>");
        assert!(doc.head().is_some());
        assert!(doc.body().is_some());
        let p = doc.find_by_tag("p").unwrap();
        assert_eq!(doc.parent(p), doc.body());
    }

    #[test]
    fn test_misnested_table_content_is_fostered() {
        let doc = parse("<table><tr><td>x</td></tr>stray</table>");
        let table = doc.find_by_tag("table").unwrap();
        let body = doc.body().unwrap();
        assert_eq!(doc.parent(table), Some(body));
        assert!(doc.text_content(body).contains("stray"));
    }

    #[test]
    fn test_implied_end_tags_close_open_items() {
        // closing items looks up open element names while the tree is being built
        let doc = parse("<ul><li>one<li>two</ul><dl><dt>a<dd>b<dt>c</dl><p>x<p>y");
        assert_eq!(doc.find_all_by_tag("li").count(), 2);
        let ul = doc.find_by_tag("ul").unwrap();
        assert_eq!(doc.element_children(ul).count(), 2);
        let dl = doc.find_by_tag("dl").unwrap();
        assert_eq!(doc.element_children(dl).count(), 3);
        assert_eq!(doc.find_all_by_tag("p").count(), 2);
    }
}
