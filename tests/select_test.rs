//! Element search tests.
//!
//! Runs XPath and CSS selectors over small books and checks numbering,
//! write-back, and how selector options change what matches.

use folio::{
    Batch, CompiledSelector, CssDialect, Error, ErrorPolicy, MemoryStore, Predicate, SelectorKind,
    SelectorOptions, find_elements, map_elements, select_all,
};

const XHTML: &str = "application/xhtml+xml";
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

fn book() -> MemoryStore {
    MemoryStore::new()
        .with_item(
            "ch1",
            "Text/ch1.xhtml",
            XHTML,
            r##"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>One</title></head><body>
<p>First<a class="noteref" href="#n1">1</a> and second<a class="noteref" href="#n2">2</a>.</p>
<aside id="n1" class="footnote"><p>Note one.</p></aside>
<aside id="n2" class="footnote"><p>Note two.</p></aside>
</body></html>"##,
        )
        .with_item("css", "Styles/main.css", "text/css", ".footnote { font-size: small }")
        .with_item(
            "ch2",
            "Text/ch2.xhtml",
            XHTML,
            r##"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Two</title></head><body>
<p>Nothing to see.</p>
</body></html>"##,
        )
        .with_item(
            "ch3",
            "Text/ch3.xhtml",
            XHTML,
            r##"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Three</title></head><body>
<p>Third<a class="noteref" href="#n3">3</a>.</p>
<aside id="n3" class="footnote"><p>Note three.</p></aside>
</body></html>"##,
        )
}

// ============================================================================
// Selection Tests
// ============================================================================

#[test]
fn test_numbering_skips_nothing_for_empty_items() {
    let mut store = book();
    let found = select_all(&mut store, &Batch::text(), &CompiledSelector::css("aside.footnote").unwrap()).unwrap();

    let summary: Vec<_> = found
        .iter()
        .map(|e| (e.id.as_str(), e.local_no, e.global_no, e.file_no))
        .collect();
    assert_eq!(summary, [("ch1", 1, 1, 1), ("ch1", 2, 2, 1), ("ch3", 1, 3, 3)]);
    assert_eq!(found[0].tag, "aside");
    assert_eq!(
        found[2].markup,
        r#"<aside id="n3" class="footnote"><p>Note three.</p></aside>"#
    );
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_xpath_functions() {
    let mut store = book();
    let notes = CompiledSelector::xpath("//a[contains(@class, 'noteref')][starts-with(@href, '#n')]").unwrap();
    assert_eq!(select_all(&mut store, &Batch::text(), &notes).unwrap().len(), 3);

    let last = CompiledSelector::xpath("//aside[last()]/p").unwrap();
    let found = select_all(&mut store, &Batch::text(), &last).unwrap();
    let texts: Vec<_> = found.iter().map(|e| e.markup.as_str()).collect();
    assert_eq!(texts, ["<p>Note two.</p>", "<p>Note three.</p>"]);

    let by_text = CompiledSelector::xpath("//p[normalize-space(.) = 'Nothing to see.']").unwrap();
    let found = select_all(&mut store, &Batch::text(), &by_text).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].id.as_str(), found[0].file_no), ("ch2", 2));
}

#[test]
fn test_default_namespace_binding() {
    let mut store = book();
    let options = SelectorOptions::new().with_namespace("", XHTML_NS);
    let selector = CompiledSelector::compile("//aside/p", SelectorKind::Path, &options).unwrap();
    assert_eq!(select_all(&mut store, &Batch::text(), &selector).unwrap().len(), 3);

    let options = SelectorOptions::new().with_namespace("", "urn:other");
    let selector = CompiledSelector::compile("//aside/p", SelectorKind::Path, &options).unwrap();
    assert!(select_all(&mut store, &Batch::text(), &selector).unwrap().is_empty());

    let err = CompiledSelector::compile("//q:aside", SelectorKind::Path, &SelectorOptions::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidSelector(_)));
}

#[test]
fn test_html_dialect() {
    let mut store = book();
    let xml = CompiledSelector::compile("ASIDE", SelectorKind::CssLike, &SelectorOptions::new()).unwrap();
    assert!(select_all(&mut store, &Batch::text(), &xml).unwrap().is_empty());

    let options = SelectorOptions::new().with_dialect(CssDialect::Html);
    let html = CompiledSelector::compile("ASIDE", SelectorKind::CssLike, &options).unwrap();
    assert_eq!(select_all(&mut store, &Batch::text(), &html).unwrap().len(), 3);
}

#[test]
fn test_predicate_limits_items() {
    let mut store = book();
    let batch = Batch::text().predicate(Predicate::by_id_href(|_, href| href.ends_with("ch3.xhtml")));
    let found = select_all(&mut store, &batch, &CompiledSelector::css("a.noteref").unwrap()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].local_no, found[0].global_no, found[0].file_no), (1, 1, 1));
}

// ============================================================================
// Editing Tests
// ============================================================================

#[test]
fn test_renumber_footnotes_across_items() {
    let mut store = book();
    let selector = CompiledSelector::css("a.noteref").unwrap();
    let status = find_elements(&mut store, &Batch::text(), &selector, |hit| {
        let label = hit.global_no.to_string();
        hit.doc.set_text(hit.node, label);
        hit.doc.set_attr(hit.node, "id", format!("ref{}", hit.global_no));
        Ok::<_, Error>(())
    })
    .unwrap();

    assert!(status.is_success());
    assert_eq!(status.len(), 3);
    assert_eq!(store.writes("ch1"), 1);
    assert_eq!(store.writes("ch2"), 0);
    assert_eq!(store.writes("ch3"), 1);
    assert!(store.text("ch1").unwrap().contains(r##"<a class="noteref" href="#n2" id="ref2">2</a>"##));
    assert!(store.text("ch3").unwrap().contains(r##"<a class="noteref" href="#n3" id="ref3">3</a>"##));
}

#[test]
fn test_raise_stops_before_later_items() {
    let mut store = book();
    let selector = CompiledSelector::css("aside").unwrap();
    let err = find_elements(
        &mut store,
        &Batch::text().on_error(ErrorPolicy::Raise),
        &selector,
        |hit| {
            hit.doc.set_attr(hit.node, "hidden", "hidden");
            if hit.local_no == 2 {
                return Err("too many notes");
            }
            Ok(())
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::TransformFailed(_)));
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_skipped_item_contributes_no_elements() {
    let mut store = book();
    let selector = CompiledSelector::css("aside.footnote").unwrap();
    let (found, status) = map_elements(
        &mut store,
        &Batch::text().on_error(ErrorPolicy::Skip),
        &selector,
        |hit| {
            if hit.id() == "ch1" && hit.local_no == 2 {
                return Err("bad note");
            }
            let note = hit.doc.get_attr(hit.node, "id").unwrap_or_default().to_string();
            Ok((hit.id().to_string(), hit.global_no, note))
        },
    )
    .unwrap();

    assert_eq!(status.get("ch1"), Some(false));
    assert_eq!(status.get("ch3"), Some(true));
    assert_eq!(found, [("ch3".to_string(), 1, "n3".to_string())]);
    assert_eq!(store.total_writes(), 0);
}
