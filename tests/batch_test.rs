//! Batch iteration tests.
//!
//! Tests for visiting filtered items: selections, predicates, the three
//! observation modes, and how each error policy shapes the status map.

use folio::{
    Batch, Content, EditOutcome, Error, ErrorPolicy, MarkupCodec, MemoryStore, Predicate, Selection,
    edit_batch, edit_tree_batch,
};

const XHTML: &str = "application/xhtml+xml";

fn book() -> MemoryStore {
    MemoryStore::new()
        .with_item("nav", "nav.xhtml", XHTML, "<html><head></head><body><nav/></body></html>")
        .with_item("ch1", "Text/ch1.xhtml", XHTML, "<html><head></head><body><p>one</p></body></html>")
        .with_item("css", "Styles/main.css", "text/css", "p { margin: 0 }")
        .with_item("ch2", "Text/ch2.xhtml", XHTML, "<html><head></head><body><p>two</p></body></html>")
        .with_item("cover", "Images/cover.png", "image/png", vec![0x89, b'P', b'N', b'G'])
}

fn visited(batch: &Batch<'_>, store: &mut MemoryStore) -> Vec<String> {
    batch
        .each_content(store, |_| Ok::<_, Error>(EditOutcome::Unchanged))
        .unwrap()
        .iter()
        .map(|(id, _)| id.to_string())
        .collect()
}

// ============================================================================
// Selection and Predicate Tests
// ============================================================================

#[test]
fn test_default_batch_visits_everything() {
    let mut store = book();
    assert_eq!(visited(&Batch::new(), &mut store), ["nav", "ch1", "css", "ch2", "cover"]);
    assert_eq!(Batch::new().selection(), &Selection::All);
    assert_eq!(Batch::new().policy(), ErrorPolicy::Ignore);
}

#[test]
fn test_predicate_shapes_status() {
    let mut store = book();
    let batch = Batch::new().predicate(Predicate::by_id(|id| id == "ch1"));
    let status = batch
        .each_content(&mut store, |c| Ok::<_, Error>(EditOutcome::Written(c.clone())))
        .unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status.get("ch1"), Some(true));
    assert!(!status.contains("ch2"));
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_predicate_arities() {
    let mut store = book();

    let batch = Batch::text().predicate(Predicate::nullary(|| false));
    assert!(visited(&batch, &mut store).is_empty());

    let batch = Batch::new().predicate(Predicate::by_id_href(|_, href| href.starts_with("Text/")));
    assert_eq!(visited(&batch, &mut store), ["ch1", "ch2"]);

    let batch = Batch::new().predicate(Predicate::new(|_, _, mime| mime.starts_with("image/")));
    assert_eq!(visited(&batch, &mut store), ["cover"]);
}

#[test]
fn test_parsed_filter() {
    let mut store = book();
    let batch = Batch::new().predicate(Predicate::parse("href:^Text/, id:2$").unwrap());
    assert_eq!(visited(&batch, &mut store), ["ch2"]);

    let batch = Batch::new().predicate(Predicate::parse("mime:text/").unwrap());
    assert_eq!(visited(&batch, &mut store), ["css"]);

    assert!(matches!(Predicate::parse("size:10"), Err(Error::PredicateAdaptationFailed(_))));
    assert!(matches!(Predicate::parse("id:("), Err(Error::PredicateAdaptationFailed(_))));
}

#[test]
fn test_explicit_ids_keep_their_order() {
    let mut store = book();
    let batch = Batch::new()
        .ids(["ch2", "css", "ch1"])
        .predicate(Predicate::any_of([Predicate::ids(["ch1"]), Predicate::ids(["css"])]));
    assert_eq!(visited(&batch, &mut store), ["css", "ch1"]);
}

#[test]
fn test_repeated_ids_are_visited_once() {
    let mut store = book();
    let batch = Batch::new().ids(["css", "ch1", "css"]);
    let status = batch
        .each_content(&mut store, |content| {
            let text = format!("{}x", content.decode());
            Ok::<_, Error>(EditOutcome::Written(Content::from(text)))
        })
        .unwrap();

    assert_eq!(status.iter().map(|(id, _)| id).collect::<Vec<_>>(), ["css", "ch1"]);
    assert_eq!(store.text("css"), Some("p { margin: 0 }x"));
    assert_eq!(store.writes("css"), 1);
}

// ============================================================================
// Observation Mode Tests
// ============================================================================

#[test]
fn test_each_record_sees_file_numbers() {
    let mut store = book();
    let mut numbers = Vec::new();
    Batch::text()
        .each_record(&mut store, |record| {
            numbers.push((record.info.id.clone(), record.file_no));
            record.write_back = false;
            record.content = Content::from("lost");
            Ok::<_, Error>(())
        })
        .unwrap();
    assert_eq!(
        numbers,
        [("nav".to_string(), 1), ("ch1".to_string(), 2), ("ch2".to_string(), 3)]
    );
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_each_tree_with_write_back_cleared() {
    let mut store = book();
    let status = Batch::text()
        .each_tree(&mut store, &MarkupCodec::default(), |record| {
            if let Some(p) = record.tree.find_by_tag("p") {
                record.tree.set_attr(p, "class", "x");
            }
            record.write_back = record.info.id == "ch2";
            Ok::<_, Error>(())
        })
        .unwrap();
    assert!(status.is_success());
    assert_eq!(store.writes("ch1"), 0);
    assert_eq!(store.writes("ch2"), 1);
    assert_eq!(store.writes("nav"), 0);
    assert!(store.text("ch2").unwrap().contains("<p class=\"x\">two</p>"));
}

#[test]
fn test_edit_batch_reports_status_only() {
    let mut store = book();
    let status = edit_batch(&mut store, &Batch::text(), |content| {
        let text = content.decode();
        if text.contains("<nav/>") {
            return Err(Error::InvalidEpub("navigation is read-only".into()));
        }
        Ok(Content::from(text.replace("one", "ONE")))
    })
    .unwrap();
    assert_eq!(status.get("nav"), Some(false));
    assert_eq!(status.get("ch1"), Some(true));
    assert_eq!(status.get("ch2"), Some(true));
    assert_eq!(store.writes("ch1"), 1);
    assert_eq!(store.writes("ch2"), 0);
}

// ============================================================================
// Error Policy Tests
// ============================================================================

fn failing_tree_batch(policy: ErrorPolicy) -> (folio::Result<folio::BatchStatus>, MemoryStore) {
    let mut store = book();
    let result = edit_tree_batch(&mut store, &Batch::text().on_error(policy), |doc| {
        let p = doc.find_by_tag("p").ok_or("no paragraph")?;
        doc.set_text(p, "edited");
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
    });
    (result, store)
}

#[test]
fn test_tree_batch_ignore() {
    let (result, store) = failing_tree_batch(ErrorPolicy::Ignore);
    let status = result.unwrap();
    assert_eq!(status.failed().collect::<Vec<_>>(), ["nav"]);
    assert_eq!(status.succeeded().collect::<Vec<_>>(), ["ch1", "ch2"]);
    assert_eq!(store.total_writes(), 2);
}

#[test]
fn test_tree_batch_skip() {
    let (result, store) = failing_tree_batch(ErrorPolicy::Skip);
    let status = result.unwrap();
    assert_eq!(status.get("nav"), Some(false));
    assert_eq!(status.len(), 3);
    assert_eq!(store.writes("nav"), 0);
}

#[test]
fn test_tree_batch_raise() {
    let (result, store) = failing_tree_batch(ErrorPolicy::Raise);
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "transform failed: no paragraph");
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_missing_id_is_an_error_under_every_policy() {
    for policy in [ErrorPolicy::Ignore, ErrorPolicy::Skip, ErrorPolicy::Raise] {
        let mut store = book();
        let err = Batch::new()
            .ids(["ch1", "ch9"])
            .on_error(policy)
            .each_content(&mut store, |_| Ok::<_, Error>(EditOutcome::Unchanged))
            .unwrap_err();
        assert!(matches!(err, Error::ItemNotFound(ref id) if id == "ch9"));
    }
}
