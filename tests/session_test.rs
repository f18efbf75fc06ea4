//! Edit session tests.
//!
//! Tests for single-item edits: raw content sessions, tree sessions,
//! write-only-on-change semantics, discard, and byte-exact round trips.

use folio::{
    BoxError, Content, ContentStore, EditOutcome, Error, ItemInfo, MarkupCodec, MemoryStore, SerializeMethod,
    SerializeOptions, Session, TreeCodec, TreeSession, edit, scoped_edit, scoped_edit_tree, scoped_edit_tree_with,
};

const XHTML: &str = "application/xhtml+xml";

const XHTML_DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <title>Chapter One</title>
</head>
<body>
  <h1>Chapter One</h1>
  <p class="first">It was a dark and stormy night;<br/>the rain fell in torrents.</p>
</body>
</html>
"#;

fn book() -> MemoryStore {
    MemoryStore::new()
        .with_item("ch1", "Text/ch1.xhtml", XHTML, XHTML_DOC)
        .with_item("css", "Styles/style.css", "text/css", "p { margin: 0 }")
}

// ============================================================================
// Raw Edit Tests
// ============================================================================

#[test]
fn test_identical_transform_never_writes() {
    let mut store = book();
    for id in ["ch1", "css"] {
        let outcome = edit(&mut store, id, |c| Ok::<_, Error>(EditOutcome::Written(c.clone()))).unwrap();
        assert_eq!(outcome, EditOutcome::Unchanged);
    }
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_same_bytes_other_representation_is_unchanged() {
    let mut store = book();
    let outcome = edit(&mut store, "css", |c| {
        Ok::<_, Error>(EditOutcome::Written(Content::Bytes(c.as_bytes().to_vec())))
    })
    .unwrap();
    assert_eq!(outcome, EditOutcome::Unchanged);
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_discard_wins_over_changes() {
    let mut store = book();
    let outcome = scoped_edit(&mut store, "css", |session| {
        session.set_text("p { margin: 1em }");
        session.discard();
        Ok::<_, Error>(())
    })
    .unwrap();
    assert_eq!(outcome, EditOutcome::Discarded);
    assert_eq!(store.text("css"), Some("p { margin: 0 }"));
}

#[test]
fn test_errors_propagate_from_single_item_edits() {
    let mut store = book();
    let err = scoped_edit(&mut store, "css", |_| Err::<(), _>("broken")).unwrap_err();
    assert!(matches!(err, Error::TransformFailed(_)));
    assert_eq!(err.to_string(), "transform failed: broken");

    let err = scoped_edit(&mut store, "missing", |_| Ok::<_, Error>(())).unwrap_err();
    assert!(err.is_item_not_found());
}

#[test]
fn test_session_reports_changes() {
    let mut store = book();
    let mut session = Session::open(&mut store, "css").unwrap();
    assert!(!session.is_changed());
    session.set_text("p { margin: 0 }");
    assert!(!session.is_changed());
    session.set_content("a {}");
    assert!(session.is_changed());
    assert_eq!(session.original().as_bytes(), b"p { margin: 0 }");
    assert_eq!(session.close().unwrap(), EditOutcome::Written(Content::from("a {}")));
}

// ============================================================================
// Tree Session Tests
// ============================================================================

#[test]
fn test_untouched_tree_round_trips_exactly() {
    let mut store = book();
    let outcome = scoped_edit_tree(&mut store, "ch1", |session| {
        let doc = session.tree();
        assert_eq!(doc.find_by_tag("h1").map(|h| doc.text_content(h)), Some("Chapter One".into()));
        Ok::<_, Error>(())
    })
    .unwrap();
    assert_eq!(outcome, EditOutcome::Unchanged);
    assert_eq!(store.text("ch1"), Some(XHTML_DOC));
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_edited_tree_keeps_prolog() {
    let mut store = book();
    scoped_edit_tree(&mut store, "ch1", |session| {
        let doc = session.tree_mut();
        let h1 = doc.find_by_tag("h1").ok_or("no heading")?;
        doc.set_text(h1, "Chapter 1");
        Ok::<_, BoxError>(())
    })
    .unwrap();

    let text = store.text("ch1").unwrap();
    assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html PUBLIC"));
    assert!(text.contains("<h1>Chapter 1</h1>"));
    assert!(text.contains("<br/>"));
    assert!(text.contains("<title>Chapter One</title>"));
    assert_eq!(store.writes("ch1"), 1);
}

#[test]
fn test_tree_session_discard() {
    let mut store = book();
    let mut session = TreeSession::open(&mut store, "ch1").unwrap();
    let body = session.tree().body().unwrap();
    let p = session.tree_mut().create_element("p");
    session.tree_mut().append(body, p);
    session.discard();
    assert_eq!(session.close().unwrap(), EditOutcome::Discarded);
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn test_html_item_gets_html5_doctype() {
    let mut store = MemoryStore::new().with_item("h", "h.html", "text/html", "<p>loose</p>");
    scoped_edit_tree(&mut store, "h", |session| {
        let doc = session.tree_mut();
        let p = doc.find_by_tag("p").ok_or("no p")?;
        doc.set_attr(p, "id", "x");
        Ok::<_, BoxError>(())
    })
    .unwrap();
    assert_eq!(
        store.text("h"),
        Some("<!DOCTYPE html>\n<html><head></head><body><p id=\"x\">loose</p></body></html>")
    );
}

#[test]
fn test_forced_xhtml_method_adds_declaration() {
    let mut store = MemoryStore::new().with_item("h", "h.html", "text/html", "<p>x</p>");
    let codec = MarkupCodec::new(
        SerializeOptions::default()
            .with_method(SerializeMethod::Xhtml)
            .with_strip_cr_refs(false),
    );
    scoped_edit_tree_with(&mut store, "h", codec, |session| {
        let doc = session.tree_mut();
        let body = doc.body().ok_or("no body")?;
        let hr = doc.create_element("hr");
        doc.append(body, hr);
        Ok::<_, BoxError>(())
    })
    .unwrap();
    let text = store.text("h").unwrap();
    assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html PUBLIC"));
    assert!(text.ends_with("<p>x</p><hr/></body></html>"));
}

#[test]
fn test_carriage_returns_and_stripping() {
    let source = "<html><head></head><body><p></p></body></html>";
    let edit_p = |session: &mut TreeSession<'_, MemoryStore>| {
        let doc = session.tree_mut();
        let p = doc.find_by_tag("p").ok_or("no p")?;
        doc.set_attr(p, "class", "x");
        doc.set_text(p, "a\r\nb");
        Ok::<_, BoxError>(())
    };

    let mut store = MemoryStore::new().with_item("a", "a.html", "text/html", source);
    let keep = MarkupCodec::new(SerializeOptions::default().with_strip_cr_refs(false));
    scoped_edit_tree_with(&mut store, "a", keep, edit_p).unwrap();
    assert!(store.text("a").unwrap().contains("a&#13;\nb"));

    let mut store = MemoryStore::new().with_item("a", "a.html", "text/html", source);
    let strip = MarkupCodec::new(SerializeOptions::default().with_strip_cr_refs(true));
    scoped_edit_tree_with(&mut store, "a", strip, edit_p).unwrap();
    assert!(store.text("a").unwrap().contains("<p class=\"x\">a\nb</p>"));
}

#[test]
fn test_declared_encoding_is_preserved_for_bytes() {
    let source = "<?xml version=\"1.0\" encoding=\"iso-8859-1\"?>\n<html><head></head><body><p>caf\u{e9}</p></body></html>";
    let (latin1, _, _) = encoding_rs::WINDOWS_1252.encode(source);
    let mut store = MemoryStore::new().with_item("a", "a.xhtml", XHTML, latin1.into_owned());

    scoped_edit_tree(&mut store, "a", |session| {
        let doc = session.tree_mut();
        let p = doc.find_by_tag("p").ok_or("no p")?;
        doc.set_attr(p, "lang", "fr");
        Ok::<_, BoxError>(())
    })
    .unwrap();

    let Some(Content::Bytes(bytes)) = store.get("a") else {
        panic!("expected byte content");
    };
    assert!(bytes.windows(4).any(|w| w == b"caf\xE9"));
    assert!(!bytes.windows(2).any(|w| w == "é".as_bytes()));
}

#[test]
fn test_meta_charset_is_preserved_for_bytes() {
    let source = "<html><head><meta charset=\"windows-1252\"/></head><body><p>caf\u{e9}</p></body></html>";
    let (cp1252, _, _) = encoding_rs::WINDOWS_1252.encode(source);
    let mut store = MemoryStore::new().with_item("a", "a.html", "text/html", cp1252.into_owned());

    scoped_edit_tree(&mut store, "a", |session| {
        let doc = session.tree_mut();
        let p = doc.find_by_tag("p").ok_or("no p")?;
        doc.append_text(p, " cr\u{e8}me");
        Ok::<_, BoxError>(())
    })
    .unwrap();

    let bytes = store.get("a").unwrap().as_bytes();
    assert!(bytes.windows(10).any(|w| w == b"caf\xE9 cr\xE8me"));
    assert!(!bytes.windows(2).any(|w| w == b"\xC3\xA9"));
}

#[test]
fn test_self_closed_xhtml_elements_survive_an_edit() {
    let source = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>T</title></head><body><p><a id="n1"/>First</p><div class="x"/><p>Second</p></body></html>"#;
    let mut store = MemoryStore::new().with_item("a", "a.xhtml", XHTML, source);

    scoped_edit_tree(&mut store, "a", |session| {
        let doc = session.tree_mut();
        let title = doc.find_by_tag("title").ok_or("no title")?;
        doc.set_attr(title, "lang", "en");
        Ok::<_, BoxError>(())
    })
    .unwrap();

    let text = store.text("a").unwrap();
    assert!(text.contains(r#"<body><p><a id="n1"></a>First</p><div class="x"></div><p>Second</p></body>"#));
    assert_eq!(text.matches(r#"id="n1""#).count(), 1);
}

// ============================================================================
// Custom Codec Tests
// ============================================================================

/// Lines of a text item.
struct LineCodec;

impl TreeCodec for LineCodec {
    type Tree = Vec<String>;

    fn parse(&self, _info: &ItemInfo, content: &Content) -> Result<Vec<String>, BoxError> {
        let text = content.as_text().ok_or("not text")?;
        Ok(text.lines().map(str::to_string).collect())
    }

    fn serialize(&self, _info: &ItemInfo, tree: &Vec<String>, _original: &Content) -> Result<Content, BoxError> {
        Ok(Content::Text(tree.join("\n")))
    }
}

#[test]
fn test_custom_codec() {
    let mut store = MemoryStore::new()
        .with_item("t", "t.txt", "text/plain", "b\na")
        .with_item("bin", "i.png", "image/png", vec![0x89, 0x50]);

    scoped_edit_tree_with(&mut store, "t", LineCodec, |session| {
        session.tree_mut().sort();
        Ok::<_, Error>(())
    })
    .unwrap();
    assert_eq!(store.text("t"), Some("a\nb"));

    let err = scoped_edit_tree_with(&mut store, "bin", LineCodec, |_| Ok::<_, Error>(())).unwrap_err();
    match err {
        Error::ParseFailed { id, reason } => {
            assert_eq!(id, "bin");
            assert_eq!(reason, "not text");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.total_writes(), 1);
    assert!(store.contains("bin"));
}
