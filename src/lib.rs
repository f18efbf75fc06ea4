//! # folio
//!
//! Transactional editing of the items inside an ebook archive.
//!
//! ## Features
//!
//! - Scoped edit sessions that write an item back only when it changed
//! - Markup sessions that parse (X)HTML, keep its prolog and encoding, and
//!   round-trip untouched documents byte-for-byte
//! - Batch runs over filtered items with `ignore`, `raise` or `skip` error policies
//! - Regex search and substitution with per-item and global match numbering
//! - Edit stacks that cache many open items and commit them together
//! - Element search with XPath-like or CSS selectors
//!
//! ## Quick Start
//!
//! ```no_run
//! use folio::{Batch, EpubStore, match_substitute};
//!
//! let mut book = EpubStore::open("book.epub").unwrap();
//! let status = match_substitute(&mut book, &Batch::text(), r"\bcolour\b", "color").unwrap();
//! println!("{} items failed", status.failed().count());
//! book.save("book-edited.epub").unwrap();
//! ```
//!
//! ## Editing One Item
//!
//! Every operation takes its [`ContentStore`] explicitly:
//!
//! ```
//! use folio::{MemoryStore, scoped_edit_tree};
//!
//! let mut store = MemoryStore::new().with_item(
//!     "ch1",
//!     "Text/ch1.xhtml",
//!     "application/xhtml+xml",
//!     "<html><head></head><body><p>Hello</p></body></html>",
//! );
//!
//! scoped_edit_tree(&mut store, "ch1", |session| {
//!     let doc = session.tree_mut();
//!     if let Some(p) = doc.find_by_tag("p") {
//!         doc.set_attr(p, "class", "first");
//!     }
//!     Ok::<_, folio::Error>(())
//! })
//! .unwrap();
//!
//! assert!(store.text("ch1").unwrap().contains(r#"<p class="first">"#));
//! ```

pub mod batch;
pub mod dom;
pub mod error;
pub mod pattern;
pub mod predicate;
pub mod select;
pub mod session;
pub mod stack;
pub mod store;
pub(crate) mod util;

pub use batch::{Batch, BatchStatus, Counters, ErrorPolicy, ItemRecord, Selection, TreeRecord, edit_batch, edit_tree_batch};
pub use dom::{Document, NodeId, SerializeMethod, SerializeOptions};
pub use error::{BoxError, Error, Result};
pub use pattern::{MatchContext, MatchRecord, Replacement, find_all, match_iter, match_map, match_substitute};
pub use predicate::Predicate;
pub use select::{
    CompiledSelector, CssDialect, ElementHit, ElementInfo, SelectorKind, SelectorOptions, find_elements,
    map_elements, select_all,
};
pub use session::{
    EditOutcome, MarkupCodec, Session, TreeCodec, TreeSession, edit, scoped_edit, scoped_edit_tree,
    scoped_edit_tree_with,
};
pub use stack::{EditStack, TextEditStack};
pub use store::{Content, ContentStore, EpubStore, ItemInfo, MemoryStore};
