//! XML empty-element tags in XHTML items.
//!
//! The HTML tree builder ignores the `/>` of a non-void start tag, so `<a id="n1"/>`
//! would swallow everything after it. XHTML markup is rewritten to give such
//! tags an explicit end tag before it reaches the parser.

use std::borrow::Cow;

use super::serialize::VOID_ELEMENTS;

/// Elements whose content is text up to their end tag.
const TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Rewrite `<name .../>` as `<name ...></name>` for every non-void element.
pub fn expand_empty_elements(markup: &str) -> Cow<'_, str> {
    let bytes = markup.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut pos = 0;

    while let Some(offset) = memchr::memchr(b'<', &bytes[pos..]) {
        let start = pos + offset;
        let rest = &markup[start..];
        if rest.starts_with("<!--") {
            pos = skip_past(markup, start, "-->");
            continue;
        }
        if rest.starts_with("<![CDATA[") {
            pos = skip_past(markup, start, "]]>");
            continue;
        }
        let Some(&first) = bytes.get(start + 1) else {
            break;
        };
        if !first.is_ascii_alphabetic() {
            // end tags, doctypes, processing instructions
            pos = start + 1;
            continue;
        }

        let name_end = bytes[start + 1..]
            .iter()
            .position(|&b| b.is_ascii_whitespace() || b == b'/' || b == b'>')
            .map_or(bytes.len(), |i| start + 1 + i);
        let name = &markup[start + 1..name_end];
        let Some(close) = tag_end(bytes, name_end) else {
            break;
        };
        let lower = name.to_ascii_lowercase();
        let self_closing = bytes[close - 1] == b'/';
        pos = close + 1;

        if self_closing && !VOID_ELEMENTS.contains(&lower.as_str()) {
            out.push_str(&markup[copied..close - 1]);
            out.push_str("></");
            out.push_str(name);
            out.push('>');
            copied = close + 1;
        } else if !self_closing && TEXT_ELEMENTS.contains(&lower.as_str()) {
            pos = find_end_tag(markup, pos, &lower);
        }
    }

    if copied == 0 {
        return Cow::Borrowed(markup);
    }
    out.push_str(&markup[copied..]);
    Cow::Owned(out)
}

/// Index of the `>` closing a tag, ignoring any inside quoted attribute values.
fn tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    None
}

fn skip_past(markup: &str, from: usize, terminator: &str) -> usize {
    markup[from..]
        .find(terminator)
        .map_or(markup.len(), |i| from + i + terminator.len())
}

fn find_end_tag(markup: &str, from: usize, name: &str) -> usize {
    let needle = format!("</{name}");
    markup.as_bytes()[from..]
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
        .map_or(markup.len(), |i| from + i)
}
