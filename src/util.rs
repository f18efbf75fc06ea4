//! Text encoding helpers shared by the stores and the markup serializer.

use std::borrow::Cow;

use encoding_rs::Encoding;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Pick the encoding stored bytes are written in.
///
/// 1. A UTF-8 BOM means UTF-8
/// 2. A declared encoding (`<?xml encoding="..."?>`, then `<meta charset>`) is
///    used unless the bytes are non-ASCII valid UTF-8, which marks a mislabeled file
/// 3. Otherwise UTF-8 when valid, falling back to Windows-1252 (common in old ebooks)
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if bytes.starts_with(UTF8_BOM) {
        return encoding_rs::UTF_8;
    }
    let valid_utf8 = std::str::from_utf8(bytes).is_ok();
    let declared = extract_xml_encoding(bytes)
        .or_else(|| extract_meta_charset(bytes))
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    match declared {
        Some(encoding) if !valid_utf8 || bytes.is_ascii() => encoding,
        _ if valid_utf8 => encoding_rs::UTF_8,
        _ => encoding_rs::WINDOWS_1252,
    }
}

/// Decode stored bytes, returning the text and the encoding it was read with.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, &'static Encoding) {
    let encoding = detect_encoding(bytes);
    let (text, _) = encoding.decode_with_bom_removal(bytes);
    (text, encoding)
}

/// Encode a string for storage in `encoding`.
///
/// UTF-16 encodings produce UTF-8, because encoding_rs only decodes UTF-16.
pub fn encode_text<'a>(text: &'a str, encoding: &'static Encoding) -> Cow<'a, [u8]> {
    let (bytes, _, _) = encoding.encode(text);
    bytes
}

/// Extract the encoding declared in an XML declaration, if any.
///
/// Only the first 100 bytes are inspected.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let check_len = bytes.len().min(100);
    let prefix = &bytes[..check_len];

    let xml_start = prefix.windows(5).position(|w| w == b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    if after_enc.is_empty() {
        return None;
    }

    let quote = after_enc[0];
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;
    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// Extract the charset named by a `<meta charset>` or `<meta http-equiv>` tag.
///
/// Only the first 1024 bytes are inspected.
pub fn extract_meta_charset(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(1024)];
    let mut rest = prefix;

    while let Some(start) = find_ignore_case(rest, b"<meta") {
        let tag = &rest[start..];
        let end = memchr::memchr(b'>', tag).unwrap_or(tag.len());
        let tag = &tag[..end];

        if let Some(pos) = find_ignore_case(tag, b"charset=") {
            let value = &tag[pos + 8..];
            let value = value
                .strip_prefix(b"\"")
                .or_else(|| value.strip_prefix(b"'"))
                .unwrap_or(value);
            let len = value
                .iter()
                .position(|&b| matches!(b, b'"' | b'\'' | b';' | b'/') || b.is_ascii_whitespace())
                .unwrap_or(value.len());
            if len > 0 {
                return std::str::from_utf8(&value[..len]).ok();
            }
        }
        rest = &rest[start + end..];
    }
    None
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Remove every `&#13;` character reference from serialized output.
pub fn strip_cr_refs(bytes: &[u8]) -> Cow<'_, [u8]> {
    const CR_REF: &[u8] = b"&#13;";

    let mut hits = memchr::memmem::find_iter(bytes, CR_REF).peekable();
    if hits.peek().is_none() {
        return Cow::Borrowed(bytes);
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut last = 0;
    for pos in hits {
        out.extend_from_slice(&bytes[last..pos]);
        last = pos + CR_REF.len();
    }
    out.extend_from_slice(&bytes[last..]);
    Cow::Owned(out)
}

/// Strip UTF-8 BOM (byte order mark) if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8() {
        let (text, encoding) = decode_text("h\u{e9}llo".as_bytes());
        assert_eq!(text, "h\u{e9}llo");
        assert_eq!(encoding, encoding_rs::UTF_8);
    }

    #[test]
    fn test_decode_with_declaration() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"iso-8859-1\"?><p>caf\xE9</p>";
        let (text, encoding) = decode_text(bytes);
        assert!(text.ends_with("<p>caf\u{e9}</p>"));
        assert_eq!(encoding, encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn test_decode_falls_back_to_cp1252() {
        let (text, encoding) = decode_text(&[0x93, 0x68, 0x69, 0x94]);
        assert_eq!(text, "\u{201C}hi\u{201D}");
        assert_eq!(encoding, encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn test_detect_meta_charset() {
        let html = b"<html><head><meta charset=\"windows-1252\"/></head><body>caf\xE9</body></html>";
        assert_eq!(detect_encoding(html), encoding_rs::WINDOWS_1252);

        let ascii = b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=ISO-8859-1\"></head></html>";
        assert_eq!(extract_meta_charset(ascii), Some("ISO-8859-1"));
        assert_eq!(detect_encoding(ascii), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn test_detect_mislabeled_utf8() {
        let bytes = "<meta charset=\"windows-1252\"><p>caf\u{e9}</p>".as_bytes();
        assert_eq!(detect_encoding(bytes), encoding_rs::UTF_8);
        assert_eq!(detect_encoding(b"\xEF\xBB\xBF<p/>"), encoding_rs::UTF_8);
    }

    #[test]
    fn test_encode_roundtrip_latin1() {
        let encoded = encode_text("caf\u{e9}", encoding_rs::WINDOWS_1252);
        assert_eq!(encoded.as_ref(), &[0x63, 0x61, 0x66, 0xE9]);
        assert_eq!(encode_text("caf\u{e9}", encoding_rs::UTF_8).as_ref(), "caf\u{e9}".as_bytes());
    }

    #[test]
    fn test_extract_xml_encoding() {
        let doc = br#"<?xml version="1.0" encoding='GBK'?><html/>"#;
        assert_eq!(extract_xml_encoding(doc), Some("GBK"));
        assert_eq!(extract_xml_encoding(b"<html/>"), None);
    }

    #[test]
    fn test_strip_cr_refs() {
        assert_eq!(strip_cr_refs(b"a&#13;\nb&#13;").as_ref(), b"a\nb");
        assert!(matches!(strip_cr_refs(b"plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBFabc"), b"abc");
        assert_eq!(strip_bom(b"abc"), b"abc");
    }
}
