//! Document prolog handling.
//!
//! The HTML parser discards the XML declaration and normalizes the doctype, so
//! both are lifted off the source text before parsing and written back verbatim.

/// XHTML 1.1 doctype used when a document has none.
pub const XHTML11_DOCTYPE: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#;

/// HTML5 doctype used for HTML serialization when a document has none.
pub const HTML5_DOCTYPE: &str = "<!DOCTYPE html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Declaration,
    Doctype,
    Comment,
    Instruction,
    Space,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrologPart {
    pub kind: PartKind,
    pub text: String,
}

/// Everything in front of the root element, kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prolog {
    pub parts: Vec<PrologPart>,
}

impl Prolog {
    /// Split the prolog off `source`, returning it and the remaining markup.
    pub fn split(source: &str) -> (Prolog, &str) {
        let mut parts = Vec::new();
        let mut rest = source.strip_prefix('\u{feff}').unwrap_or(source);

        loop {
            let trimmed = rest.trim_start();
            if trimmed.len() != rest.len() {
                let ws = &rest[..rest.len() - trimmed.len()];
                parts.push(PrologPart {
                    kind: PartKind::Space,
                    text: ws.to_string(),
                });
                rest = trimmed;
            }

            let (kind, end) = if rest.starts_with("<?") {
                (PartKind::Instruction, rest.find("?>").map(|i| i + 2))
            } else if rest.starts_with("<!--") {
                (PartKind::Comment, rest.find("-->").map(|i| i + 3))
            } else if starts_with_ignore_case(rest, "<!doctype") {
                (PartKind::Doctype, doctype_end(rest))
            } else {
                break;
            };
            let Some(end) = end else { break };

            let text = &rest[..end];
            let kind = if kind == PartKind::Instruction && starts_with_ignore_case(text, "<?xml ")
            {
                PartKind::Declaration
            } else {
                kind
            };
            parts.push(PrologPart {
                kind,
                text: text.to_string(),
            });
            rest = &rest[end..];
        }

        (Prolog { parts }, rest)
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn declaration(&self) -> Option<&str> {
        self.part(PartKind::Declaration)
    }

    pub fn doctype(&self) -> Option<&str> {
        self.part(PartKind::Doctype)
    }

    /// Encoding named by the XML declaration.
    pub fn encoding(&self) -> Option<&str> {
        let decl = self.declaration()?;
        crate::util::extract_xml_encoding(decl.as_bytes())
    }

    fn part(&self, kind: PartKind) -> Option<&str> {
        self.parts
            .iter()
            .find(|p| p.kind == kind)
            .map(|p| p.text.as_str())
    }

    /// Write the prolog, filling in a missing declaration or doctype.
    ///
    /// A filled-in XML declaration names `encoding`.
    pub fn write(&self, out: &mut String, xml: bool, encoding: &str) {
        let doctype = if xml { XHTML11_DOCTYPE } else { HTML5_DOCTYPE };
        let has_decl = self.declaration().is_some();
        let has_doctype = self.doctype().is_some();

        if xml && !has_decl {
            out.push_str(&format!(r#"<?xml version="1.0" encoding="{encoding}"?>"#));
            out.push('\n');
        }
        for part in &self.parts {
            out.push_str(&part.text);
            if part.kind == PartKind::Declaration && !has_doctype {
                out.push('\n');
                out.push_str(doctype);
            }
        }
        if !has_doctype && !has_decl {
            out.push_str(doctype);
        }
        if !self.parts.last().is_some_and(|p| p.kind == PartKind::Space) {
            out.push('\n');
        }
    }
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// End of a doctype, skipping over an internal subset in brackets.
fn doctype_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote = None;
    for (i, b) in s.bytes().enumerate() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'[') => depth += 1,
            (None, b']') => depth = depth.saturating_sub(1),
            (None, b'>') if depth == 0 => return Some(i + 1),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html><body/></html>";

    #[test]
    fn test_split_keeps_parts_verbatim() {
        let (prolog, rest) = Prolog::split(SOURCE);
        assert_eq!(rest, "<html><body/></html>");
        assert_eq!(
            prolog.declaration(),
            Some("<?xml version=\"1.0\" encoding=\"utf-8\"?>")
        );
        assert_eq!(prolog.doctype(), Some("<!DOCTYPE html>"));
        assert_eq!(prolog.encoding(), Some("utf-8"));

        let mut out = String::new();
        prolog.write(&mut out, true, "utf-8");
        assert_eq!(format!("{out}{rest}"), SOURCE);
    }

    #[test]
    fn test_missing_prolog_xhtml_defaults() {
        let (prolog, rest) = Prolog::split("<html/>");
        assert!(prolog.is_empty());
        assert_eq!(rest, "<html/>");

        let mut out = String::new();
        prolog.write(&mut out, true, "utf-8");
        assert_eq!(
            out,
            format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n{XHTML11_DOCTYPE}\n")
        );
    }

    #[test]
    fn test_missing_prolog_html_default() {
        let (prolog, _) = Prolog::split("<html/>");
        let mut out = String::new();
        prolog.write(&mut out, false, "utf-8");
        assert_eq!(out, "<!DOCTYPE html>\n");
    }

    #[test]
    fn test_declaration_without_doctype() {
        let (prolog, _) = Prolog::split("<?xml version='1.0'?>\n<html/>");
        let mut out = String::new();
        prolog.write(&mut out, true, "utf-8");
        assert_eq!(out, format!("<?xml version='1.0'?>\n{XHTML11_DOCTYPE}\n"));
    }

    #[test]
    fn test_doctype_with_internal_subset() {
        let src = "<!DOCTYPE html [ <!ENTITY x \"y>\"> ]><html/>";
        let (prolog, rest) = Prolog::split(src);
        assert_eq!(rest, "<html/>");
        assert!(prolog.doctype().is_some_and(|d| d.ends_with("]>")));
    }

    #[test]
    fn test_comment_before_root() {
        let (prolog, rest) = Prolog::split("<!-- note --><html/>");
        assert_eq!(prolog.parts[0].kind, PartKind::Comment);
        assert_eq!(rest, "<html/>");
    }
}
