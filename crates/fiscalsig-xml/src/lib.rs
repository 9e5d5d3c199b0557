#![forbid(unsafe_code)]

//! XML access for fiscalsig.
//!
//! Wraps `roxmltree` with the handful of tree operations signing needs:
//! parsing with fixed options, a per-document id index, element lookup,
//! recovery of qualified names as written, and a small writer for
//! building `Signature` elements.

pub mod document;
pub mod qname;
pub mod uri;
pub mod writer;

pub use document::{find_child_element, find_child_elements, find_element, find_elements, IdIndex};
pub use qname::StartTag;
pub use writer::XmlWriter;

use fiscalsig_core::Error;
use std::borrow::Cow;

/// Return roxmltree parsing options that allow DTD.
///
/// roxmltree does not expand external entities, so an internal subset is safe.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}

/// Parse a document with [`parsing_options`].
pub fn parse(text: &str) -> Result<roxmltree::Document<'_>, Error> {
    roxmltree::Document::parse_with_options(text, parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))
}

/// Replace CRLF and lone CR with LF.
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(ch);
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings() {
        assert!(matches!(normalize_line_endings("a\nb"), Cow::Borrowed(_)));
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(normalize_line_endings("\r\r\n"), "\n\n");
    }

    #[test]
    fn parse_errors_are_xml_parse() {
        let err = parse("<a><b></a>").unwrap_err();
        assert!(matches!(err, Error::XmlParse(_)));
    }
}
