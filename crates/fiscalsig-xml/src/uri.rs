#![forbid(unsafe_code)]

//! Same-document URI references as used by `Reference/@URI`.

/// A parsed `Reference/@URI`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameDocumentRef<'a> {
    /// `URI=""`: the whole document.
    Document,
    /// `URI="#id"`.
    Id(&'a str),
}

/// Parse a same-document reference. External URIs and `#` alone yield `None`.
pub fn parse_same_document_ref(uri: &str) -> Option<SameDocumentRef<'_>> {
    if uri.is_empty() {
        return Some(SameDocumentRef::Document);
    }
    match uri.strip_prefix('#') {
        Some(id) if !id.is_empty() && !id.contains(char::is_whitespace) => {
            Some(SameDocumentRef::Id(id))
        }
        _ => None,
    }
}
