#![forbid(unsafe_code)]

//! Qualified names as written in the source.
//!
//! roxmltree resolves prefixes away, but canonical output must reproduce
//! `prefix:local` exactly. The start tag is re-scanned from the input text
//! to recover the element name and the attribute names in document order.
//! When the scanned tag does not line up with the tree (content produced by
//! entity expansion), names are rebuilt from the in-scope namespace bindings.

use fiscalsig_core::{ns, Error};
use roxmltree::{Attribute, Node};
use std::borrow::Cow;

/// Names read from an element's start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag<'input> {
    /// Element qualified name.
    pub name: Cow<'input, str>,
    /// Attribute qualified names in document order, namespace declarations excluded.
    pub attributes: Vec<Cow<'input, str>>,
}

impl<'input> StartTag<'input> {
    pub fn read(node: Node<'_, 'input>) -> Result<Self, Error> {
        match Self::scan(node) {
            Ok(tag) if tag.matches(node) => Ok(tag),
            Ok(_) | Err(_) => {
                log::trace!(
                    "start tag of <{}> not found in the source, using namespace bindings",
                    node.tag_name().name()
                );
                Self::from_tree(node)
            }
        }
    }

    /// Rebuild qualified names from the namespaces in scope at `node`.
    pub fn from_tree(node: Node<'_, 'input>) -> Result<Self, Error> {
        let tag = node.tag_name();
        let name = qualify(node, tag.namespace(), tag.name(), true)?;
        let attributes = node
            .attributes()
            .map(|attr| qualify(node, attr.namespace(), attr.name(), false))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StartTag { name, attributes })
    }

    fn scan(node: Node<'_, 'input>) -> Result<Self, Error> {
        let text = node.document().input_text();
        let src = text
            .get(node.range().start..)
            .ok_or_else(|| malformed(node, "position out of range"))?;
        let bytes = src.as_bytes();
        if bytes.first() != Some(&b'<') {
            return Err(malformed(node, "start tag not found"));
        }

        let mut pos = 1;
        let end = scan_name(bytes, pos);
        if end == pos {
            return Err(malformed(node, "empty element name"));
        }
        let name = &src[pos..end];
        pos = end;

        let mut attributes = Vec::new();
        loop {
            pos = skip_whitespace(bytes, pos);
            match bytes.get(pos) {
                None => return Err(malformed(node, "unterminated start tag")),
                Some(b'>') | Some(b'/') => break,
                Some(_) => {}
            }
            let end = scan_name(bytes, pos);
            if end == pos {
                return Err(malformed(node, "attribute name expected"));
            }
            let qname = &src[pos..end];
            pos = skip_whitespace(bytes, end);
            if bytes.get(pos) != Some(&b'=') {
                return Err(malformed(node, "'=' expected"));
            }
            pos = skip_whitespace(bytes, pos + 1);
            let quote = match bytes.get(pos) {
                Some(q @ (b'"' | b'\'')) => *q,
                _ => return Err(malformed(node, "quoted value expected")),
            };
            let close = bytes[pos + 1..]
                .iter()
                .position(|b| *b == quote)
                .ok_or_else(|| malformed(node, "unterminated attribute value"))?;
            pos = pos + 1 + close + 1;

            if qname != "xmlns" && !qname.starts_with("xmlns:") {
                attributes.push(Cow::Borrowed(qname));
            }
        }

        Ok(StartTag {
            name: Cow::Borrowed(name),
            attributes,
        })
    }

    /// Whether the scanned names are the ones roxmltree holds for `node`.
    fn matches(&self, node: Node<'_, '_>) -> bool {
        local_of(&self.name) == node.tag_name().name()
            && self.attributes.len() == node.attributes().count()
            && self
                .attributes
                .iter()
                .zip(node.attributes())
                .all(|(qname, attr)| local_of(qname) == attr.name())
    }

    /// Pair each roxmltree attribute with its qualified name.
    pub fn attribute_names<'a, 's>(
        &'s self,
        node: Node<'a, 'input>,
    ) -> Result<Vec<(Attribute<'a, 'input>, &'s str)>, Error> {
        let attrs: Vec<_> = node.attributes().collect();
        if attrs.len() != self.attributes.len() {
            return Err(malformed(node, "attribute count differs from start tag"));
        }
        Ok(attrs
            .into_iter()
            .zip(self.attributes.iter().map(|qname| &**qname))
            .collect())
    }
}

/// Prefix part of a qualified name (`""` when unprefixed).
pub fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map_or("", |(prefix, _)| prefix)
}

fn local_of(qname: &str) -> &str {
    qname.split_once(':').map_or(qname, |(_, local)| local)
}

/// `prefix:local` for a name in `uri`, using a binding in scope at `node`.
/// Unprefixed attributes are never in a namespace, so only elements may
/// use the default namespace.
fn qualify<'input>(
    node: Node<'_, 'input>,
    uri: Option<&str>,
    local: &str,
    element: bool,
) -> Result<Cow<'input, str>, Error> {
    let Some(uri) = uri.filter(|u| !u.is_empty()) else {
        return Ok(Cow::Owned(local.to_owned()));
    };
    if uri == ns::XML {
        return Ok(Cow::Owned(format!("xml:{local}")));
    }
    if element && node.default_namespace() == Some(uri) {
        return Ok(Cow::Owned(local.to_owned()));
    }
    node.namespaces()
        .find(|binding| binding.uri() == uri && binding.name().is_some())
        .and_then(|binding| binding.name())
        .map(|prefix| Cow::Owned(format!("{prefix}:{local}")))
        .ok_or_else(|| malformed(node, &format!("no prefix bound to {uri}")))
}

fn malformed(node: Node<'_, '_>, what: &str) -> Error {
    Error::Canonicalization(format!(
        "cannot read start tag of <{}>: {what}",
        node.tag_name().name()
    ))
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while matches!(bytes.get(pos), Some(b' ' | b'\t' | b'\r' | b'\n')) {
        pos += 1;
    }
    pos
}

fn scan_name(bytes: &[u8], mut pos: usize) -> usize {
    while let Some(b) = bytes.get(pos) {
        if matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'=' | b'>' | b'/') {
            break;
        }
        pos += 1;
    }
    pos
}
