#![forbid(unsafe_code)]

//! Inclusive Canonical XML 1.0 (C14N 1.0).
//!
//! Algorithm URI: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315`
//!
//! Every in-scope namespace is rendered on the first output element that
//! sees it, and the apex of a subtree inherits `xml:*` attributes from its
//! ancestors.

use crate::context::{default_namespace_decl, NamespaceMap};
use crate::render::{Attr, NsDecl};
use fiscalsig_core::ns;

/// Declarations to render: every in-scope namespace that the nearest output
/// ancestor did not already render with the same URI.
pub(crate) fn namespace_decls(in_scope: &NamespaceMap, rendered: &NamespaceMap) -> Vec<NsDecl> {
    let mut decls: Vec<NsDecl> = in_scope
        .iter()
        .filter(|(prefix, uri)| !prefix.is_empty() && rendered.get(*prefix) != Some(*uri))
        .map(|(prefix, uri)| NsDecl::new(prefix, uri))
        .collect();
    decls.extend(default_namespace_decl(in_scope, rendered));
    decls.sort();
    decls
}

/// `xml:*` attributes the apex element inherits from its ancestors.
///
/// The nearest ancestor wins; attributes the element carries itself are kept.
pub(crate) fn inherited_xml_attrs(node: roxmltree::Node<'_, '_>, existing: &[Attr]) -> Vec<Attr> {
    let mut inherited: Vec<Attr> = Vec::new();
    for ancestor in node.ancestors().skip(1).filter(|n| n.is_element()) {
        for attr in ancestor.attributes() {
            if attr.namespace() != Some(ns::XML) {
                continue;
            }
            let seen = existing
                .iter()
                .chain(inherited.iter())
                .any(|a| a.ns_uri == ns::XML && a.local_name == attr.name());
            if !seen {
                inherited.push(Attr {
                    ns_uri: ns::XML.to_owned(),
                    local_name: attr.name().to_owned(),
                    qualified_name: format!("xml:{}", attr.name()),
                    value: attr.value().to_owned(),
                });
            }
        }
    }
    inherited
}
