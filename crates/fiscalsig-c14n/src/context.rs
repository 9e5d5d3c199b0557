#![forbid(unsafe_code)]

//! The canonicalization walk shared by the inclusive and exclusive methods.
//!
//! The walk reads the roxmltree tree and writes into a fresh buffer. Excluded
//! nodes (and everything below them) produce no output.

use crate::render::{Attr, NsDecl};
use crate::{escape, exclusive, inclusive, C14nConfig, C14nMethod};
use fiscalsig_core::Error;
use fiscalsig_xml::qname::{prefix_of, StartTag};
use roxmltree::{Node, NodeId, NodeType};
use std::collections::{BTreeMap, BTreeSet};

/// Prefix → namespace URI; `""` is the default namespace.
pub(crate) type NamespaceMap = BTreeMap<String, String>;

pub(crate) struct C14nContext<'c> {
    config: &'c C14nConfig,
    excluded: &'c [NodeId],
    apex: NodeId,
}

impl<'c> C14nContext<'c> {
    pub(crate) fn new(config: &'c C14nConfig, excluded: &'c [NodeId], apex: NodeId) -> Self {
        Self {
            config,
            excluded,
            apex,
        }
    }

    pub(crate) fn run(&self, node: Node<'_, '_>) -> Result<Vec<u8>, Error> {
        let mut output = Vec::new();
        self.process_node(node, &mut output, &NamespaceMap::new())?;
        Ok(output)
    }

    fn process_node(
        &self,
        node: Node<'_, '_>,
        output: &mut Vec<u8>,
        rendered: &NamespaceMap,
    ) -> Result<(), Error> {
        if self.excluded.contains(&node.id()) {
            return Ok(());
        }
        match node.node_type() {
            NodeType::Root => {
                for child in node.children() {
                    self.process_node(child, output, rendered)?;
                }
            }
            NodeType::Element => self.process_element(node, output, rendered)?,
            NodeType::Text => {
                let text = node.text().unwrap_or("");
                output.extend_from_slice(escape::escape_text(text).as_bytes());
            }
            NodeType::Comment => {
                if self.config.with_comments {
                    let at_top = document_level(node);
                    if at_top && follows_document_element(node) {
                        output.push(b'\n');
                    }
                    output.extend_from_slice(b"<!--");
                    output.extend_from_slice(node.text().unwrap_or("").as_bytes());
                    output.extend_from_slice(b"-->");
                    if at_top && precedes_document_element(node) {
                        output.push(b'\n');
                    }
                }
            }
            NodeType::PI => {
                if let Some(pi) = node.pi() {
                    let at_top = document_level(node);
                    if at_top && follows_document_element(node) {
                        output.push(b'\n');
                    }
                    output.extend_from_slice(b"<?");
                    output.extend_from_slice(pi.target.as_bytes());
                    if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                        output.push(b' ');
                        output.extend_from_slice(escape::escape_pi(value).as_bytes());
                    }
                    output.extend_from_slice(b"?>");
                    if at_top && precedes_document_element(node) {
                        output.push(b'\n');
                    }
                }
            }
        }
        Ok(())
    }

    fn process_element(
        &self,
        node: Node<'_, '_>,
        output: &mut Vec<u8>,
        rendered: &NamespaceMap,
    ) -> Result<(), Error> {
        let tag = StartTag::read(node)?;
        let named_attrs = tag.attribute_names(node)?;
        let in_scope = in_scope_namespaces(node, &tag);

        let ns_decls = match self.config.method {
            C14nMethod::Inclusive => inclusive::namespace_decls(&in_scope, rendered),
            C14nMethod::Exclusive => {
                let mut utilized = BTreeSet::new();
                utilized.insert(prefix_of(&tag.name));
                utilized.extend(
                    named_attrs
                        .iter()
                        .map(|(_, qname)| prefix_of(qname))
                        .filter(|p| !p.is_empty()),
                );
                exclusive::namespace_decls(
                    &in_scope,
                    rendered,
                    &utilized,
                    &self.config.inclusive_prefixes,
                )
            }
        };

        let mut attrs: Vec<Attr> = named_attrs
            .iter()
            .map(|(attr, qname)| Attr {
                ns_uri: attr.namespace().unwrap_or("").to_owned(),
                local_name: attr.name().to_owned(),
                qualified_name: (*qname).to_owned(),
                value: attr.value().to_owned(),
            })
            .collect();
        if self.config.method == C14nMethod::Inclusive && node.id() == self.apex {
            let inherited = inclusive::inherited_xml_attrs(node, &attrs);
            attrs.extend(inherited);
        }
        attrs.sort();

        output.push(b'<');
        output.extend_from_slice(tag.name.as_bytes());
        for decl in &ns_decls {
            output.extend_from_slice(decl.render().as_bytes());
        }
        for attr in &attrs {
            output.extend_from_slice(attr.render().as_bytes());
        }
        output.push(b'>');

        let mut child_rendered = rendered.clone();
        for decl in ns_decls {
            child_rendered.insert(decl.prefix, decl.uri);
        }
        for child in node.children() {
            self.process_node(child, output, &child_rendered)?;
        }

        output.extend_from_slice(b"</");
        output.extend_from_slice(tag.name.as_bytes());
        output.push(b'>');
        Ok(())
    }
}

/// Namespaces in scope at `node`, without the `xml` prefix or empty bindings.
fn in_scope_namespaces(node: Node<'_, '_>, tag: &StartTag<'_>) -> NamespaceMap {
    let mut map = NamespaceMap::new();
    for ns in node.namespaces() {
        let prefix = ns.name().unwrap_or("");
        if prefix == "xml" || ns.uri().is_empty() {
            continue;
        }
        map.insert(prefix.to_owned(), ns.uri().to_owned());
    }
    // An unprefixed element is in the default namespace by definition.
    if prefix_of(&tag.name).is_empty() {
        match node.tag_name().namespace() {
            Some(uri) if !uri.is_empty() => {
                map.insert(String::new(), uri.to_owned());
            }
            _ => {
                map.remove("");
            }
        }
    }
    map
}

/// `xmlns=""` or `xmlns="uri"` when the element's default namespace differs
/// from the one its nearest output ancestor rendered.
pub(crate) fn default_namespace_decl(in_scope: &NamespaceMap, rendered: &NamespaceMap) -> Option<NsDecl> {
    let current = in_scope.get("").map_or("", String::as_str);
    let parent = rendered.get("").map_or("", String::as_str);
    (current != parent).then(|| NsDecl::new("", current))
}

fn document_level(node: Node<'_, '_>) -> bool {
    node.parent().is_some_and(|p| p.node_type() == NodeType::Root)
}

fn follows_document_element(node: Node<'_, '_>) -> bool {
    node.prev_siblings().any(|s| s.is_element())
}

fn precedes_document_element(node: Node<'_, '_>) -> bool {
    node.next_siblings().any(|s| s.is_element())
}
