#![forbid(unsafe_code)]

//! Element lookup and the per-document id index.

use fiscalsig_core::Error;
use roxmltree::{Document, Node, NodeId};
use std::collections::{HashMap, HashSet};

/// Map from id attribute value to element, built once per parsed document.
///
/// Every element carrying one of the configured attribute names is indexed.
/// A value that appears on two different elements is remembered as a
/// duplicate and refuses to resolve, so a reference can never be redirected
/// to a second element carrying the same id.
#[derive(Debug, Default, Clone)]
pub struct IdIndex {
    ids: HashMap<String, NodeId>,
    duplicates: HashSet<String>,
}

impl IdIndex {
    pub fn build<S: AsRef<str>>(doc: &Document<'_>, attr_names: &[S]) -> Self {
        let mut index = IdIndex::default();
        for node in doc.descendants().filter(|n| n.is_element()) {
            for name in attr_names {
                let Some(value) = node.attribute(name.as_ref()) else {
                    continue;
                };
                match index.ids.get(value) {
                    Some(existing) if *existing != node.id() => {
                        index.duplicates.insert(value.to_owned());
                    }
                    Some(_) => {}
                    None => {
                        index.ids.insert(value.to_owned(), node.id());
                    }
                }
            }
        }
        if !index.duplicates.is_empty() {
            log::warn!("document carries {} duplicated id value(s)", index.duplicates.len());
        }
        index
    }

    /// Resolve `id` to its element.
    pub fn resolve<'a, 'input>(
        &self,
        doc: &'a Document<'input>,
        id: &str,
    ) -> Result<Node<'a, 'input>, Error> {
        if self.duplicates.contains(id) {
            return Err(Error::Validation(format!(
                "id \"{id}\" is carried by more than one element"
            )));
        }
        self.ids
            .get(id)
            .and_then(|node_id| doc.get_node(*node_id))
            .ok_or_else(|| Error::ReferenceNotFound(id.to_owned()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn is_named(node: &Node<'_, '_>, ns: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace().unwrap_or("") == ns
}

/// Find the first descendant element with the given local name and namespace.
pub fn find_element<'a, 'input>(
    doc: &'a Document<'input>,
    ns: &str,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    doc.descendants().find(|n| is_named(n, ns, local_name))
}

/// Find all descendant elements with the given local name and namespace.
pub fn find_elements<'a, 'input>(
    doc: &'a Document<'input>,
    ns: &str,
    local_name: &str,
) -> Vec<Node<'a, 'input>> {
    doc.descendants().filter(|n| is_named(n, ns, local_name)).collect()
}

pub fn find_child_element<'a, 'input>(
    parent: Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    parent.children().find(|n| is_named(n, ns, local_name))
}

pub fn find_child_elements<'a, 'input>(
    parent: Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Vec<Node<'a, 'input>> {
    parent.children().filter(|n| is_named(n, ns, local_name)).collect()
}
