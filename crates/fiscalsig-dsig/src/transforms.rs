#![forbid(unsafe_code)]

//! Reference transforms.
//!
//! Fiscal signatures use exactly two transforms, enveloped-signature then a
//! canonicalization method. Both are applied as one canonicalization pass
//! over the referenced subtree with every embedded `Signature` excluded.

use fiscalsig_c14n::{C14nConfig, Canonicalizer};
use fiscalsig_core::{algorithm, ns, Error};
use fiscalsig_xml::{find_child_element, find_child_elements, XmlWriter};
use roxmltree::{Node, NodeId};

/// A transform declared in `Reference/Transforms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// `#enveloped-signature`
    Enveloped,
    /// One of the four C14N 1.0 methods.
    Canonicalize(C14nConfig),
}

impl Transform {
    /// The standard pair written by the signer.
    pub fn enveloped_then(c14n: C14nConfig) -> Vec<Transform> {
        vec![Transform::Enveloped, Transform::Canonicalize(c14n)]
    }

    pub fn from_node(node: Node<'_, '_>) -> Result<Self, Error> {
        let uri = node
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on Transform".into()))?;
        if uri == algorithm::ENVELOPED_SIGNATURE {
            return Ok(Transform::Enveloped);
        }
        C14nConfig::from_uri(uri, read_inclusive_prefixes(node))
            .map(Transform::Canonicalize)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("transform: {uri}")))
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Transform::Enveloped => algorithm::ENVELOPED_SIGNATURE,
            Transform::Canonicalize(c14n) => c14n.uri(),
        }
    }

    /// Write `<Transform Algorithm="…">`.
    pub fn write(&self, w: &mut XmlWriter) {
        match self {
            Transform::Enveloped => {
                w.empty_element(ns::node::TRANSFORM, &[(ns::attr::ALGORITHM, self.uri())]);
            }
            Transform::Canonicalize(c14n) => write_c14n_element(w, ns::node::TRANSFORM, c14n),
        }
    }
}

/// Read the transforms of a `Reference`, in document order.
pub fn read_transforms(reference: Node<'_, '_>) -> Result<Vec<Transform>, Error> {
    let Some(transforms) = find_child_element(reference, ns::DSIG, ns::node::TRANSFORMS) else {
        return Ok(Vec::new());
    };
    find_child_elements(transforms, ns::DSIG, ns::node::TRANSFORM)
        .into_iter()
        .map(Transform::from_node)
        .collect()
}

/// `InclusiveNamespaces/@PrefixList` below a method element.
pub fn read_inclusive_prefixes(node: Node<'_, '_>) -> Vec<String> {
    find_child_element(node, ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES)
        .and_then(|n| n.attribute(ns::attr::PREFIX_LIST))
        .map(|list| list.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Write a `CanonicalizationMethod` or `Transform` element for `c14n`.
pub(crate) fn write_c14n_element(w: &mut XmlWriter, name: &str, c14n: &C14nConfig) {
    w.start_element(name, &[(ns::attr::ALGORITHM, c14n.uri())]);
    if c14n.is_exclusive() && !c14n.inclusive_prefixes.is_empty() {
        let list = c14n.inclusive_prefixes.join(" ");
        w.empty_element(
            ns::node::INCLUSIVE_NAMESPACES,
            &[("xmlns", ns::EXC_C14N), (ns::attr::PREFIX_LIST, &list)],
        );
    }
    w.end_element();
}

/// Every `ds:Signature` inside `node` (the node itself included).
pub(crate) fn embedded_signatures(node: Node<'_, '_>) -> Vec<NodeId> {
    node.descendants()
        .filter(|n| {
            n.is_element()
                && n.tag_name().name() == ns::node::SIGNATURE
                && n.tag_name().namespace() == Some(ns::DSIG)
        })
        .map(|n| n.id())
        .collect()
}

/// Run `transforms` over `target`, producing the octets to digest.
///
/// Embedded signatures are always excluded. The last canonicalization
/// transform picks the method; without one, inclusive C14N applies.
pub(crate) fn apply<C: Canonicalizer + ?Sized>(
    canonicalizer: &C,
    target: Node<'_, '_>,
    transforms: &[Transform],
) -> Result<Vec<u8>, Error> {
    let c14n = transforms
        .iter()
        .rev()
        .find_map(|t| match t {
            Transform::Canonicalize(c14n) => Some(c14n.clone()),
            Transform::Enveloped => None,
        })
        .unwrap_or_default();
    let excluded = embedded_signatures(target);
    canonicalizer.canonicalize_node(target, &c14n, &excluded)
}
