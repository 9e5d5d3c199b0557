#![forbid(unsafe_code)]

//! XML canonicalization (C14N) for fiscal signatures.
//!
//! Implements the two W3C canonicalization families used by XMLDSig, each
//! with and without comments:
//! - Canonical XML 1.0 (inclusive)
//! - Exclusive Canonical XML 1.0
//!
//! Canonicalization works on a roxmltree element subtree (or a whole
//! document) and produces a new byte buffer; the tree is never modified.
//! Subtrees can be left out of the output, which is how the enveloped
//! signature transform is applied without copying the tree.

mod context;
pub mod escape;
pub mod exclusive;
pub mod inclusive;
pub mod render;

use context::C14nContext;
use fiscalsig_core::{algorithm, Error};
use roxmltree::{Node, NodeId, NodeType};
use serde::{Deserialize, Serialize};

/// The canonicalization family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum C14nMethod {
    /// Canonical XML 1.0
    #[default]
    Inclusive,
    /// Exclusive Canonical XML 1.0
    Exclusive,
}

/// Canonicalization settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct C14nConfig {
    pub method: C14nMethod,
    /// InclusiveNamespaces PrefixList, exclusive method only.
    pub inclusive_prefixes: Vec<String>,
    pub with_comments: bool,
}

impl C14nConfig {
    pub fn inclusive() -> Self {
        Self::default()
    }

    pub fn exclusive() -> Self {
        Self {
            method: C14nMethod::Exclusive,
            ..Self::default()
        }
    }

    pub fn with_comments(mut self, with_comments: bool) -> Self {
        self.with_comments = with_comments;
        self
    }

    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.inclusive_prefixes = prefixes;
        self
    }

    /// Get the algorithm URI for this configuration.
    pub fn uri(&self) -> &'static str {
        match (self.method, self.with_comments) {
            (C14nMethod::Inclusive, false) => algorithm::C14N,
            (C14nMethod::Inclusive, true) => algorithm::C14N_WITH_COMMENTS,
            (C14nMethod::Exclusive, false) => algorithm::EXC_C14N,
            (C14nMethod::Exclusive, true) => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Build a configuration from an algorithm URI.
    pub fn from_uri(uri: &str, inclusive_prefixes: Vec<String>) -> Option<Self> {
        let (method, with_comments) = match uri {
            algorithm::C14N => (C14nMethod::Inclusive, false),
            algorithm::C14N_WITH_COMMENTS => (C14nMethod::Inclusive, true),
            algorithm::EXC_C14N => (C14nMethod::Exclusive, false),
            algorithm::EXC_C14N_WITH_COMMENTS => (C14nMethod::Exclusive, true),
            _ => return None,
        };
        Some(Self {
            method,
            inclusive_prefixes,
            with_comments,
        })
    }

    pub fn is_exclusive(&self) -> bool {
        self.method == C14nMethod::Exclusive
    }
}

/// Something that turns a subtree into canonical bytes.
///
/// [`W3cCanonicalizer`] is the implementation; the trait exists so signing
/// and validation can be driven through an instrumented engine.
pub trait Canonicalizer: Send + Sync {
    /// Canonicalize `node` (an element or the document root), leaving out
    /// every node in `excluded` together with its descendants.
    fn canonicalize_node(
        &self,
        node: Node<'_, '_>,
        config: &C14nConfig,
        excluded: &[NodeId],
    ) -> Result<Vec<u8>, Error>;
}

/// W3C Canonical XML 1.0 / Exclusive Canonical XML 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct W3cCanonicalizer;

impl Canonicalizer for W3cCanonicalizer {
    fn canonicalize_node(
        &self,
        node: Node<'_, '_>,
        config: &C14nConfig,
        excluded: &[NodeId],
    ) -> Result<Vec<u8>, Error> {
        if !matches!(node.node_type(), NodeType::Element | NodeType::Root) {
            return Err(Error::Canonicalization(format!(
                "cannot canonicalize a {:?} node",
                node.node_type()
            )));
        }
        let out = C14nContext::new(config, excluded, node.id()).run(node)?;
        log::trace!("canonicalized <{}> to {} bytes", node.tag_name().name(), out.len());
        Ok(out)
    }
}

/// Canonicalize an element subtree.
pub fn canonicalize(element: Node<'_, '_>, config: &C14nConfig) -> Result<Vec<u8>, Error> {
    W3cCanonicalizer.canonicalize_node(element, config, &[])
}

/// Canonicalize an element subtree, leaving out the `excluded` subtrees.
pub fn canonicalize_excluding(
    element: Node<'_, '_>,
    config: &C14nConfig,
    excluded: &[NodeId],
) -> Result<Vec<u8>, Error> {
    W3cCanonicalizer.canonicalize_node(element, config, excluded)
}

/// Canonicalize a whole parsed document.
pub fn canonicalize_document(
    doc: &roxmltree::Document<'_>,
    config: &C14nConfig,
    excluded: &[NodeId],
) -> Result<Vec<u8>, Error> {
    W3cCanonicalizer.canonicalize_node(doc.root(), config, excluded)
}

/// Parse XML text and canonicalize the whole document.
///
/// Line endings are normalized to LF before parsing.
pub fn canonicalize_str(xml: &str, config: &C14nConfig) -> Result<Vec<u8>, Error> {
    let text = fiscalsig_xml::normalize_line_endings(xml);
    let doc = fiscalsig_xml::parse(&text)?;
    canonicalize_document(&doc, config, &[])
}
