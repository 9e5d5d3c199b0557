#![forbid(unsafe_code)]

//! Trust classification against a national PKI.
//!
//! A chain is trusted when some certificate in it matches the anchor (by
//! name or by certificate policy), every link is signed by the next one, all
//! certificates are inside their validity window, and the leaf is fit for
//! signing. Name and policy matching are heuristics: cryptographic weight
//! only comes from the chain signatures and, when configured, pinned roots.

use crate::certificate::CertificateInfo;
use fiscalsig_core::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// What counts as the national PKI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustAnchor {
    /// Substrings looked for in subject and issuer names.
    pub name_patterns: Vec<String>,
    /// Certificate policy OID prefixes, matched on dotted boundaries.
    pub policy_oid_prefixes: Vec<String>,
    /// Root certificates the chain must end in, when non-empty.
    #[serde(skip)]
    pub roots: Vec<Arc<CertificateInfo>>,
}

impl TrustAnchor {
    /// ICP-Brasil defaults.
    pub fn icp_brasil() -> Self {
        Self {
            name_patterns: vec![
                "ICP-Brasil".into(),
                "Autoridade Certificadora Raiz Brasileira".into(),
                "AC Raiz".into(),
            ],
            policy_oid_prefixes: vec!["2.16.76.1".into()],
            roots: Vec::new(),
        }
    }

    pub fn with_roots(mut self, roots: Vec<Arc<CertificateInfo>>) -> Self {
        self.roots = roots;
        self
    }

    /// Does `certificate` name the anchor or carry one of its policies?
    pub fn matches(&self, certificate: &CertificateInfo) -> bool {
        let by_name = self.name_patterns.iter().any(|pattern| {
            certificate.subject.contains(pattern.as_str())
                || certificate.issuer.contains(pattern.as_str())
        });
        by_name
            || certificate
                .policies
                .iter()
                .any(|oid| self.policy_oid_prefixes.iter().any(|p| oid_has_prefix(oid, p)))
    }

    fn pinned_root_for(&self, top: &CertificateInfo) -> Option<&CertificateInfo> {
        self.roots.iter().map(Arc::as_ref).find(|root| {
            *root == top || (top.issuer == root.subject && top.verify_issued_by(root).is_ok())
        })
    }
}

impl Default for TrustAnchor {
    fn default() -> Self {
        Self::icp_brasil()
    }
}

fn oid_has_prefix(oid: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('.');
    oid == prefix
        || oid
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Applies a [`TrustAnchor`] to certificate chains.
#[derive(Debug, Clone)]
pub struct TrustValidator {
    anchor: TrustAnchor,
    clock_skew: Duration,
    at: Option<SystemTime>,
}

impl TrustValidator {
    pub fn new(anchor: TrustAnchor) -> Self {
        Self {
            anchor,
            clock_skew: Duration::from_secs(300),
            at: None,
        }
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Evaluate validity windows at `at` instead of now.
    pub fn at(mut self, at: SystemTime) -> Self {
        self.at = Some(at);
        self
    }

    pub fn anchor(&self) -> &TrustAnchor {
        &self.anchor
    }

    /// Classify `certificate`, optionally with the rest of its chain.
    ///
    /// `chain` may or may not start with `certificate` itself; the leaf is
    /// prepended when missing. Failures are logged and reported as `false`.
    pub fn is_trusted(&self, certificate: &CertificateInfo, chain: Option<&[CertificateInfo]>) -> bool {
        let issuers = match chain {
            Some([first, rest @ ..]) if first == certificate => rest,
            Some(chain) => chain,
            None => &[],
        };
        let path: Vec<&CertificateInfo> = std::iter::once(certificate).chain(issuers).collect();
        match self.check_path(&path) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("certificate {} is not trusted: {e}", certificate.subject);
                false
            }
        }
    }

    /// Validate a chain ordered leaf first.
    pub fn validate_chain(&self, chain: &[CertificateInfo]) -> Result<(), Error> {
        let path: Vec<&CertificateInfo> = chain.iter().collect();
        self.check_path(&path)
    }

    fn check_path(&self, path: &[&CertificateInfo]) -> Result<(), Error> {
        let (leaf, top) = match (path.first(), path.last()) {
            (Some(leaf), Some(top)) => (*leaf, *top),
            _ => return Err(Error::Trust("empty certificate chain".into())),
        };

        check_leaf(leaf)?;

        let at = self.at.unwrap_or_else(SystemTime::now);
        for cert in path {
            cert.check_validity(at, self.clock_skew)
                .map_err(|e| Error::Trust(format!("{}: {e}", cert.subject)))?;
        }

        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            if child.issuer != parent.subject {
                return Err(Error::Trust(format!(
                    "chain out of order: {} is not issued by {}",
                    child.subject, parent.subject
                )));
            }
            child
                .verify_issued_by(parent)
                .map_err(|e| Error::Trust(format!("{}: {e}", child.subject)))?;
        }

        if top.is_self_issued() {
            top.verify_issued_by(top)
                .map_err(|e| Error::Trust(format!("self-signed {}: {e}", top.subject)))?;
        }

        let pinned = if self.anchor.roots.is_empty() {
            false
        } else {
            if self.anchor.pinned_root_for(top).is_none() {
                return Err(Error::Trust(format!(
                    "{} does not chain to a pinned root",
                    top.subject
                )));
            }
            true
        };

        if !pinned && !path.iter().any(|cert| self.anchor.matches(cert)) {
            return Err(Error::Trust(format!(
                "no certificate in the chain matches the trust anchor (leaf issuer: {})",
                leaf.issuer
            )));
        }

        log::debug!("trusted chain of {} certificate(s) for {}", path.len(), leaf.subject);
        Ok(())
    }
}

impl Default for TrustValidator {
    fn default() -> Self {
        Self::new(TrustAnchor::icp_brasil())
    }
}

fn check_leaf(leaf: &CertificateInfo) -> Result<(), Error> {
    if leaf.is_ca {
        return Err(Error::Trust(format!(
            "{} is a CA certificate, not a signing certificate",
            leaf.subject
        )));
    }
    if !leaf.has_digital_signature() {
        return Err(Error::Trust(format!(
            "{} lacks the digitalSignature key usage",
            leaf.subject
        )));
    }
    if !leaf.has_signing_eku() {
        return Err(Error::Trust(format!(
            "{} has neither clientAuth nor emailProtection extended key usage",
            leaf.subject
        )));
    }
    Ok(())
}
