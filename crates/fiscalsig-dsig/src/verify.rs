#![forbid(unsafe_code)]

//! Signature validation.
//!
//! Processing order:
//! 1. Parse, locate `Signature` and `SignedInfo`
//! 2. Read `CanonicalizationMethod` and `SignatureMethod`
//! 3. For each `Reference`: resolve the URI, strip embedded signatures,
//!    canonicalize, digest, compare
//! 4. Read `SignatureValue` and the certificate (embedded or supplied)
//! 5. Canonicalize `SignedInfo` and verify `SignatureValue`
//! 6. Check the certificate window and key usage, then trust
//!
//! Only a missing `Signature`/`SignedInfo` or unparsable input stops early.
//! Every other defect is recorded and processing continues.

use crate::b64;
use crate::config::ValidationConfig;
use crate::report::{IssueCode, ReferenceOutcome, ReferenceStatus, ValidationResult};
use crate::transforms::{self, read_inclusive_prefixes, read_transforms, Transform};
use fiscalsig_c14n::{C14nConfig, Canonicalizer, W3cCanonicalizer};
use fiscalsig_core::{ns, Error, HashAlgorithm};
use fiscalsig_keys::{CertificateInfo, TrustValidator};
use fiscalsig_xml::uri::{parse_same_document_ref, SameDocumentRef};
use fiscalsig_xml::{find_child_element, find_child_elements, find_element, find_elements, IdIndex};
use roxmltree::{Document, Node};
use std::time::SystemTime;

/// Validates signed fiscal documents. Never fails: every defect is reported
/// in the returned [`ValidationResult`].
#[derive(Debug, Clone)]
pub struct SignatureValidator<C: Canonicalizer = W3cCanonicalizer> {
    config: ValidationConfig,
    canonicalizer: C,
    trust: TrustValidator,
}

impl SignatureValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self::with_canonicalizer(config, W3cCanonicalizer)
    }
}

impl Default for SignatureValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl<C: Canonicalizer> SignatureValidator<C> {
    pub fn with_canonicalizer(config: ValidationConfig, canonicalizer: C) -> Self {
        let mut trust =
            TrustValidator::new(config.trust_anchor.clone()).with_clock_skew(config.clock_skew());
        if let Some(at) = config.verification_time {
            trust = trust.at(at);
        }
        Self {
            config,
            canonicalizer,
            trust,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn canonicalizer(&self) -> &C {
        &self.canonicalizer
    }

    /// Validate against the certificate embedded in `KeyInfo`.
    ///
    /// Only the first `ds:Signature` in document order is checked. Any
    /// further signatures are left unverified and reported as a
    /// [`IssueCode::Notice`] warning.
    pub fn validate(&self, document: &str) -> ValidationResult {
        self.run(document, None)
    }

    /// Validate against a caller-supplied DER certificate, ignoring the
    /// embedded one for signature verification.
    pub fn validate_with_certificate(&self, document: &str, der: &[u8]) -> ValidationResult {
        self.run(document, Some(CertificateInfo::from_der(der)))
    }

    fn run(&self, document: &str, supplied: Option<Result<CertificateInfo, Error>>) -> ValidationResult {
        let mut result = ValidationResult::default();
        self.check(document, supplied, &mut result);
        let result = result.finish();
        log::info!(
            "validation finished: valid={} ({} error(s), {} warning(s))",
            result.is_valid,
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    fn check(
        &self,
        document: &str,
        supplied: Option<Result<CertificateInfo, Error>>,
        result: &mut ValidationResult,
    ) {
        let doc = match fiscalsig_xml::parse(document) {
            Ok(doc) => doc,
            Err(e) => {
                result.error(IssueCode::Parse, e.to_string());
                return;
            }
        };

        let signature = find_element(&doc, ns::DSIG, ns::node::SIGNATURE).or_else(|| {
            doc.descendants()
                .find(|n| n.is_element() && n.tag_name().name() == ns::node::SIGNATURE)
        });
        let Some(signature) = signature else {
            result.error(IssueCode::MissingSignature, "document has no Signature element");
            return;
        };
        result.structure.signature_present = true;
        if signature.tag_name().namespace() != Some(ns::DSIG) {
            result.error(
                IssueCode::WrongNamespace,
                format!(
                    "Signature is in namespace {:?}, expected {}",
                    signature.tag_name().namespace().unwrap_or(""),
                    ns::DSIG
                ),
            );
            return;
        }
        result.structure.xmldsig_namespace = true;

        let count = find_elements(&doc, ns::DSIG, ns::node::SIGNATURE).len();
        if count > 1 {
            result.warning(
                IssueCode::Notice,
                format!("document carries {count} signatures; only the first is checked"),
            );
        }

        let Some(signed_info) = find_child_element(signature, ns::DSIG, ns::node::SIGNED_INFO) else {
            result.error(IssueCode::MissingElement, "Signature has no SignedInfo");
            return;
        };
        result.structure.signed_info_present = true;

        let c14n = read_c14n_method(signed_info, result);
        let hash = read_signature_method(signed_info, result);

        let index = IdIndex::build(&doc, &self.config.id_attributes);
        let references_ok = self.check_references(&doc, &index, signed_info, result);

        let signature_value = read_signature_value(signature, result);
        let embedded = read_embedded_certificates(signature, result);

        let certificate = match supplied {
            Some(Ok(cert)) => Some(cert),
            Some(Err(e)) => {
                result.error(IssueCode::InvalidCertificate, format!("supplied certificate: {e}"));
                None
            }
            None => {
                if !result.structure.certificate_present {
                    result.error(
                        IssueCode::MissingCertificate,
                        "no X509Certificate in KeyInfo and none supplied",
                    );
                }
                embedded.first().cloned()
            }
        };

        let signature_ok = match (&c14n, hash, &signature_value, &certificate) {
            (Some(c14n), Some(hash), Some(value), Some(cert)) => {
                self.verify_signed_info(signed_info, c14n, hash, value, cert, result)
            }
            _ => false,
        };
        result.signature_valid = references_ok && signature_ok;

        if let Some(cert) = &certificate {
            result.certificate = Some(cert.into());
            result.certificate_valid = self.check_certificate(cert, result);
            if self.config.check_trust {
                self.check_trust(cert, &embedded, result);
            }
        }
    }

    /// Check every Reference. True when all digests match.
    fn check_references(
        &self,
        doc: &Document<'_>,
        index: &IdIndex,
        signed_info: Node<'_, '_>,
        result: &mut ValidationResult,
    ) -> bool {
        let references = find_child_elements(signed_info, ns::DSIG, ns::node::REFERENCE);
        if references.is_empty() {
            result.error(IssueCode::MissingElement, "SignedInfo has no Reference");
            return false;
        }

        let structure = &mut result.structure;
        structure.digest_method = true;
        structure.digest_value = true;
        structure.enveloped_transform = true;
        structure.c14n_transform = true;
        structure.reference_uri = true;

        let mut all_ok = true;
        for reference in references {
            let outcome = self.check_reference(doc, index, reference, result);
            all_ok &= outcome.is_ok();
            result.references.push(outcome);
        }
        all_ok
    }

    fn check_reference(
        &self,
        doc: &Document<'_>,
        index: &IdIndex,
        reference: Node<'_, '_>,
        result: &mut ValidationResult,
    ) -> ReferenceOutcome {
        let uri = reference.attribute(ns::attr::URI);
        let mut outcome = ReferenceOutcome {
            uri: uri.unwrap_or("").to_owned(),
            digest_algorithm: None,
            status: ReferenceStatus::Error,
        };
        let label = uri.unwrap_or("(no URI)");

        let hash = match find_child_element(reference, ns::DSIG, ns::node::DIGEST_METHOD)
            .and_then(|n| n.attribute(ns::attr::ALGORITHM))
        {
            None => {
                result.structure.digest_method = false;
                result.error(
                    IssueCode::MissingElement,
                    format!("Reference {label}: missing DigestMethod"),
                );
                None
            }
            Some(alg) => {
                outcome.digest_algorithm = Some(alg.to_owned());
                let hash = HashAlgorithm::from_digest_uri(alg);
                if hash.is_none() {
                    result.structure.digest_method = false;
                    result.error(
                        IssueCode::UnsupportedAlgorithm,
                        format!("Reference {label}: unsupported digest algorithm {alg}"),
                    );
                }
                hash
            }
        };

        let expected = match find_child_element(reference, ns::DSIG, ns::node::DIGEST_VALUE) {
            None => {
                result.structure.digest_value = false;
                result.error(
                    IssueCode::MissingElement,
                    format!("Reference {label}: missing DigestValue"),
                );
                None
            }
            Some(node) => match b64::decode(node.text().unwrap_or("")) {
                Ok(value) if !value.is_empty() && hash.map_or(true, |h| h.output_len() == value.len()) => {
                    Some(value)
                }
                Ok(value) => {
                    result.structure.digest_value = false;
                    result.error(
                        IssueCode::InvalidBase64,
                        format!("Reference {label}: DigestValue has {} bytes", value.len()),
                    );
                    None
                }
                Err(e) => {
                    result.structure.digest_value = false;
                    result.error(
                        IssueCode::InvalidBase64,
                        format!("Reference {label}: DigestValue is not base64: {e}"),
                    );
                    None
                }
            },
        };

        let transforms = match read_transforms(reference) {
            Ok(transforms) => transforms,
            Err(e) => {
                result.structure.enveloped_transform = false;
                result.structure.c14n_transform = false;
                result.error(IssueCode::UnsupportedAlgorithm, format!("Reference {label}: {e}"));
                return outcome;
            }
        };
        check_transform_list(&transforms, label, result);

        let target = match uri.map(parse_same_document_ref) {
            Some(Some(SameDocumentRef::Document)) => doc.root(),
            Some(Some(SameDocumentRef::Id(id))) => match index.resolve(doc, id) {
                Ok(node) => node,
                Err(e @ Error::ReferenceNotFound(_)) => {
                    result.error(IssueCode::ReferenceNotFound, format!("Reference {label}: {e}"));
                    return outcome;
                }
                Err(e) => {
                    result.error(IssueCode::AmbiguousReference, format!("Reference {label}: {e}"));
                    return outcome;
                }
            },
            Some(None) | None => {
                result.structure.reference_uri = false;
                result.error(
                    IssueCode::MalformedReference,
                    format!("Reference {label}: URI must be empty or a #id fragment"),
                );
                return outcome;
            }
        };

        let (Some(hash), Some(expected)) = (hash, expected) else {
            return outcome;
        };
        let octets = match transforms::apply(&self.canonicalizer, target, &transforms) {
            Ok(octets) => octets,
            Err(e) => {
                result.error(IssueCode::Canonicalization, format!("Reference {label}: {e}"));
                return outcome;
            }
        };
        let computed = fiscalsig_crypto::digest(hash, &octets);
        log::debug!(
            "Reference {label}: {} canonical bytes, {hash} digest {}",
            octets.len(),
            b64::encode(&computed)
        );
        if computed == expected {
            outcome.status = ReferenceStatus::Ok;
        } else {
            outcome.status = ReferenceStatus::DigestMismatch;
            result.error(
                IssueCode::DigestMismatch,
                format!(
                    "Reference {label}: computed digest {} does not match DigestValue",
                    b64::encode(&computed)
                ),
            );
        }
        outcome
    }

    fn verify_signed_info(
        &self,
        signed_info: Node<'_, '_>,
        c14n: &C14nConfig,
        hash: HashAlgorithm,
        value: &[u8],
        cert: &CertificateInfo,
        result: &mut ValidationResult,
    ) -> bool {
        let canonical = match self.canonicalizer.canonicalize_node(signed_info, c14n, &[]) {
            Ok(canonical) => canonical,
            Err(e) => {
                result.error(IssueCode::Canonicalization, format!("SignedInfo: {e}"));
                return false;
            }
        };
        log::debug!("canonical SignedInfo: {} bytes", canonical.len());
        match fiscalsig_crypto::verify_pkcs1v15(&cert.public_key, hash, &canonical, value) {
            Ok(true) => true,
            Ok(false) => {
                result.error(
                    IssueCode::SignatureMismatch,
                    format!("SignatureValue does not verify with the key of {}", cert.subject),
                );
                false
            }
            Err(e) => {
                result.error(IssueCode::SignatureMismatch, e.to_string());
                false
            }
        }
    }

    fn check_certificate(&self, cert: &CertificateInfo, result: &mut ValidationResult) -> bool {
        let at = self.config.verification_time.unwrap_or_else(SystemTime::now);
        let mut ok = true;
        if let Err(e) = cert.check_validity(at, self.config.clock_skew()) {
            result.error(IssueCode::CertificateExpired, e.to_string());
            ok = false;
        }
        if !cert.has_digital_signature() {
            result.error(
                IssueCode::KeyUsage,
                format!("{} lacks the digitalSignature key usage", cert.subject),
            );
            ok = false;
        }
        ok
    }

    fn check_trust(&self, cert: &CertificateInfo, embedded: &[CertificateInfo], result: &mut ValidationResult) {
        let mut path = vec![cert.clone()];
        path.extend(embedded.iter().filter(|c| *c != cert).cloned());
        match self.trust.validate_chain(&path) {
            Ok(()) => result.trusted_chain = true,
            Err(e) if self.config.require_trusted_chain => {
                result.error(IssueCode::UntrustedChain, e.to_string());
            }
            Err(e) => {
                log::warn!("signature certificate is not trusted: {e}");
                result.warning(IssueCode::UntrustedChain, e.to_string());
            }
        }
    }
}

fn read_c14n_method(signed_info: Node<'_, '_>, result: &mut ValidationResult) -> Option<C14nConfig> {
    let Some(method) = find_child_element(signed_info, ns::DSIG, ns::node::CANONICALIZATION_METHOD)
    else {
        result.error(IssueCode::MissingElement, "SignedInfo has no CanonicalizationMethod");
        return None;
    };
    let Some(uri) = method.attribute(ns::attr::ALGORITHM) else {
        result.error(IssueCode::MissingElement, "CanonicalizationMethod has no Algorithm");
        return None;
    };
    let c14n = C14nConfig::from_uri(uri, read_inclusive_prefixes(method));
    match c14n {
        Some(_) => result.structure.canonicalization_method = true,
        None => result.error(
            IssueCode::UnsupportedAlgorithm,
            format!("unsupported canonicalization method {uri}"),
        ),
    }
    c14n
}

fn read_signature_method(signed_info: Node<'_, '_>, result: &mut ValidationResult) -> Option<HashAlgorithm> {
    let Some(uri) = find_child_element(signed_info, ns::DSIG, ns::node::SIGNATURE_METHOD)
        .and_then(|n| n.attribute(ns::attr::ALGORITHM))
    else {
        result.error(IssueCode::MissingElement, "SignedInfo has no SignatureMethod");
        return None;
    };
    match fiscalsig_crypto::signature_hash(uri) {
        Ok(hash) => {
            result.structure.signature_method = true;
            Some(hash)
        }
        Err(e) => {
            result.error(IssueCode::UnsupportedAlgorithm, e.to_string());
            None
        }
    }
}

fn check_transform_list(transforms: &[Transform], label: &str, result: &mut ValidationResult) {
    let enveloped = transforms.iter().position(|t| *t == Transform::Enveloped);
    let c14n = transforms
        .iter()
        .position(|t| matches!(t, Transform::Canonicalize(_)));
    if enveloped.is_none() {
        result.structure.enveloped_transform = false;
        result.warning(
            IssueCode::MissingElement,
            format!("Reference {label}: no enveloped-signature transform"),
        );
    }
    if c14n.is_none() {
        result.structure.c14n_transform = false;
        result.warning(
            IssueCode::MissingElement,
            format!("Reference {label}: no canonicalization transform"),
        );
    }
    if let (Some(e), Some(c)) = (enveloped, c14n) {
        if c < e {
            result.warning(
                IssueCode::Notice,
                format!("Reference {label}: canonicalization is declared before enveloped-signature"),
            );
        }
    }
}

fn read_signature_value(signature: Node<'_, '_>, result: &mut ValidationResult) -> Option<Vec<u8>> {
    let Some(node) = find_child_element(signature, ns::DSIG, ns::node::SIGNATURE_VALUE) else {
        result.error(IssueCode::MissingElement, "Signature has no SignatureValue");
        return None;
    };
    result.structure.signature_value_present = true;
    let text = node.text().unwrap_or("");
    if text.trim().is_empty() {
        result.error(IssueCode::InvalidBase64, "SignatureValue is empty");
        return None;
    }
    match b64::decode(text) {
        Ok(value) => {
            result.structure.signature_value_base64 = true;
            Some(value)
        }
        Err(e) => {
            result.error(IssueCode::InvalidBase64, format!("SignatureValue is not base64: {e}"));
            None
        }
    }
}

fn read_embedded_certificates(signature: Node<'_, '_>, result: &mut ValidationResult) -> Vec<CertificateInfo> {
    let nodes: Vec<Node<'_, '_>> = find_child_element(signature, ns::DSIG, ns::node::KEY_INFO)
        .into_iter()
        .flat_map(|key_info| find_child_elements(key_info, ns::DSIG, ns::node::X509_DATA))
        .flat_map(|data| find_child_elements(data, ns::DSIG, ns::node::X509_CERTIFICATE))
        .collect();
    result.structure.certificate_present = !nodes.is_empty();

    let mut certificates = Vec::with_capacity(nodes.len());
    for node in nodes {
        let parsed = b64::decode(node.text().unwrap_or(""))
            .map_err(|e| Error::Base64(e.to_string()))
            .and_then(|der| CertificateInfo::from_der(&der));
        match parsed {
            Ok(cert) => certificates.push(cert),
            Err(e) => result.error(IssueCode::InvalidCertificate, format!("embedded X509Certificate: {e}")),
        }
    }
    certificates
}
