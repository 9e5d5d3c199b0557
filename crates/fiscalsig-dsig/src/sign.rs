#![forbid(unsafe_code)]

//! Enveloped signature creation.
//!
//! Signing moves through four stages, each a separate type so a stage can
//! only be reached from the one before it:
//!
//! 1. `Unsigned`: the certificate has been checked, nothing computed yet.
//! 2. `DigestComputed`: the target is located and its digest is known.
//! 3. `SignatureComputed`: `SignedInfo` is rendered in place and signed.
//! 4. Embedded: the `SignatureValue` is written and the text returned.
//!
//! roxmltree trees are read-only, so the `Signature` is spliced into the
//! document text right after the target's end tag and the result re-parsed,
//! which lets `SignedInfo` be canonicalized with its final namespace context.
//! The caller's input is never touched; on error nothing is returned.

use crate::b64;
use crate::config::SigningConfig;
use crate::transforms::{embedded_signatures, write_c14n_element, Transform};
use fiscalsig_c14n::{C14nConfig, Canonicalizer, W3cCanonicalizer};
use fiscalsig_core::{ns, Error, HashAlgorithm};
use fiscalsig_keys::{CertificateInfo, CertificateProvider};
use fiscalsig_xml::{find_child_element, IdIndex, XmlWriter};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Signs fiscal documents with a [`CertificateProvider`].
///
/// The canonicalizer is a type parameter so tests and diagnostics can
/// observe exactly what gets canonicalized.
#[derive(Debug, Clone)]
pub struct SignatureBuilder<C: Canonicalizer = W3cCanonicalizer> {
    config: SigningConfig,
    canonicalizer: C,
    at: Option<SystemTime>,
}

impl SignatureBuilder {
    pub fn new(config: SigningConfig) -> Self {
        Self::with_canonicalizer(config, W3cCanonicalizer)
    }
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new(SigningConfig::default())
    }
}

impl<C: Canonicalizer> SignatureBuilder<C> {
    pub fn with_canonicalizer(config: SigningConfig, canonicalizer: C) -> Self {
        Self {
            config,
            canonicalizer,
            at: None,
        }
    }

    /// Check the certificate window at `at` instead of now.
    pub fn at(mut self, at: SystemTime) -> Self {
        self.at = Some(at);
        self
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    pub fn canonicalizer(&self) -> &C {
        &self.canonicalizer
    }

    /// Sign the element whose id attribute equals `target_id`.
    ///
    /// Returns the signed document with the `Signature` placed as the
    /// target's following sibling.
    pub fn sign(
        &self,
        document: &str,
        target_id: &str,
        provider: &dyn CertificateProvider,
    ) -> Result<String, Error> {
        let unsigned = self.check_certificate(document, provider)?;
        let digested = self.compute_digest(unsigned, target_id)?;
        let signed = self.compute_signature(digested, provider)?;
        let output = signed.embed();
        log::info!(
            "signed #{target_id} with {} ({} bytes)",
            self.config.digest_algorithm.signature_uri(),
            output.len()
        );
        Ok(output)
    }

    fn check_certificate<'d>(
        &self,
        document: &'d str,
        provider: &dyn CertificateProvider,
    ) -> Result<Unsigned<'d>, Error> {
        // Configuration errors surface before the provider is touched.
        self.config.signature_method()?;
        let c14n = self.config.c14n()?;

        if provider.is_closed() {
            return Err(Error::Closed);
        }
        let certificate = provider.public_certificate()?;
        certificate.check_validity(self.at.unwrap_or_else(SystemTime::now), Duration::ZERO)?;
        let chain = if self.config.include_chain {
            provider.certificate_chain()?
        } else {
            vec![Arc::clone(&certificate)]
        };
        log::debug!("signing with certificate {} ({})", certificate.subject, certificate.serial);
        Ok(Unsigned {
            document,
            c14n,
            chain,
        })
    }

    fn compute_digest<'d>(&self, unsigned: Unsigned<'d>, target_id: &str) -> Result<DigestComputed<'d>, Error> {
        let doc = fiscalsig_xml::parse(unsigned.document)?;
        let index = IdIndex::build(&doc, &self.config.id_attributes);
        let target = index.resolve(&doc, target_id)?;
        if target.parent_element().is_none() {
            return Err(Error::Validation(format!(
                "element #{target_id} is the document element; its Signature needs a parent"
            )));
        }

        let excluded = embedded_signatures(target);
        let canonical = self
            .canonicalizer
            .canonicalize_node(target, &unsigned.c14n, &excluded)?;
        let digest = fiscalsig_crypto::digest(self.config.digest_algorithm, &canonical);
        log::debug!(
            "canonical #{target_id}: {} bytes, {} digest {}",
            canonical.len(),
            self.config.digest_algorithm,
            b64::encode(&digest)
        );

        Ok(DigestComputed {
            insert_at: target.range().end,
            reference_uri: format!("#{target_id}"),
            digest_value: b64::encode(&digest),
            unsigned,
        })
    }

    fn compute_signature(
        &self,
        digested: DigestComputed<'_>,
        provider: &dyn CertificateProvider,
    ) -> Result<SignatureComputed, Error> {
        let signature_xml = self.render_signature(&digested)?;
        let document = digested.unsigned.document;
        let mut text = String::with_capacity(document.len() + signature_xml.len() + 512);
        text.push_str(&document[..digested.insert_at]);
        text.push_str(&signature_xml);
        text.push_str(&document[digested.insert_at..]);

        let (canonical, value_at) = {
            let doc = fiscalsig_xml::parse(&text)?;
            let signature = doc
                .descendants()
                .find(|n| n.is_element() && n.range().start == digested.insert_at)
                .ok_or_else(|| Error::MissingElement("Signature".into()))?;
            let signed_info = find_child_element(signature, ns::DSIG, ns::node::SIGNED_INFO)
                .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;
            let value = find_child_element(signature, ns::DSIG, ns::node::SIGNATURE_VALUE)
                .ok_or_else(|| Error::MissingElement("SignatureValue".into()))?;
            let canonical =
                self.canonicalizer
                    .canonicalize_node(signed_info, &digested.unsigned.c14n, &[])?;
            let value_at = value.range().start + ns::node::SIGNATURE_VALUE.len() + 2;
            (canonical, value_at)
        };

        let hash: HashAlgorithm = self.config.digest_algorithm;
        let signature_value = provider.sign(&canonical, hash)?;
        Ok(SignatureComputed {
            text,
            value_at,
            signature_value: b64::encode(&signature_value),
        })
    }

    fn render_signature(&self, digested: &DigestComputed<'_>) -> Result<String, Error> {
        let c14n: &C14nConfig = &digested.unsigned.c14n;
        let signature_method = self.config.signature_method()?;
        let mut w = XmlWriter::new();
        w.start_element(ns::node::SIGNATURE, &[("xmlns", ns::DSIG)])
            .start_element(ns::node::SIGNED_INFO, &[]);
        write_c14n_element(&mut w, ns::node::CANONICALIZATION_METHOD, c14n);
        w.empty_element(ns::node::SIGNATURE_METHOD, &[(ns::attr::ALGORITHM, signature_method)])
            .start_element(ns::node::REFERENCE, &[(ns::attr::URI, &digested.reference_uri)])
            .start_element(ns::node::TRANSFORMS, &[]);
        for transform in Transform::enveloped_then(c14n.clone()) {
            transform.write(&mut w);
        }
        w.end_element()
            .empty_element(
                ns::node::DIGEST_METHOD,
                &[(ns::attr::ALGORITHM, self.config.digest_algorithm.digest_uri())],
            )
            .text_element(ns::node::DIGEST_VALUE, &[], &digested.digest_value)
            .end_element()
            .end_element()
            .empty_element(ns::node::SIGNATURE_VALUE, &[]);
        if self.config.include_certificate {
            w.start_element(ns::node::KEY_INFO, &[])
                .start_element(ns::node::X509_DATA, &[]);
            for cert in &digested.unsigned.chain {
                w.text_element(ns::node::X509_CERTIFICATE, &[], &b64::encode(&cert.der));
            }
            w.end_element().end_element();
        }
        Ok(w.into_string())
    }
}

struct Unsigned<'d> {
    document: &'d str,
    c14n: C14nConfig,
    /// Certificates for `KeyInfo`, signer first.
    chain: Vec<Arc<CertificateInfo>>,
}

struct DigestComputed<'d> {
    unsigned: Unsigned<'d>,
    insert_at: usize,
    reference_uri: String,
    digest_value: String,
}

struct SignatureComputed {
    text: String,
    value_at: usize,
    signature_value: String,
}

impl SignatureComputed {
    fn embed(mut self) -> String {
        self.text.insert_str(self.value_at, &self.signature_value);
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscalsig_core::{algorithm, ErrorKind};
    use fiscalsig_keys::SoftwareCertificate;
    use roxmltree::{Node, NodeId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LEAF_KEY: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../test-data/pki/leaf.key.pem"
    ));
    const LEAF_CERT: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../test-data/pki/leaf.cert.pem"
    ));
    const EXPIRED_KEY: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../test-data/pki/expired.key.pem"
    ));
    const EXPIRED_CERT: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../test-data/pki/expired.cert.pem"
    ));

    const NFE: &str = r#"<NFe xmlns="http://www.portalfiscal.inf.br/nfe"><infNFe Id="NFe41190612345678000195550010000000011000000015" versao="4.00"><ide><cUF>41</cUF></ide><det nItem="1"><prod><vProd>100.00</vProd></prod></det></infNFe></NFe>"#;
    const NFE_ID: &str = "NFe41190612345678000195550010000000011000000015";

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl Canonicalizer for Counting {
        fn canonicalize_node(
            &self,
            node: Node<'_, '_>,
            config: &C14nConfig,
            excluded: &[NodeId],
        ) -> Result<Vec<u8>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            W3cCanonicalizer.canonicalize_node(node, config, excluded)
        }
    }

    fn leaf() -> SoftwareCertificate {
        SoftwareCertificate::from_pem(LEAF_KEY, LEAF_CERT).unwrap()
    }

    #[test]
    fn reference_and_transforms() {
        let signed = SignatureBuilder::default().sign(NFE, NFE_ID, &leaf()).unwrap();
        let doc = fiscalsig_xml::parse(&signed).unwrap();
        let reference = fiscalsig_xml::find_element(&doc, ns::DSIG, ns::node::REFERENCE).unwrap();
        assert_eq!(reference.attribute("URI"), Some(format!("#{NFE_ID}").as_str()));

        let transforms: Vec<_> = reference
            .descendants()
            .filter(|n| n.has_tag_name((ns::DSIG, ns::node::TRANSFORM)))
            .filter_map(|n| n.attribute("Algorithm"))
            .collect();
        assert_eq!(transforms, [algorithm::ENVELOPED_SIGNATURE, algorithm::C14N]);

        let method = fiscalsig_xml::find_element(&doc, ns::DSIG, ns::node::SIGNATURE_METHOD).unwrap();
        assert_eq!(method.attribute("Algorithm"), Some(algorithm::RSA_SHA1));
    }

    #[test]
    fn signature_follows_target() {
        let signed = SignatureBuilder::default().sign(NFE, NFE_ID, &leaf()).unwrap();
        let doc = fiscalsig_xml::parse(&signed).unwrap();
        let target = doc
            .descendants()
            .find(|n| n.attribute("Id") == Some(NFE_ID))
            .unwrap();
        let sibling = target.next_sibling_element().unwrap();
        assert!(sibling.has_tag_name((ns::DSIG, ns::node::SIGNATURE)));
        assert_eq!(sibling.parent_element(), target.parent_element());
        assert!(signed.starts_with(&NFE[..NFE.len() - "</NFe>".len()]));
    }

    #[test]
    fn canonicalizes_twice_and_signs_once() {
        let builder = SignatureBuilder::with_canonicalizer(SigningConfig::sha256(), Counting::default());
        builder.sign(NFE, NFE_ID, &leaf()).unwrap();
        assert_eq!(builder.canonicalizer().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn expired_certificate_fails_before_canonicalization() {
        let provider = SoftwareCertificate::from_pem(EXPIRED_KEY, EXPIRED_CERT).unwrap();
        let builder = SignatureBuilder::with_canonicalizer(SigningConfig::default(), Counting::default());
        let err = builder.sign(NFE, NFE_ID, &provider).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Certificate);
        assert_eq!(builder.canonicalizer().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn not_yet_valid_certificate_fails_before_canonicalization() {
        let provider = leaf();
        let not_before = provider.public_certificate().unwrap().not_before;
        let builder = SignatureBuilder::with_canonicalizer(SigningConfig::default(), Counting::default())
            .at(not_before - Duration::from_secs(60));
        let err = builder.sign(NFE, NFE_ID, &provider).unwrap_err();
        assert!(matches!(err, Error::Certificate(ref msg) if msg.contains("not yet valid")));
        assert_eq!(builder.canonicalizer().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closed_provider_is_a_certificate_error() {
        let provider = leaf();
        provider.close().unwrap();
        let builder = SignatureBuilder::with_canonicalizer(SigningConfig::default(), Counting::default());
        let err = builder.sign(NFE, NFE_ID, &provider).unwrap_err();
        assert!(matches!(err, Error::Closed));
        assert_eq!(builder.canonicalizer().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_and_root_targets() {
        let builder = SignatureBuilder::default();
        let err = builder.sign(NFE, "NFe00", &leaf()).unwrap_err();
        assert!(matches!(err, Error::ReferenceNotFound(ref id) if id == "NFe00"));

        let xml = r#"<infNFe Id="NFe1"><v>1</v></infNFe>"#;
        let err = builder.sign(xml, "NFe1", &leaf()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let xml = r#"<r><a Id="x"/><b Id="x"/></r>"#;
        let err = SignatureBuilder::default().sign(xml, "x", &leaf()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn exclusive_prefixes_are_declared() {
        let config = SigningConfig {
            canonicalization: C14nConfig::exclusive().with_prefixes(vec!["#default".into()]),
            ..SigningConfig::default()
        };
        let signed = SignatureBuilder::new(config).sign(NFE, NFE_ID, &leaf()).unwrap();
        let doc = fiscalsig_xml::parse(&signed).unwrap();
        let lists: Vec<_> = doc
            .descendants()
            .filter(|n| n.has_tag_name((ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES)))
            .filter_map(|n| n.attribute("PrefixList"))
            .collect();
        assert_eq!(lists, ["#default", "#default"]);
    }

    #[test]
    fn key_info_carries_the_certificate() {
        let signed = SignatureBuilder::default().sign(NFE, NFE_ID, &leaf()).unwrap();
        let doc = fiscalsig_xml::parse(&signed).unwrap();
        let cert = fiscalsig_xml::find_element(&doc, ns::DSIG, ns::node::X509_CERTIFICATE).unwrap();
        let der = b64::decode(cert.text().unwrap()).unwrap();
        assert_eq!(der, leaf().public_certificate().unwrap().der);

        let config = SigningConfig {
            include_certificate: false,
            ..SigningConfig::default()
        };
        let signed = SignatureBuilder::new(config).sign(NFE, NFE_ID, &leaf()).unwrap();
        assert!(!signed.contains("KeyInfo"));
    }

    #[test]
    fn deterministic_output() {
        let builder = SignatureBuilder::default();
        let a = builder.sign(NFE, NFE_ID, &leaf()).unwrap();
        let b = builder.sign(NFE, NFE_ID, &leaf()).unwrap();
        assert_eq!(a, b);
    }
}
