//! Provider, cache and trust behaviour over the fixture PKI.

use fiscalsig_core::{Error, ErrorKind, HashAlgorithm};
use fiscalsig_keys::loader::{load_certificate_file, load_software_certificate};
use fiscalsig_keys::{
    taxpayer_id, CertificateCache, CertificateProvider, TaxpayerId, TrustValidator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn pki(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../test-data/pki")
        .join(name)
}

fn leaf_provider() -> Box<dyn CertificateProvider> {
    let intermediate = load_certificate_file(&pki("intermediate.cert.pem")).unwrap();
    let provider =
        load_software_certificate(&pki("leaf.key.pem"), &pki("leaf.cert.pem")).unwrap();
    Box::new(provider.with_chain(vec![intermediate]))
}

#[test]
fn signatures_verify_with_the_certificate_key() {
    let provider = leaf_provider();
    let cert = provider.public_certificate().unwrap();
    for hash in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
        let sig = provider.sign(b"<SignedInfo></SignedInfo>", hash).unwrap();
        assert!(fiscalsig_crypto::verify_pkcs1v15(
            &cert.public_key,
            hash,
            b"<SignedInfo></SignedInfo>",
            &sig
        )
        .unwrap());
    }
}

#[test]
fn provider_chain_is_trusted() {
    let provider = leaf_provider();
    let chain: Vec<_> = provider
        .certificate_chain()
        .unwrap()
        .iter()
        .map(|c| c.as_ref().clone())
        .collect();
    assert_eq!(chain.len(), 2);
    assert!(TrustValidator::default().is_trusted(&chain[0], Some(&chain)));
    assert_eq!(
        taxpayer_id(&chain[0]),
        Some(TaxpayerId::Cnpj("12345678000195".into()))
    );
}

#[test]
fn mismatched_key_is_refused() {
    let err = load_software_certificate(&pki("untrusted.key.pem"), &pki("leaf.cert.pem"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Certificate);
    assert!(!err.to_string().contains("PRIVATE KEY"));
}

#[test]
fn cached_provider_survives_eviction_until_dropped() {
    let cache = CertificateCache::new(1, Duration::from_secs(60));
    let leaf = cache.get_or_load("leaf", || Ok(leaf_provider())).unwrap();
    let _other = cache.get_or_load("other", || Ok(leaf_provider())).unwrap();
    assert_eq!(cache.len(), 1);

    assert!(leaf.sign(b"data", HashAlgorithm::Sha256).is_ok());
    let weak = Arc::downgrade(&leaf);
    drop(leaf);
    assert!(weak.upgrade().is_none());
}

#[test]
fn closed_provider_refuses_to_sign() {
    let provider = leaf_provider();
    provider.close().unwrap();
    provider.close().unwrap();
    assert!(matches!(
        provider.sign(b"data", HashAlgorithm::Sha1),
        Err(Error::Closed)
    ));
    assert!(matches!(provider.public_certificate(), Err(Error::Closed)));
}
