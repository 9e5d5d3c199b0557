//! Sign-then-validate behaviour over realistic NFe documents.

mod common;

use common::{certificate, mid_2015, nfe, provider, two_reference_document, NFE_ID};
use fiscalsig_c14n::{canonicalize_str, C14nConfig};
use fiscalsig_core::{ErrorKind, HashAlgorithm};
use fiscalsig_dsig::{
    IssueCode, ReferenceStatus, SignatureBuilder, SignatureValidator, SigningConfig,
    ValidationConfig,
};
use fiscalsig_keys::TaxpayerId;

fn sign_with(config: SigningConfig, key: &str) -> String {
    SignatureBuilder::new(config)
        .sign(&nfe(), NFE_ID, &provider(key))
        .unwrap()
}

fn sign(key: &str) -> String {
    sign_with(SigningConfig::default(), key)
}

#[test]
fn round_trip_sha1_and_sha256() {
    for config in [SigningConfig::default(), SigningConfig::sha256()] {
        let digest = config.digest_algorithm;
        let signed = sign_with(config, "leaf");
        let result = SignatureValidator::default().validate(&signed);

        assert!(result.is_valid, "{digest}: {result}");
        assert!(result.signature_valid);
        assert!(result.certificate_valid);
        assert!(result.trusted_chain);
        assert!(result.errors.is_empty());
        assert!(result.structure.is_complete());

        let reference = result.reference(&format!("#{NFE_ID}")).unwrap();
        assert_eq!(reference.status, ReferenceStatus::Ok);
        assert_eq!(
            reference.digest_algorithm.as_deref(),
            Some(digest.digest_uri())
        );
    }
}

#[test]
fn exclusive_round_trip() {
    let config = SigningConfig {
        digest_algorithm: HashAlgorithm::Sha256,
        canonicalization: C14nConfig::exclusive().with_prefixes(vec!["#default".into()]),
        ..SigningConfig::default()
    };
    let signed = sign_with(config, "leaf");
    let result = SignatureValidator::default().validate(&signed);
    assert!(result.is_valid, "{result}");
}

#[test]
fn certificate_summary_names_the_taxpayer() {
    let result = SignatureValidator::default().validate(&sign("leaf"));
    let summary = result.certificate.unwrap();
    assert!(summary.serial.ends_with("1002"));
    assert_eq!(
        summary.taxpayer_id,
        Some(TaxpayerId::Cnpj("12345678000195".into()))
    );
}

#[test]
fn tampered_content_fails_without_panicking() {
    let signed = sign("leaf");
    let tampered = signed.replacen("<vProd>100.00</vProd>", "<vProd>100.01</vProd>", 1);
    assert_ne!(signed, tampered);

    let result = SignatureValidator::default().validate(&tampered);
    assert!(!result.signature_valid);
    assert!(!result.is_valid);
    assert!(result.has_error(IssueCode::DigestMismatch));
    assert!(!result.has_error(IssueCode::SignatureMismatch));
}

#[test]
fn tampered_signature_value_fails() {
    let signed = sign("leaf");
    let start = signed.find("<SignatureValue>").unwrap() + "<SignatureValue>".len();
    let mut bytes = signed.into_bytes();
    bytes[start] = if bytes[start] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();

    let result = SignatureValidator::default().validate(&tampered);
    assert!(!result.signature_valid);
    assert!(result.has_error(IssueCode::SignatureMismatch));
    assert!(result.references.iter().all(|r| r.is_ok()));
}

#[test]
fn wrong_key_is_rejected() {
    let signed = sign("leaf");
    let stranger = certificate("untrusted");

    let result = SignatureValidator::default().validate_with_certificate(&signed, &stranger.der);
    assert!(!result.signature_valid);
    assert!(result.has_error(IssueCode::SignatureMismatch));

    use base64::Engine;
    let engine = base64::engine::general_purpose::STANDARD;
    let swapped = signed.replace(
        &engine.encode(&certificate("leaf").der),
        &engine.encode(&stranger.der),
    );
    let result = SignatureValidator::default().validate(&swapped);
    assert!(!result.signature_valid);
    assert!(!result.is_valid);
}

#[test]
fn two_references_one_corrupted() {
    let intact = SignatureValidator::default().validate(&two_reference_document(false));
    assert!(intact.is_valid, "{intact}");
    assert_eq!(intact.references.len(), 2);

    let result = SignatureValidator::default().validate(&two_reference_document(true));
    assert!(!result.is_valid);
    assert!(!result.signature_valid);
    assert_eq!(result.errors_with(IssueCode::DigestMismatch).count(), 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.reference("#A1").unwrap().is_ok());
    assert_eq!(
        result.reference("#B2").unwrap().status,
        ReferenceStatus::DigestMismatch
    );
}

#[test]
fn expired_certificate() {
    let err = SignatureBuilder::default()
        .sign(&nfe(), NFE_ID, &provider("expired"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Certificate);

    let signed = SignatureBuilder::default()
        .at(mid_2015())
        .sign(&nfe(), NFE_ID, &provider("expired"))
        .unwrap();

    let now = SignatureValidator::default().validate(&signed);
    assert!(now.signature_valid);
    assert!(!now.certificate_valid);
    assert!(now.has_error(IssueCode::CertificateExpired));
    assert!(!now.is_valid);

    let then = SignatureValidator::new(ValidationConfig::default().at(mid_2015())).validate(&signed);
    assert!(then.is_valid, "{then}");
}

#[test]
fn missing_digital_signature_usage() {
    let result = SignatureValidator::default().validate(&sign("nodsig"));
    assert!(result.signature_valid);
    assert!(!result.certificate_valid);
    assert!(result.has_error(IssueCode::KeyUsage));
    assert!(!result.trusted_chain);
}

#[test]
fn untrusted_chain_is_a_warning_unless_required() {
    let signed = sign("untrusted");
    let result = SignatureValidator::default().validate(&signed);
    assert!(result.is_valid, "{result}");
    assert!(!result.trusted_chain);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.code == IssueCode::UntrustedChain));

    let strict = ValidationConfig {
        require_trusted_chain: true,
        ..ValidationConfig::default()
    };
    let result = SignatureValidator::new(strict).validate(&signed);
    assert!(!result.is_valid);
    assert!(result.has_error(IssueCode::UntrustedChain));
}

#[test]
fn embedded_chain_is_checked() {
    let intermediate = certificate("intermediate");
    let leaf = provider("leaf").with_chain(vec![intermediate]);
    let config = SigningConfig {
        include_chain: true,
        ..SigningConfig::default()
    };
    let signed = SignatureBuilder::new(config).sign(&nfe(), NFE_ID, &leaf).unwrap();
    assert_eq!(signed.matches("<X509Certificate>").count(), 2);

    let result = SignatureValidator::default().validate(&signed);
    assert!(result.is_valid, "{result}");
    assert!(result.trusted_chain);
}

#[test]
fn crlf_documents_sign_and_validate() {
    let crlf = nfe().replace("<ide>", "\r\n<ide>").replace("</det>", "</det>\r\n");
    let signed = SignatureBuilder::default()
        .sign(&crlf, NFE_ID, &provider("leaf"))
        .unwrap();
    assert!(SignatureValidator::default().validate(&signed).is_valid);
}

#[test]
fn second_signature_is_noticed() {
    let batch = r#"<enviNFe xmlns="http://www.portalfiscal.inf.br/nfe"><NFe><infNFe Id="NFe1"><v>1</v></infNFe></NFe><NFe><infNFe Id="NFe2"><v>2</v></infNFe></NFe></enviNFe>"#;
    let builder = SignatureBuilder::default();
    let once = builder.sign(batch, "NFe1", &provider("leaf")).unwrap();
    let twice = builder.sign(&once, "NFe2", &provider("leaf")).unwrap();

    let result = SignatureValidator::default().validate(&twice);
    assert!(result.is_valid, "{result}");
    assert_eq!(result.references.len(), 1);
    assert_eq!(result.references[0].uri, "#NFe1");
    assert!(result.warnings.iter().any(|w| w.code == IssueCode::Notice));
}

#[test]
fn signed_output_canonicalizes_idempotently() {
    let signed = sign("leaf");
    let config = C14nConfig::inclusive();
    let once = canonicalize_str(&signed, &config).unwrap();
    let twice = canonicalize_str(std::str::from_utf8(&once).unwrap(), &config).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn validators_are_shareable_across_threads() {
    let signed = sign("leaf");
    let validator = SignatureValidator::default();
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| validator.validate(&signed).is_valid))
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    });
}

#[test]
fn report_serializes() {
    let result = SignatureValidator::default().validate(&two_reference_document(true));
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["is_valid"], false);
    assert_eq!(json["references"][1]["status"], "digest_mismatch");
    assert_eq!(json["errors"][0]["code"], "digest_mismatch");
    assert_eq!(json["certificate"]["taxpayer_id"]["kind"], "cnpj");
}
