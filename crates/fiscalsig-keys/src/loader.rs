#![forbid(unsafe_code)]

//! Loading RSA keys and certificates from PEM and DER.
//!
//! Error messages describe the encoding problem only; key bytes are never echoed.

use crate::certificate::CertificateInfo;
use crate::provider::SoftwareCertificate;
use fiscalsig_core::Error;
use std::path::Path;

const PEM_CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERTIFICATE_END: &str = "-----END CERTIFICATE-----";

/// Load an RSA private key from PEM (PKCS#8 first, then PKCS#1).
pub fn load_rsa_private_pem(pem_data: &[u8]) -> Result<rsa::RsaPrivateKey, Error> {
    let pem_str = std::str::from_utf8(pem_data)
        .map_err(|_| Error::Certificate("private key PEM is not valid UTF-8".into()))?;

    use rsa::pkcs8::DecodePrivateKey;
    if let Ok(pk) = rsa::RsaPrivateKey::from_pkcs8_pem(pem_str) {
        return Ok(pk);
    }

    use rsa::pkcs1::DecodeRsaPrivateKey;
    rsa::RsaPrivateKey::from_pkcs1_pem(pem_str)
        .map_err(|_| Error::Certificate("failed to parse RSA private key PEM".into()))
}

/// Load one certificate from a PEM `CERTIFICATE` block.
pub fn load_certificate_pem(pem_data: &[u8]) -> Result<CertificateInfo, Error> {
    let pem_str = std::str::from_utf8(pem_data)
        .map_err(|e| Error::Certificate(format!("invalid PEM encoding: {e}")))?;

    // Some PEM files carry trailing blank lines.
    let (label, der_bytes) = pem_rfc7468::decode_vec(pem_str.trim().as_bytes())
        .map_err(|e| Error::Certificate(format!("failed to decode certificate PEM: {e}")))?;

    if label != "CERTIFICATE" {
        return Err(Error::Certificate(format!(
            "expected CERTIFICATE PEM label, got: {label}"
        )));
    }

    CertificateInfo::from_der(&der_bytes)
}

/// Load every certificate of a PEM bundle, in file order.
pub fn load_certificate_bundle_pem(pem_data: &[u8]) -> Result<Vec<CertificateInfo>, Error> {
    let pem_str = std::str::from_utf8(pem_data)
        .map_err(|e| Error::Certificate(format!("invalid PEM encoding: {e}")))?;

    let mut certs = Vec::new();
    let mut rest = pem_str;
    while let Some(start) = rest.find(PEM_CERTIFICATE_BEGIN) {
        let block = &rest[start..];
        let end = block
            .find(PEM_CERTIFICATE_END)
            .ok_or_else(|| Error::Certificate("unterminated CERTIFICATE block".into()))?
            + PEM_CERTIFICATE_END.len();
        certs.push(load_certificate_pem(block[..end].as_bytes())?);
        rest = &block[end..];
    }
    if certs.is_empty() {
        return Err(Error::Certificate("no CERTIFICATE block found".into()));
    }
    Ok(certs)
}

/// Load a certificate file, PEM or DER.
pub fn load_certificate_file(path: &Path) -> Result<CertificateInfo, Error> {
    let data = std::fs::read(path)?;
    if data.starts_with(b"-----BEGIN") || data.iter().take(64).all(u8::is_ascii) {
        load_certificate_pem(&data)
    } else {
        CertificateInfo::from_der(&data)
    }
}

/// Load an in-memory signing certificate (A1) from PEM key and certificate files.
///
/// The certificate file may be a bundle: the first block is the signing
/// certificate, the rest form its chain.
pub fn load_software_certificate(key_path: &Path, cert_path: &Path) -> Result<SoftwareCertificate, Error> {
    let key = load_rsa_private_pem(&std::fs::read(key_path)?)?;
    let mut certs = load_certificate_bundle_pem(&std::fs::read(cert_path)?)?;
    let leaf = certs.remove(0);
    log::debug!("loaded signing certificate {} (serial {})", leaf.subject, leaf.serial);
    Ok(SoftwareCertificate::new(key, leaf)?.with_chain(certs))
}
