#![forbid(unsafe_code)]

//! Parsed X.509 signing certificates.

use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use fiscalsig_core::Error;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_cert::ext::pkix::{BasicConstraints, CertificatePolicies, ExtendedKeyUsage, KeyUsage};
use x509_cert::name::Name;
use x509_cert::Certificate;

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");
const OID_CERTIFICATE_POLICIES: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.32");
const OID_EXT_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");

/// `id-kp-clientAuth`
pub const EKU_CLIENT_AUTH: &str = "1.3.6.1.5.5.7.3.2";
/// `id-kp-emailProtection`
pub const EKU_EMAIL_PROTECTION: &str = "1.3.6.1.5.5.7.3.4";

/// Key usage bits relevant to document signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KeyUsageFlags {
    pub digital_signature: bool,
    pub non_repudiation: bool,
    pub key_encipherment: bool,
    pub key_cert_sign: bool,
}

/// Public view of a signing certificate.
///
/// Holds only public data; safe to log, clone and share.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// DER encoding, as embedded in `X509Certificate`.
    pub der: Vec<u8>,
    /// RFC 4514 subject name.
    pub subject: String,
    /// RFC 4514 issuer name.
    pub issuer: String,
    /// Serial number, lowercase hex.
    pub serial: String,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    pub public_key: rsa::RsaPublicKey,
    pub common_name: Option<String>,
    /// `None` when the certificate has no key usage extension.
    pub key_usage: Option<KeyUsageFlags>,
    /// Extended key usage OIDs in dotted form.
    pub extended_key_usage: Vec<String>,
    pub is_ca: bool,
    /// Certificate policy OIDs in dotted form.
    pub policies: Vec<String>,
    certificate: Certificate,
}

impl CertificateInfo {
    /// Parse a DER-encoded certificate carrying an RSA key.
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        let certificate = Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("failed to parse X.509 certificate: {e}")))?;
        let tbs = &certificate.tbs_certificate;

        let spki_der = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| Error::Certificate(format!("failed to encode SPKI: {e}")))?;
        use spki::DecodePublicKey;
        let public_key = rsa::RsaPublicKey::from_public_key_der(&spki_der)
            .map_err(|_| Error::Certificate("certificate does not carry an RSA public key".into()))?;

        let mut info = CertificateInfo {
            der: der.to_vec(),
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial: hex::encode(tbs.serial_number.as_bytes()),
            not_before: UNIX_EPOCH + tbs.validity.not_before.to_unix_duration(),
            not_after: UNIX_EPOCH + tbs.validity.not_after.to_unix_duration(),
            public_key,
            common_name: common_name(&tbs.subject),
            key_usage: None,
            extended_key_usage: Vec::new(),
            is_ca: false,
            policies: Vec::new(),
            certificate: certificate.clone(),
        };

        for ext in tbs.extensions.iter().flatten() {
            let value = ext.extn_value.as_bytes();
            let bad = |e: der::Error| {
                Error::Certificate(format!("malformed extension {}: {e}", ext.extn_id))
            };
            if ext.extn_id == OID_KEY_USAGE {
                let ku = KeyUsage::from_der(value).map_err(bad)?;
                info.key_usage = Some(KeyUsageFlags {
                    digital_signature: ku.digital_signature(),
                    non_repudiation: ku.non_repudiation(),
                    key_encipherment: ku.key_encipherment(),
                    key_cert_sign: ku.key_cert_sign(),
                });
            } else if ext.extn_id == OID_EXT_KEY_USAGE {
                let eku = ExtendedKeyUsage::from_der(value).map_err(bad)?;
                info.extended_key_usage = eku.0.iter().map(|oid| oid.to_string()).collect();
            } else if ext.extn_id == OID_BASIC_CONSTRAINTS {
                info.is_ca = BasicConstraints::from_der(value).map_err(bad)?.ca;
            } else if ext.extn_id == OID_CERTIFICATE_POLICIES {
                let policies = CertificatePolicies::from_der(value).map_err(bad)?;
                info.policies = policies
                    .0
                    .iter()
                    .map(|p| p.policy_identifier.to_string())
                    .collect();
            }
        }

        Ok(info)
    }

    /// Parse a PEM `CERTIFICATE` block.
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        crate::loader::load_certificate_pem(pem)
    }

    /// Check `at` against the validity window, widened by `skew` on both ends.
    pub fn check_validity(&self, at: SystemTime, skew: Duration) -> Result<(), Error> {
        if at + skew < self.not_before {
            return Err(Error::Certificate(format!(
                "certificate is not yet valid (notBefore: {})",
                format_time(self.not_before)
            )));
        }
        if at > self.not_after + skew {
            return Err(Error::Certificate(format!(
                "certificate has expired (notAfter: {})",
                format_time(self.not_after)
            )));
        }
        Ok(())
    }

    pub fn has_digital_signature(&self) -> bool {
        self.key_usage.is_some_and(|ku| ku.digital_signature)
    }

    /// Carries the clientAuth or emailProtection extended key usage.
    pub fn has_signing_eku(&self) -> bool {
        self.extended_key_usage
            .iter()
            .any(|oid| oid == EKU_CLIENT_AUTH || oid == EKU_EMAIL_PROTECTION)
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Verify that `issuer`'s key signed this certificate.
    pub fn verify_issued_by(&self, issuer: &CertificateInfo) -> Result<(), Error> {
        let tbs_der = self
            .certificate
            .tbs_certificate
            .to_der()
            .map_err(|e| Error::Certificate(format!("failed to encode TBS: {e}")))?;
        let sig_bytes = self
            .certificate
            .signature
            .as_bytes()
            .ok_or_else(|| Error::Certificate("no signature bytes".into()))?;

        // sha1WithRSAEncryption, sha256/384/512WithRSAEncryption
        const SHA1_RSA: &str = "1.2.840.113549.1.1.5";
        const SHA256_RSA: &str = "1.2.840.113549.1.1.11";
        const SHA384_RSA: &str = "1.2.840.113549.1.1.12";
        const SHA512_RSA: &str = "1.2.840.113549.1.1.13";

        let oid = self.certificate.signature_algorithm.oid.to_string();
        let key = &issuer.public_key;
        match oid.as_str() {
            SHA1_RSA => verify_rsa_signature::<sha1::Sha1>(key, &tbs_der, sig_bytes),
            SHA256_RSA => verify_rsa_signature::<sha2::Sha256>(key, &tbs_der, sig_bytes),
            SHA384_RSA => verify_rsa_signature::<sha2::Sha384>(key, &tbs_der, sig_bytes),
            SHA512_RSA => verify_rsa_signature::<sha2::Sha512>(key, &tbs_der, sig_bytes),
            _ => Err(Error::Certificate(format!(
                "unsupported certificate signature algorithm: {oid}"
            ))),
        }
    }
}

impl PartialEq for CertificateInfo {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for CertificateInfo {}

/// RFC 3339 rendering of a certificate time.
pub fn format_time(t: SystemTime) -> String {
    der::DateTime::from_system_time(t)
        .map(|dt| dt.to_string())
        .unwrap_or_else(|_| format!("{t:?}"))
}

fn verify_rsa_signature<D>(
    public_key: &rsa::RsaPublicKey,
    tbs_der: &[u8],
    signature: &[u8],
) -> Result<(), Error>
where
    D: digest::Digest + digest::const_oid::AssociatedOid,
    rsa::pkcs1v15::VerifyingKey<D>: signature::Verifier<rsa::pkcs1v15::Signature>,
{
    use signature::Verifier;
    let verifying_key = rsa::pkcs1v15::VerifyingKey::<D>::new(public_key.clone());
    let sig = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|e| Error::Certificate(format!("invalid RSA signature: {e}")))?;
    verifying_key
        .verify(tbs_der, &sig)
        .map_err(|e| Error::Certificate(format!("certificate signature verification failed: {e}")))
}

fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == OID_COMMON_NAME)
        .and_then(|atv| directory_string(&atv.value))
}

fn directory_string(value: &der::Any) -> Option<String> {
    use der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
    if let Ok(s) = value.decode_as::<Utf8StringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    if let Ok(s) = value.decode_as::<PrintableStringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    if let Ok(s) = value.decode_as::<Ia5StringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    None
}
