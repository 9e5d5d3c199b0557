#![forbid(unsafe_code)]

//! Taxpayer identifiers carried in ICP-Brasil certificate subjects.
//!
//! ICP-Brasil end-entity certificates name their holder as
//! `CN=<NAME>:<CNPJ or CPF>`. Reading the number back is plain pattern
//! matching over the subject text. It identifies whom the certificate claims
//! to belong to, and carries no cryptographic weight on its own.

use crate::certificate::CertificateInfo;
use serde::Serialize;

/// A Brazilian taxpayer number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "number", rename_all = "lowercase")]
pub enum TaxpayerId {
    /// Company registry number, 14 digits.
    Cnpj(String),
    /// Individual registry number, 11 digits.
    Cpf(String),
}

impl TaxpayerId {
    pub fn number(&self) -> &str {
        match self {
            Self::Cnpj(n) | Self::Cpf(n) => n,
        }
    }

    fn from_digits(digits: &str) -> Option<Self> {
        match digits.len() {
            14 => Some(Self::Cnpj(digits.to_owned())),
            11 => Some(Self::Cpf(digits.to_owned())),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaxpayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cnpj(n) => write!(f, "CNPJ {n}"),
            Self::Cpf(n) => write!(f, "CPF {n}"),
        }
    }
}

/// Read the taxpayer number from a certificate subject.
///
/// Tries the `NAME:DIGITS` common name first, then falls back to the first
/// 14- or 11-digit run anywhere in the subject.
pub fn taxpayer_id(certificate: &CertificateInfo) -> Option<TaxpayerId> {
    certificate
        .common_name
        .as_deref()
        .and_then(from_common_name)
        .or_else(|| scan_digit_runs(&certificate.subject))
}

/// `"EMPRESA LTDA:12345678000195"` → CNPJ.
pub fn from_common_name(cn: &str) -> Option<TaxpayerId> {
    let (_, digits) = cn.rsplit_once(':')?;
    let digits = digits.trim();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    TaxpayerId::from_digits(digits)
}

fn scan_digit_runs(text: &str) -> Option<TaxpayerId> {
    let runs: Vec<&str> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .collect();
    runs.iter()
        .find(|run| run.len() == 14)
        .or_else(|| runs.iter().find(|run| run.len() == 11))
        .and_then(|run| TaxpayerId::from_digits(run))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_name_forms() {
        assert_eq!(
            from_common_name("EMPRESA TESTE LTDA:12345678000195"),
            Some(TaxpayerId::Cnpj("12345678000195".into()))
        );
        assert_eq!(
            from_common_name("FULANO DE TAL:12345678909"),
            Some(TaxpayerId::Cpf("12345678909".into()))
        );
        assert_eq!(from_common_name("FULANO DE TAL"), None);
        assert_eq!(from_common_name("FULANO:123"), None);
        assert_eq!(from_common_name("FULANO:1234567890A"), None);
    }

    #[test]
    fn subject_scan_prefers_cnpj() {
        assert_eq!(
            scan_digit_runs("CN=X,serialNumber=12345678909,OU=11222333000181"),
            Some(TaxpayerId::Cnpj("11222333000181".into()))
        );
        assert_eq!(scan_digit_runs("CN=example signer,O=Example Corp"), None);
    }

    #[test]
    fn from_certificates() {
        let leaf = CertificateInfo::from_pem(include_bytes!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../test-data/pki/leaf.cert.pem"
        )))
        .unwrap();
        let id = taxpayer_id(&leaf).unwrap();
        assert_eq!(id.number(), "12345678000195");
        assert_eq!(id.to_string(), "CNPJ 12345678000195");

        let untrusted = CertificateInfo::from_pem(include_bytes!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../test-data/pki/untrusted.cert.pem"
        )))
        .unwrap();
        assert_eq!(taxpayer_id(&untrusted), None);
    }
}
