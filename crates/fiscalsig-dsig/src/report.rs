#![forbid(unsafe_code)]

//! The validation report.
//!
//! Validation never stops at the first defect. Everything found ends up in a
//! [`ValidationResult`]: overall verdicts, one outcome per `Reference`,
//! structural flags for operators, and ordered errors and warnings.

use fiscalsig_core::ErrorKind;
use fiscalsig_keys::certificate::format_time;
use fiscalsig_keys::{taxpayer_id, CertificateInfo, TaxpayerId};
use serde::Serialize;

/// Machine-readable classification of a [`ValidationIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    /// The document is not well-formed XML.
    Parse,
    MissingSignature,
    /// `Signature` exists but outside the XMLDSig namespace.
    WrongNamespace,
    MissingElement,
    UnsupportedAlgorithm,
    /// A `Reference/@URI` that is not `""` or `#id`.
    MalformedReference,
    ReferenceNotFound,
    /// Two elements share the referenced id.
    AmbiguousReference,
    InvalidBase64,
    Canonicalization,
    DigestMismatch,
    SignatureMismatch,
    MissingCertificate,
    InvalidCertificate,
    CertificateExpired,
    KeyUsage,
    UntrustedChain,
    /// Informational, e.g. more than one signature in the document.
    Notice,
}

impl IssueCode {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IssueCode::Parse | IssueCode::Canonicalization => ErrorKind::Canonicalization,
            IssueCode::DigestMismatch | IssueCode::SignatureMismatch => ErrorKind::SignatureMismatch,
            IssueCode::MissingCertificate
            | IssueCode::InvalidCertificate
            | IssueCode::CertificateExpired
            | IssueCode::KeyUsage => ErrorKind::Certificate,
            IssueCode::UntrustedChain => ErrorKind::Trust,
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Ok,
    DigestMismatch,
    /// The digest could not be computed.
    Error,
}

/// What happened to one `Reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceOutcome {
    pub uri: String,
    pub digest_algorithm: Option<String>,
    pub status: ReferenceStatus,
}

impl ReferenceOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == ReferenceStatus::Ok
    }
}

/// Fine-grained presence and well-formedness flags.
///
/// The authority answers a bad signature with a bare rejection code, so
/// these flags are what an operator has to go on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructureReport {
    pub signature_present: bool,
    pub xmldsig_namespace: bool,
    pub signed_info_present: bool,
    pub canonicalization_method: bool,
    pub signature_method: bool,
    /// Every Reference has a supported `DigestMethod`.
    pub digest_method: bool,
    /// Every Reference has a base64 `DigestValue` of the right length.
    pub digest_value: bool,
    pub signature_value_present: bool,
    pub signature_value_base64: bool,
    /// Every Reference declares the enveloped-signature transform.
    pub enveloped_transform: bool,
    /// Every Reference declares a canonicalization transform.
    pub c14n_transform: bool,
    /// Every `Reference/@URI` is `""` or `#id`.
    pub reference_uri: bool,
    pub certificate_present: bool,
}

impl StructureReport {
    pub fn is_complete(&self) -> bool {
        self.signature_present
            && self.xmldsig_namespace
            && self.signed_info_present
            && self.canonicalization_method
            && self.signature_method
            && self.digest_method
            && self.digest_value
            && self.signature_value_present
            && self.signature_value_base64
            && self.enveloped_transform
            && self.c14n_transform
            && self.reference_uri
            && self.certificate_present
    }
}

/// Public facts about the certificate a signature was checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: String,
    pub not_after: String,
    /// Read from the subject by pattern matching; see [`fiscalsig_keys::taxpayer`].
    pub taxpayer_id: Option<TaxpayerId>,
}

impl From<&CertificateInfo> for CertificateSummary {
    fn from(cert: &CertificateInfo) -> Self {
        Self {
            subject: cert.subject.clone(),
            issuer: cert.issuer.clone(),
            serial: cert.serial.clone(),
            not_before: format_time(cert.not_before),
            not_after: format_time(cert.not_after),
            taxpayer_id: taxpayer_id(cert),
        }
    }
}

/// Outcome of [`SignatureValidator::validate`](crate::SignatureValidator::validate).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// Every Reference digest matches and `SignatureValue` verifies.
    pub signature_valid: bool,
    /// The certificate is inside its window and may sign.
    pub certificate_valid: bool,
    pub trusted_chain: bool,
    pub is_valid: bool,
    pub references: Vec<ReferenceOutcome>,
    pub structure: StructureReport,
    pub certificate: Option<CertificateSummary>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub(crate) fn error(&mut self, code: IssueCode, message: impl Into<String>) {
        let message = message.into();
        log::debug!("validation error ({code:?}): {message}");
        self.errors.push(ValidationIssue { code, message });
    }

    pub(crate) fn warning(&mut self, code: IssueCode, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            code,
            message: message.into(),
        });
    }

    pub(crate) fn finish(mut self) -> Self {
        self.is_valid = self.signature_valid && self.certificate_valid && self.errors.is_empty();
        self
    }

    /// Errors carrying `code`.
    pub fn errors_with(&self, code: IssueCode) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().filter(move |issue| issue.code == code)
    }

    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors_with(code).next().is_some()
    }

    pub fn reference(&self, uri: &str) -> Option<&ReferenceOutcome> {
        self.references.iter().find(|r| r.uri == uri)
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verdict = if self.is_valid { "VALID" } else { "INVALID" };
        writeln!(f, "{verdict}")?;
        writeln!(
            f,
            "signature: {}, certificate: {}, trusted chain: {}",
            self.signature_valid, self.certificate_valid, self.trusted_chain
        )?;
        for r in &self.references {
            writeln!(f, "reference {:?}: {:?}", r.uri, r.status)?;
        }
        for issue in &self.errors {
            writeln!(f, "error [{:?}]: {}", issue.code, issue.message)?;
        }
        for issue in &self.warnings {
            writeln!(f, "warning [{:?}]: {}", issue.code, issue.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_needs_everything() {
        let mut result = ValidationResult {
            signature_valid: true,
            certificate_valid: true,
            ..Default::default()
        };
        result.warning(IssueCode::UntrustedChain, "not anchored");
        assert!(result.clone().finish().is_valid);

        result.error(IssueCode::KeyUsage, "no digitalSignature");
        let result = result.finish();
        assert!(!result.is_valid);
        assert!(result.has_error(IssueCode::KeyUsage));
        assert!(!result.has_error(IssueCode::DigestMismatch));
    }

    #[test]
    fn issue_kinds() {
        assert_eq!(IssueCode::DigestMismatch.kind(), ErrorKind::SignatureMismatch);
        assert_eq!(IssueCode::CertificateExpired.kind(), ErrorKind::Certificate);
        assert_eq!(IssueCode::UntrustedChain.kind(), ErrorKind::Trust);
        assert_eq!(IssueCode::MalformedReference.kind(), ErrorKind::Validation);
    }

    #[test]
    fn serializes_snake_case() {
        let mut result = ValidationResult::default();
        result.error(IssueCode::MissingSignature, "no Signature element");
        let json = serde_json::to_value(result.finish()).unwrap();
        assert_eq!(json["errors"][0]["code"], "missing_signature");
        assert_eq!(json["is_valid"], false);
        assert_eq!(json["structure"]["signature_present"], false);
    }
}
