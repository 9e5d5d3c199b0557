#![forbid(unsafe_code)]

//! XML Digital Signature creation and validation for fiscal documents.
//!
//! [`SignatureBuilder`] places an enveloped `Signature` right after the
//! element it signs, the layout the tax authority expects for NFe and its
//! sibling document models. [`SignatureValidator`] checks such documents and
//! reports every defect it finds in one [`ValidationResult`].

pub mod config;
pub mod report;
pub mod sign;
pub mod transforms;
pub mod verify;

pub use config::{SigningConfig, ValidationConfig};
pub use report::{
    CertificateSummary, IssueCode, ReferenceOutcome, ReferenceStatus, StructureReport,
    ValidationIssue, ValidationResult,
};
pub use sign::SignatureBuilder;
pub use transforms::Transform;
pub use verify::SignatureValidator;

pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    /// Decode, ignoring the line breaks signers like to insert.
    pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
        let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(clean)
    }
}
