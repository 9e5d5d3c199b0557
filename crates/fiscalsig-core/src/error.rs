#![forbid(unsafe_code)]

//! Error types for fiscalsig.

use serde::Serialize;

/// Errors produced while canonicalizing, signing or validating fiscal documents.
///
/// Messages never carry private key material or token PINs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no element with Id \"{0}\"")]
    ReferenceNotFound(String),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("certificate provider is closed")]
    Closed,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("trust error: {0}")]
    Trust(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, missing elements, unsupported algorithms.
    Validation,
    /// Expired or unusable certificate, provider failures.
    Certificate,
    /// Input could not be canonicalized.
    Canonicalization,
    /// Digest or signature value does not match.
    SignatureMismatch,
    /// Certificate does not chain to the national PKI.
    Trust,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::XmlParse(_) | Self::Canonicalization(_) => ErrorKind::Canonicalization,
            Self::Validation(_)
            | Self::ReferenceNotFound(_)
            | Self::MissingElement(_)
            | Self::MissingAttribute(_)
            | Self::UnsupportedAlgorithm(_)
            | Self::Base64(_)
            | Self::Config(_)
            | Self::Io(_) => ErrorKind::Validation,
            Self::Certificate(_) | Self::Closed | Self::Signing(_) | Self::Crypto(_) => {
                ErrorKind::Certificate
            }
            Self::Trust(_) => ErrorKind::Trust,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only provider failures (token unavailable, timeouts) qualify; an
    /// expired certificate or a mismatched signature stays that way.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Signing(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::XmlParse("x".into()).kind(), ErrorKind::Canonicalization);
        assert_eq!(Error::ReferenceNotFound("a".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::Closed.kind(), ErrorKind::Certificate);
        assert_eq!(Error::Trust("no anchor".into()).kind(), ErrorKind::Trust);
    }

    #[test]
    fn only_provider_failures_retry() {
        assert!(Error::Signing("token timeout".into()).is_retriable());
        assert!(!Error::Certificate("expired".into()).is_retriable());
        assert!(!Error::Closed.is_retriable());
    }
}
