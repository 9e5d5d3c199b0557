#![forbid(unsafe_code)]

//! Signing and validation settings.

use fiscalsig_c14n::C14nConfig;
use fiscalsig_core::{ns, Error, HashAlgorithm};
use fiscalsig_keys::TrustAnchor;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

fn default_id_attributes() -> Vec<String> {
    ns::attr::DEFAULT_ID_ATTRS.iter().map(|s| (*s).to_owned()).collect()
}

/// How [`SignatureBuilder`](crate::SignatureBuilder) signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Digest for the Reference; also picks the RSA signature method.
    pub digest_algorithm: HashAlgorithm,
    /// Explicit `SignatureMethod` URI. Must pair RSA with `digest_algorithm`.
    pub signature_algorithm: Option<String>,
    pub canonicalization: C14nConfig,
    /// Explicit canonicalization URI, overriding `canonicalization.method`
    /// and `with_comments`.
    pub canonicalization_uri: Option<String>,
    /// Embed the signer certificate in `KeyInfo/X509Data`.
    pub include_certificate: bool,
    /// Also embed the intermediates the provider knows about.
    pub include_chain: bool,
    /// Attribute names searched for the target id, in priority order.
    pub id_attributes: Vec<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            digest_algorithm: HashAlgorithm::Sha1,
            signature_algorithm: None,
            canonicalization: C14nConfig::inclusive(),
            canonicalization_uri: None,
            include_certificate: true,
            include_chain: false,
            id_attributes: default_id_attributes(),
        }
    }
}

impl SigningConfig {
    pub fn sha256() -> Self {
        Self {
            digest_algorithm: HashAlgorithm::Sha256,
            ..Self::default()
        }
    }

    /// The `SignatureMethod` URI to write.
    pub fn signature_method(&self) -> Result<&str, Error> {
        let Some(uri) = self.signature_algorithm.as_deref() else {
            return Ok(self.digest_algorithm.signature_uri());
        };
        match HashAlgorithm::from_signature_uri(uri) {
            Some(hash) if hash == self.digest_algorithm => Ok(uri),
            Some(hash) => Err(Error::Validation(format!(
                "signature algorithm {uri} hashes with {hash}, but the digest algorithm is {}",
                self.digest_algorithm
            ))),
            None => Err(Error::UnsupportedAlgorithm(format!("signature algorithm: {uri}"))),
        }
    }

    /// The canonicalization actually used, after applying `canonicalization_uri`.
    pub fn c14n(&self) -> Result<C14nConfig, Error> {
        match self.canonicalization_uri.as_deref() {
            None => Ok(self.canonicalization.clone()),
            Some(uri) => C14nConfig::from_uri(uri, self.canonicalization.inclusive_prefixes.clone())
                .ok_or_else(|| Error::UnsupportedAlgorithm(format!("canonicalization: {uri}"))),
        }
    }
}

/// How [`SignatureValidator`](crate::SignatureValidator) judges a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Tolerance applied to both ends of the certificate validity window.
    pub clock_skew_secs: u64,
    pub id_attributes: Vec<String>,
    /// Run the trust validator on the embedded chain.
    pub check_trust: bool,
    /// Turn an untrusted chain from a warning into an error.
    pub require_trusted_chain: bool,
    pub trust_anchor: TrustAnchor,
    /// Evaluate certificate windows at this instant instead of now.
    #[serde(skip)]
    pub verification_time: Option<SystemTime>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: 300,
            id_attributes: default_id_attributes(),
            check_trust: true,
            require_trusted_chain: false,
            trust_anchor: TrustAnchor::icp_brasil(),
            verification_time: None,
        }
    }
}

impl ValidationConfig {
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    pub fn at(mut self, time: SystemTime) -> Self {
        self.verification_time = Some(time);
        self
    }
}
