#![forbid(unsafe_code)]

//! The `fiscalsig.toml` configuration file.
//!
//! ```toml
//! trust_roots = ["/etc/fiscalsig/icp-brasil-v10.pem"]
//!
//! [signing]
//! digest_algorithm = "sha1"
//! include_certificate = true
//!
//! [signing.canonicalization]
//! method = "inclusive"
//!
//! [validation]
//! clock_skew_secs = 300
//! require_trusted_chain = false
//!
//! [validation.trust_anchor]
//! name_patterns = ["ICP-Brasil", "AC Raiz"]
//! policy_oid_prefixes = ["2.16.76.1"]
//!
//! [cache]
//! capacity = 8
//! ttl_secs = 3600
//! ```

use fiscalsig_core::Error;
use fiscalsig_dsig::{SigningConfig, ValidationConfig};
use fiscalsig_keys::loader::load_certificate_bundle_pem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Certificate cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FiscalSigConfig {
    pub signing: SigningConfig,
    pub validation: ValidationConfig,
    pub cache: CacheConfig,
    /// PEM files with root certificates to pin the trust anchor to.
    pub trust_roots: Vec<PathBuf>,
}

impl FiscalSigConfig {
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        log::info!("loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml(&text)?;
        config.signing.signature_method()?;
        config.signing.c14n()?;
        Ok(config)
    }

    /// Validation settings with the pinned roots loaded into the trust anchor.
    pub fn validation_config(&self) -> Result<ValidationConfig, Error> {
        let mut validation = self.validation.clone();
        for path in &self.trust_roots {
            let pem = std::fs::read(path)
                .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
            let roots = load_certificate_bundle_pem(&pem)?;
            log::debug!("pinned {} root(s) from {}", roots.len(), path.display());
            validation
                .trust_anchor
                .roots
                .extend(roots.into_iter().map(Arc::new));
        }
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscalsig_c14n::C14nMethod;
    use fiscalsig_core::HashAlgorithm;

    #[test]
    fn empty_file_gives_defaults() {
        let config = FiscalSigConfig::from_toml("").unwrap();
        assert_eq!(config.signing.digest_algorithm, HashAlgorithm::Sha1);
        assert!(config.validation.check_trust);
        assert_eq!(config.cache, CacheConfig::default());
        assert!(config.trust_roots.is_empty());
    }

    #[test]
    fn full_file() {
        let config = FiscalSigConfig::from_toml(
            r##"
            [signing]
            digest_algorithm = "sha256"
            include_certificate = false
            id_attributes = ["Id"]

            [signing.canonicalization]
            method = "exclusive"
            inclusive_prefixes = ["#default"]

            [validation]
            clock_skew_secs = 60
            require_trusted_chain = true

            [validation.trust_anchor]
            name_patterns = ["AC Teste"]

            [cache]
            capacity = 2
            "##,
        )
        .unwrap();
        assert_eq!(config.signing.digest_algorithm, HashAlgorithm::Sha256);
        assert!(!config.signing.include_certificate);
        assert_eq!(config.signing.canonicalization.method, C14nMethod::Exclusive);
        assert_eq!(config.signing.id_attributes, vec!["Id"]);
        assert_eq!(config.validation.clock_skew(), Duration::from_secs(60));
        assert!(config.validation.require_trusted_chain);
        assert_eq!(config.validation.trust_anchor.name_patterns, vec!["AC Teste"]);
        assert_eq!(config.validation.trust_anchor.policy_oid_prefixes, vec!["2.16.76.1"]);
        assert_eq!(config.cache.capacity, 2);
        assert_eq!(config.cache.ttl_secs, 3600);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let err = FiscalSigConfig::from_toml("[signing]\ndigest_algorithm = \"md5\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn trust_roots_are_pinned() {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../test-data/pki/root.cert.pem");
        let config = FiscalSigConfig {
            trust_roots: vec![root],
            ..FiscalSigConfig::default()
        };
        let validation = config.validation_config().unwrap();
        assert_eq!(validation.trust_anchor.roots.len(), 1);

        let missing = FiscalSigConfig {
            trust_roots: vec![PathBuf::from("/nonexistent/root.pem")],
            ..FiscalSigConfig::default()
        };
        assert!(matches!(missing.validation_config(), Err(Error::Config(_))));
    }
}
