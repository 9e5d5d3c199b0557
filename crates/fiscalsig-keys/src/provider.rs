#![forbid(unsafe_code)]

//! The signing capability and its in-memory implementation.

use crate::certificate::CertificateInfo;
use fiscalsig_core::{Error, HashAlgorithm};
use std::fmt;
use std::sync::{Arc, RwLock};

/// A certificate that can sign.
///
/// Implementations cover in-memory (A1) keys and hardware tokens (A3); the
/// signing engine only sees this trait. Implementations must be safe to share
/// across threads. After [`close`](Self::close) every call fails with
/// [`Error::Closed`]. A provider timeout is reported as [`Error::Signing`].
pub trait CertificateProvider: Send + Sync {
    /// RSA PKCS#1 v1.5 signature over `data`, hashed with `hash`.
    fn sign(&self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, Error>;

    fn public_certificate(&self) -> Result<Arc<CertificateInfo>, Error>;

    /// Leaf first, followed by any intermediates the provider knows about.
    fn certificate_chain(&self) -> Result<Vec<Arc<CertificateInfo>>, Error> {
        Ok(vec![self.public_certificate()?])
    }

    /// Release the underlying key. Idempotent.
    fn close(&self) -> Result<(), Error>;

    fn is_closed(&self) -> bool;
}

struct Loaded {
    key: rsa::RsaPrivateKey,
    certificate: Arc<CertificateInfo>,
    chain: Vec<Arc<CertificateInfo>>,
}

/// In-memory RSA key and certificate (A1).
///
/// Reads share the lock; `close` takes it exclusively and drops the key.
pub struct SoftwareCertificate {
    state: RwLock<Option<Loaded>>,
}

impl SoftwareCertificate {
    /// Pair a private key with its certificate. Fails if they do not match.
    pub fn new(key: rsa::RsaPrivateKey, certificate: CertificateInfo) -> Result<Self, Error> {
        if key.to_public_key() != certificate.public_key {
            return Err(Error::Certificate(
                "private key does not match the certificate public key".into(),
            ));
        }
        Ok(Self {
            state: RwLock::new(Some(Loaded {
                key,
                certificate: Arc::new(certificate),
                chain: Vec::new(),
            })),
        })
    }

    /// Load from PEM private key and PEM certificate bytes.
    pub fn from_pem(key_pem: &[u8], cert_pem: &[u8]) -> Result<Self, Error> {
        let key = crate::loader::load_rsa_private_pem(key_pem)?;
        let certificate = crate::loader::load_certificate_pem(cert_pem)?;
        Self::new(key, certificate)
    }

    /// Attach intermediate certificates (nearest issuer first).
    pub fn with_chain(self, chain: Vec<CertificateInfo>) -> Self {
        if let Ok(mut guard) = self.state.write() {
            if let Some(loaded) = guard.as_mut() {
                loaded.chain = chain.into_iter().map(Arc::new).collect();
            }
        }
        self
    }

    fn read<T>(&self, f: impl FnOnce(&Loaded) -> Result<T, Error>) -> Result<T, Error> {
        let guard = self
            .state
            .read()
            .map_err(|_| Error::Signing("certificate lock poisoned".into()))?;
        match guard.as_ref() {
            Some(loaded) => f(loaded),
            None => Err(Error::Closed),
        }
    }
}

impl CertificateProvider for SoftwareCertificate {
    fn sign(&self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, Error> {
        self.read(|loaded| fiscalsig_crypto::sign_pkcs1v15(&loaded.key, hash, data))
    }

    fn public_certificate(&self) -> Result<Arc<CertificateInfo>, Error> {
        self.read(|loaded| Ok(Arc::clone(&loaded.certificate)))
    }

    fn certificate_chain(&self) -> Result<Vec<Arc<CertificateInfo>>, Error> {
        self.read(|loaded| {
            let mut chain = vec![Arc::clone(&loaded.certificate)];
            chain.extend(loaded.chain.iter().cloned());
            Ok(chain)
        })
    }

    fn close(&self) -> Result<(), Error> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| Error::Signing("certificate lock poisoned".into()))?;
        if guard.take().is_some() {
            log::debug!("signing certificate closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.read().map(|g| g.is_none()).unwrap_or(true)
    }
}

impl fmt::Debug for SoftwareCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = self
            .public_certificate()
            .map(|c| c.subject.clone())
            .unwrap_or_default();
        f.debug_struct("SoftwareCertificate")
            .field("subject", &subject)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
