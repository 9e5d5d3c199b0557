#![forbid(unsafe_code)]

//! Digest (hash) algorithm implementations.

use digest::Digest;
use fiscalsig_core::HashAlgorithm;

/// Incremental hashing.
pub trait DigestAlgorithm: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
    fn algorithm(&self) -> HashAlgorithm;
}

/// Create a hasher for `algorithm`.
pub fn hasher(algorithm: HashAlgorithm) -> Box<dyn DigestAlgorithm> {
    match algorithm {
        HashAlgorithm::Sha1 => Box::new(Sha1Digest::new()),
        HashAlgorithm::Sha256 => Box::new(Sha256Digest::new()),
    }
}

/// Compute a digest in one shot.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut h = hasher(algorithm);
    h.update(data);
    h.finalize()
}

// ── Concrete implementations ─────────────────────────────────────────

macro_rules! impl_digest {
    ($name:ident, $hasher:ty, $alg:expr) => {
        struct $name {
            inner: $hasher,
        }

        impl $name {
            fn new() -> Self {
                Self {
                    inner: <$hasher>::new(),
                }
            }
        }

        impl DigestAlgorithm for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn algorithm(&self) -> HashAlgorithm {
                $alg
            }
        }
    };
}

impl_digest!(Sha1Digest, sha1::Sha1, HashAlgorithm::Sha1);
impl_digest!(Sha256Digest, sha2::Sha256, HashAlgorithm::Sha256);
