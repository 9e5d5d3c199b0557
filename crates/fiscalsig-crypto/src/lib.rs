#![forbid(unsafe_code)]

//! Cryptographic primitives for fiscal XML signatures: SHA-1/SHA-256 digests
//! and RSA PKCS#1 v1.5 signing and verification.

pub mod digest;
pub mod sign;

pub use digest::{digest, DigestAlgorithm};
pub use sign::{sign_pkcs1v15, signature_hash, verify_pkcs1v15};
