#![forbid(unsafe_code)]

//! Signing certificates for fiscal XML signatures.
//!
//! - [`CertificateInfo`]: the parsed public view of an X.509 certificate
//! - [`CertificateProvider`]: the signing capability (in-memory A1 keys
//!   via [`SoftwareCertificate`]; hardware tokens plug in behind the same trait)
//! - [`CertificateCache`]: LRU + TTL cache of providers with close-once eviction
//! - [`TrustValidator`]: national-PKI trust heuristics and chain checks

pub mod cache;
pub mod certificate;
pub mod loader;
pub mod provider;
pub mod taxpayer;
pub mod trust;

pub use cache::{CachedProvider, CertificateCache};
pub use certificate::{CertificateInfo, KeyUsageFlags};
pub use provider::{CertificateProvider, SoftwareCertificate};
pub use taxpayer::{taxpayer_id, TaxpayerId};
pub use trust::{TrustAnchor, TrustValidator};
