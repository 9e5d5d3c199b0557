#![forbid(unsafe_code)]

//! XML signatures for Brazilian fiscal documents.
//!
//! This crate re-exports the workspace crates and adds the configuration
//! file the `fiscalsig` binary reads.

pub mod config;

pub use fiscalsig_c14n as c14n;
pub use fiscalsig_core as core;
pub use fiscalsig_crypto as crypto;
pub use fiscalsig_dsig as dsig;
pub use fiscalsig_keys as keys;
pub use fiscalsig_xml as xml;

pub use config::FiscalSigConfig;
pub use fiscalsig_core::{Error, ErrorKind};
pub use fiscalsig_dsig::{
    SignatureBuilder, SignatureValidator, SigningConfig, ValidationConfig, ValidationResult,
};
