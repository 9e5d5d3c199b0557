#![forbid(unsafe_code)]

//! Core types for the fiscalsig workspace: the error taxonomy, algorithm
//! identifiers and XMLDSig element names shared by every other crate.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use algorithm::HashAlgorithm;
pub use error::{Error, ErrorKind, Result};
