//! # ltt-core
//!
//! Core types and error handling for the legacy top-tagging scale-factor fits.
//!
//! This crate provides:
//! - The workflow error type
//! - Data-taking periods, fit regions and detection channels

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DetectionChannel, Period, Region};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
