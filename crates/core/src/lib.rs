//! Shared building blocks for the fabsync binary: one error type for file and
//! parse failures and helpers that read and write JSON and TOML documents.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod fs;
pub mod result;

pub use error::Error;
pub use result::{Result, ResultExt};
