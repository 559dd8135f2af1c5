//! Shared types for the notebook credential broker workspace

pub mod error;
pub mod secret;

pub use error::{Error, Result};
pub use secret::SecretString;
