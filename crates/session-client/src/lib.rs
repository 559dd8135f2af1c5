//! Origin API access from inside a notebook environment
//!
//! This crate runs in the untrusted half of the system: a user's spawned
//! environment, which holds a session token and nothing else. It talks to
//! the token broker to obtain access tokens and wraps origin API calls in
//! the refresh-once retry policy:
//!
//! 1. Look up the current access token by session token
//! 2. Call the origin endpoint with it
//! 3. On a token-expiry signal, refresh exactly once and retry exactly once
//! 4. Still expired, or refresh denied: a terminal re-authenticate error
//!
//! Non-token origin failures propagate immediately; nothing here loops.

pub mod broker;
pub mod error;
pub mod origin;

pub use broker::{BrokerClient, TokenPair};
pub use error::{Error, Result};
pub use origin::OriginApi;
