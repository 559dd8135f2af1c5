//! OAuth credential brokering for the notebook platform
//!
//! Implements the trusted half of the credential broker: the authorization
//! code handshake against the identity provider, session token minting,
//! the on-disk credential store, and the login flow that ties them together
//! before a user's notebook environment is spawned.
//!
//! Login flow:
//! 1. The platform receives an authorization `code` on its OAuth callback
//! 2. `handshake::exchange_code()` trades it for an access/refresh pair
//! 3. `handshake::resolve_identity()` asks the provider who logged in
//! 4. `session::mint()` draws an opaque 256-bit session token
//! 5. `SessionRegistrar::register()` hands everything to the token broker
//! 6. The spawned environment receives only the session token
//!
//! The environment-side consumer lives in the `session-client` crate.

pub mod error;
pub mod flow;
pub mod handshake;
pub mod registrar;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use flow::{LoginFlow, LoginOutcome, NoProvisioner, UserProvisioner};
pub use handshake::{
    Identity, ProviderConfig, TokenGrant, exchange_code, refresh_grant, resolve_identity,
};
pub use registrar::SessionRegistrar;
pub use session::{is_valid_token, mint};
pub use store::{CredentialRecord, CredentialStore};
