//! Error types for credential broker operations

/// Errors from handshake, store, and registration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OAuth callback arrived without an authorization code. The login
    /// attempt is over; the user must start the flow again.
    #[error("authorization callback carried no code")]
    MissingCode,

    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The provider answered, but not with anything usable: non-JSON body,
    /// non-success status, or a token response missing `access_token`.
    #[error("provider response unusable: {0}")]
    Upstream(String),

    /// The userdata response did not contain the configured username key.
    #[error("identity lookup response missing key `{0}`")]
    IdentityResolution(String),

    /// The provider declined a refresh_token grant. Carries the provider's
    /// raw JSON payload so callers can forward it unmodified — the detail
    /// is what tells a human whether to retry or re-login.
    #[error("provider declined token refresh")]
    RefreshDenied(serde_json::Value),

    /// The backing store file has never been initialized.
    #[error("credential store not initialized at {0}")]
    StoreUnavailable(String),

    #[error("credential store parse error: {0}")]
    StoreParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("no credential record for username {0}")]
    UnknownUser(String),

    /// The broker rejected the pre-launch registration call. Spawning the
    /// user's environment must abort when this surfaces.
    #[error("session registration rejected: {0}")]
    Registration(String),

    #[error("user provisioning failed: {0}")]
    Provision(String),
}

/// Result alias for broker operations.
pub type Result<T> = std::result::Result<T, Error>;
