//! Error types for environment-side API access

/// Errors from broker lookups and retry-wrapped origin calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The broker answered with something other than a usable token:
    /// unexpected status or malformed body.
    #[error("token broker error: {0}")]
    Broker(String),

    /// The broker has no record for this session token.
    #[error("session token not recognized by the broker")]
    UnknownSession,

    /// The origin API failed for a reason unrelated to token freshness.
    /// Never triggers a refresh.
    #[error("origin API error: {0}")]
    Origin(String),

    /// Terminal: the credential pair is beyond refresh. The only fix is
    /// logging out of the platform and back in. Carries the detail from
    /// the provider or origin so a human can see why.
    #[error("re-authentication required: {0}")]
    Reauthenticate(String),
}

/// Result alias for session-client operations.
pub type Result<T> = std::result::Result<T, Error>;
