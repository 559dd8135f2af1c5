//! Pre-launch session registration
//!
//! The platform must register a user's credentials with the token broker
//! before the user's environment starts; the environment only ever sees the
//! session token. A failed registration aborts the launch — spawning an
//! environment whose session token resolves to nothing would strand the
//! user with opaque API failures.

use std::time::Duration;

use common::SecretString;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Client for the broker's `POST /create_user` endpoint.
///
/// Holds the shared manager token that authorizes registration; only the
/// platform and the broker know it.
pub struct SessionRegistrar {
    broker_url: String,
    manager_token: SecretString,
    client: reqwest::Client,
    timeout: Duration,
}

impl SessionRegistrar {
    pub fn new(
        broker_url: impl Into<String>,
        manager_token: SecretString,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            manager_token,
            client,
            timeout,
        }
    }

    /// Register (or overwrite) the credential record for `username`.
    ///
    /// Any non-200 answer fails `Registration` with the broker's status and
    /// body so the launch error shown to the user says what went wrong.
    pub async fn register(
        &self,
        username: &str,
        access_token: &str,
        refresh_token: &str,
        session_token: &str,
    ) -> Result<()> {
        let url = format!("{}/create_user", self.broker_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "api_auth_token": self.manager_token.expose(),
            "access_token": access_token,
            "refresh_token": refresh_token,
            "user_session_token": session_token,
            "username": username,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Http(format!("broker registration request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(username, %status, "broker rejected session registration");
            return Err(Error::Registration(format!(
                "broker returned {status}: {detail}"
            )));
        }

        info!(username, "session registered with token broker");
        Ok(())
    }
}
