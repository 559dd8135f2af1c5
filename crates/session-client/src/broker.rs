//! Token broker client
//!
//! Thin wrapper over the broker's two environment-facing endpoints. The
//! broker lives on the platform host; the session token in the URL is the
//! only authentication these calls carry.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A fresh access/refresh pair returned by a broker-mediated refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Client for the token broker's lookup and refresh endpoints.
#[derive(Clone)]
pub struct BrokerClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
            timeout,
        }
    }

    /// Fetch the current access token for a session.
    pub async fn get_access_token(&self, session_token: &str) -> Result<String> {
        let body = self.get("get_access_token", session_token).await?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::Broker("lookup response missing access_token".into()))
    }

    /// Ask the broker to refresh the session's credential pair.
    ///
    /// A payload without `access_token` is the provider's refusal, passed
    /// through the broker verbatim. That refresh token is spent; the caller
    /// gets a terminal `Reauthenticate` carrying the provider's detail.
    pub async fn get_new_access_token(&self, session_token: &str) -> Result<TokenPair> {
        let body = self.get("get_new_access_token", session_token).await?;

        let access_token = match body.get("access_token").and_then(Value::as_str) {
            Some(t) => t.to_owned(),
            None => {
                warn!("broker refresh passed through a provider refusal");
                return Err(Error::Reauthenticate(body.to_string()));
            }
        };
        let refresh_token = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::Broker("refresh response missing refresh_token".into()))?;

        debug!("broker refresh returned a new pair");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    async fn get(&self, endpoint: &str, session_token: &str) -> Result<Value> {
        let url = format!("{}/{endpoint}/{session_token}", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Http(format!("broker request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::UnknownSession);
        }
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Broker(format!("broker returned {status}: {detail}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Broker(format!("broker returned non-JSON: {e}")))
    }
}
