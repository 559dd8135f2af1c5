//! Provider handshake: code exchange, identity lookup, token refresh
//!
//! Three interactions with the external identity provider:
//! 1. Authorization code exchange (once per login)
//! 2. Identity resolution (once per login, tells us which user it was)
//! 3. Refresh grant (whenever an access token expires)
//!
//! The provider speaks query-string GETs by default; `use_post` switches
//! the token endpoint calls to form-encoded POST for providers that follow
//! the RFC more closely. No retries live here — a failed handshake aborts
//! the login attempt and the user is told to log in again.

use std::time::Duration;

use common::SecretString;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Sent on every provider request; some providers key rate limits off it.
const USER_AGENT: &str = "notebook-hub";

/// Identity provider endpoints and client credentials.
///
/// `client_secret` never leaves this process — the whole point of the
/// broker is that notebook environments ask us instead of holding it.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub token_url: String,
    pub userdata_url: String,
    /// JSON key in the userdata response that carries the username.
    pub username_key: String,
    /// Redirect URI registered with the provider, echoed during exchange.
    pub callback_url: String,
    /// POST the token endpoint instead of GET.
    pub use_post: bool,
    /// Upper bound on every provider round trip.
    pub timeout: Duration,
}

/// Access/refresh pair returned by the token endpoint.
///
/// Both tokens are opaque bearer strings; nothing here inspects them.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: Option<String>,
}

/// Who the provider says just logged in.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    /// Origin API base URL for this user, as reported by the provider.
    pub baseurl: String,
}

/// Exchange an authorization code for an access/refresh pair.
///
/// Fails `MissingCode` when the callback delivered no code, `Upstream`
/// when the provider's answer is not JSON or lacks `access_token`.
pub async fn exchange_code(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
) -> Result<TokenGrant> {
    if code.is_empty() {
        return Err(Error::MissingCode);
    }

    let params = [
        ("redirect_uri", provider.callback_url.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.expose()),
    ];

    let body = token_endpoint_call(client, provider, &params, "code exchange").await?;
    grant_from_response(body).map_err(|payload| {
        warn!("code exchange response lacked a usable token pair");
        Error::Upstream(format!("token response missing access_token: {payload}"))
    })
}

/// Ask the provider which user the access token belongs to.
///
/// Fails `IdentityResolution` when the configured `username_key` is absent
/// from the response. `baseurl` is optional in practice and defaults to
/// empty when the provider omits it.
pub async fn resolve_identity(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    access_token: &str,
) -> Result<Identity> {
    let response = client
        .get(&provider.userdata_url)
        .query(&[("access_token", access_token)])
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(provider.timeout)
        .send()
        .await
        .map_err(|e| transport_error("identity lookup", e))?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("identity lookup returned non-JSON: {e}")))?;

    let username = body
        .get(&provider.username_key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::IdentityResolution(provider.username_key.clone()))?
        .to_owned();

    let baseurl = body
        .get("baseurl")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    debug!(username, "resolved identity");
    Ok(Identity { username, baseurl })
}

/// Trade a refresh token for a new access/refresh pair.
///
/// When the provider's answer lacks `access_token` — the refresh token has
/// almost certainly expired or been revoked — this fails `RefreshDenied`
/// carrying the provider's raw payload. Callers forward it unmodified; the
/// detail is what distinguishes "try again" from "must re-authenticate".
pub async fn refresh_grant(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    refresh_token: &str,
) -> Result<TokenGrant> {
    let params = [
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.expose()),
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];

    let body = token_endpoint_call(client, provider, &params, "token refresh").await?;
    grant_from_response(body).map_err(|payload| {
        warn!("provider declined refresh grant");
        Error::RefreshDenied(payload)
    })
}

/// Hit the token endpoint with the configured method and parse the body as
/// JSON. Error statuses are not treated as transport failures: OAuth
/// providers put the interesting detail in the error body.
async fn token_endpoint_call(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    params: &[(&str, &str)],
    op: &str,
) -> Result<Value> {
    let request = if provider.use_post {
        client.post(&provider.token_url).form(params)
    } else {
        client.get(&provider.token_url).query(params)
    };

    let response = request
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(provider.timeout)
        .send()
        .await
        .map_err(|e| transport_error(op, e))?;

    let status = response.status();
    response
        .json::<Value>()
        .await
        .map_err(|e| Error::Upstream(format!("{op} returned non-JSON ({status}): {e}")))
}

/// Extract a grant from a token endpoint response, or hand back the raw
/// payload when `access_token` is absent.
fn grant_from_response(body: Value) -> std::result::Result<TokenGrant, Value> {
    let access_token = match body.get("access_token").and_then(Value::as_str) {
        Some(t) => t.to_owned(),
        None => return Err(body),
    };
    let refresh_token = match body.get("refresh_token").and_then(Value::as_str) {
        Some(t) => t.to_owned(),
        None => return Err(body),
    };
    let token_type = body
        .get("token_type")
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(TokenGrant {
        access_token,
        refresh_token,
        token_type,
    })
}

/// Timeouts get their own message; everything else is a plain transport error.
fn transport_error(op: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Upstream(format!("{op} timed out"))
    } else {
        Error::Http(format!("{op} request failed: {e}"))
    }
}
