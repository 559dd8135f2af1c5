//! Retry-wrapped origin API access
//!
//! The origin API authenticates with `?access_token=…` and reports OAuth
//! failures as a JSON body carrying `error_description`. An expired access
//! token is the one failure this module handles itself: refresh through
//! the broker exactly once, retry the call exactly once. Everything else
//! propagates to the caller untouched.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::broker::BrokerClient;
use crate::error::{Error, Result};

/// Origin API handle bound to one session.
///
/// Built from the two values the platform injects into the environment:
/// the origin base URL and the session token.
pub struct OriginApi {
    base_url: String,
    session_token: String,
    broker: BrokerClient,
    client: reqwest::Client,
    timeout: Duration,
}

impl OriginApi {
    pub fn new(
        base_url: impl Into<String>,
        session_token: impl Into<String>,
        broker: BrokerClient,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            session_token: session_token.into(),
            broker,
            client,
            timeout,
        }
    }

    /// GET an origin endpoint as JSON under the refresh-once policy.
    ///
    /// `path` is appended to the configured base URL. The access token is
    /// fetched from the broker per call; tokens are never cached here, so
    /// a record refreshed elsewhere is picked up immediately.
    #[instrument(skip(self))]
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let access_token = self.broker.get_access_token(&self.session_token).await?;
        let first = self.fetch(path, &access_token).await?;

        let Some(detail) = expiry_signal(&first) else {
            return settle(first);
        };
        debug!(detail, "origin signaled an expired access token, refreshing once");

        // One refresh, one retry. get_new_access_token already turns a
        // provider refusal into a terminal Reauthenticate.
        let pair = self.broker.get_new_access_token(&self.session_token).await?;
        let second = self.fetch(path, &pair.access_token).await?;

        if let Some(detail) = expiry_signal(&second) {
            warn!(detail, "origin still rejects the refreshed token");
            return Err(Error::Reauthenticate(format!(
                "{detail}\nTry logging out of the platform and back in to fix this."
            )));
        }
        settle(second)
    }

    async fn fetch(&self, path: &str, access_token: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("access_token", access_token)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Http(format!("origin request failed: {e}")))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Origin(format!("origin returned non-JSON: {e}")))
    }
}

/// The origin's expired-token signal: an `error_description` mentioning an
/// expired token. Other OAuth errors are not retryable here.
fn expiry_signal(body: &Value) -> Option<&str> {
    let desc = body.get("error_description")?.as_str()?;
    if desc.to_ascii_lowercase().contains("expired") {
        Some(desc)
    } else {
        None
    }
}

/// Final classification of a non-expired origin response: OAuth errors
/// other than expiry propagate as `Origin`, everything else is the payload.
fn settle(body: Value) -> Result<Value> {
    if let Some(desc) = body.get("error_description").and_then(Value::as_str) {
        return Err(Error::Origin(desc.to_owned()));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EXPIRED: &str = "The access token provided has expired.";

    fn api_for(origin: &MockServer, broker: &MockServer, session: &str) -> OriginApi {
        OriginApi::new(
            origin.uri(),
            session,
            BrokerClient::new(broker.uri(), reqwest::Client::new(), Duration::from_secs(5)),
            reqwest::Client::new(),
            Duration::from_secs(5),
        )
    }

    async fn mount_lookup(broker: &MockServer, session: &str, token: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/get_access_token/{session}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": token})),
            )
            .mount(broker)
            .await;
    }

    #[tokio::test]
    async fn fresh_token_returns_payload_without_refresh() {
        let origin = MockServer::start().await;
        let broker = MockServer::start().await;
        let session = "8".repeat(64);
        mount_lookup(&broker, &session, "at_ok").await;

        Mock::given(method("GET"))
            .and(path("/api/datarecord/v1/310"))
            .and(query_param("access_token", "at_ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "datarecords": [{"id": 310}],
            })))
            .mount(&origin)
            .await;

        let api = api_for(&origin, &broker, &session);
        let body = api.get_json("/api/datarecord/v1/310").await.unwrap();
        assert_eq!(body["datarecords"][0]["id"], 310);

        // No refresh call was ever made
        let refreshed = broker
            .received_requests()
            .await
            .unwrap()
            .iter()
            .any(|r| r.url.path().contains("get_new_access_token"));
        assert!(!refreshed);
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_and_retries_once() {
        let origin = MockServer::start().await;
        let broker = MockServer::start().await;
        let session = "9".repeat(64);
        mount_lookup(&broker, &session, "at_stale").await;

        Mock::given(method("GET"))
            .and(path(format!("/get_new_access_token/{session}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at_fresh",
                "refresh_token": "rt_fresh",
            })))
            .expect(1)
            .mount(&broker)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/datarecord/v1/42"))
            .and(query_param("access_token", "at_stale"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": EXPIRED,
            })))
            .mount(&origin)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/datarecord/v1/42"))
            .and(query_param("access_token", "at_fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "datarecords": [{"id": 42}],
            })))
            .expect(1)
            .mount(&origin)
            .await;

        let api = api_for(&origin, &broker, &session);
        let body = api.get_json("/api/datarecord/v1/42").await.unwrap();
        assert_eq!(body["datarecords"][0]["id"], 42);
    }

    #[tokio::test]
    async fn expiry_after_retry_is_terminal() {
        let origin = MockServer::start().await;
        let broker = MockServer::start().await;
        let session = "a".repeat(64);
        mount_lookup(&broker, &session, "at_stale").await;

        // Refresh succeeds but the origin keeps rejecting: exactly one
        // refresh, exactly one retry, then a terminal failure.
        Mock::given(method("GET"))
            .and(path(format!("/get_new_access_token/{session}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at_fresh",
                "refresh_token": "rt_fresh",
            })))
            .expect(1)
            .mount(&broker)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/datarecord/v1/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error_description": EXPIRED,
            })))
            .expect(2)
            .mount(&origin)
            .await;

        let api = api_for(&origin, &broker, &session);
        let err = api.get_json("/api/datarecord/v1/7").await.unwrap_err();
        assert!(matches!(err, Error::Reauthenticate(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn refresh_refusal_propagates_as_reauthenticate() {
        let origin = MockServer::start().await;
        let broker = MockServer::start().await;
        let session = "b".repeat(64);
        mount_lookup(&broker, &session, "at_stale").await;

        Mock::given(method("GET"))
            .and(path(format!("/get_new_access_token/{session}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "The refresh token provided has expired.",
            })))
            .mount(&broker)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/datarecord/v1/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error_description": EXPIRED,
            })))
            .expect(1)
            .mount(&origin)
            .await;

        let api = api_for(&origin, &broker, &session);
        let err = api.get_json("/api/datarecord/v1/7").await.unwrap_err();
        match err {
            Error::Reauthenticate(detail) => {
                assert!(detail.contains("refresh token provided has expired"))
            }
            other => panic!("expected Reauthenticate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_token_origin_error_propagates_without_refresh() {
        let origin = MockServer::start().await;
        let broker = MockServer::start().await;
        let session = "c".repeat(64);
        mount_lookup(&broker, &session, "at_ok").await;

        Mock::given(method("GET"))
            .and(path("/api/datarecord/v1/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error_description": "The requested record is not public.",
            })))
            .expect(1)
            .mount(&origin)
            .await;

        let api = api_for(&origin, &broker, &session);
        let err = api.get_json("/api/datarecord/v1/9").await.unwrap_err();
        match err {
            Error::Origin(desc) => assert!(desc.contains("not public")),
            other => panic!("expected Origin, got {other:?}"),
        }

        let refreshed = broker
            .received_requests()
            .await
            .unwrap()
            .iter()
            .any(|r| r.url.path().contains("get_new_access_token"));
        assert!(!refreshed, "non-token errors must not trigger a refresh");
    }
}
