//! Login flow composition
//!
//! Ties the handshake pieces together for one login: exchange the callback
//! code, resolve the identity, provision the user if the deployment needs
//! that, mint a session token, and register everything with the broker.
//! Only after all five steps succeed may the platform spawn the user's
//! environment, injecting `session_token` (and nothing more) into it.
//!
//! Provisioning and authentication are independent capabilities composed
//! here rather than fused into one type: a deployment that manages users
//! elsewhere plugs in `NoProvisioner`, one that creates OS accounts plugs
//! in its own `UserProvisioner`.

use tracing::{info, instrument};

use crate::error::Result;
use crate::handshake::{self, ProviderConfig};
use crate::registrar::SessionRegistrar;
use crate::session;

/// Deployment-selected hook that materializes a user account (OS-level or
/// otherwise) before the environment starts. Implementations must be
/// idempotent: the same user logs in many times.
pub trait UserProvisioner: Send + Sync {
    fn ensure_user(&self, username: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Provisioner for deployments where user accounts already exist.
pub struct NoProvisioner;

impl UserProvisioner for NoProvisioner {
    async fn ensure_user(&self, _username: &str) -> Result<()> {
        Ok(())
    }
}

/// What a successful login produces. `session_token` is the only value
/// that may be handed to the spawned environment.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub username: String,
    /// Origin API base URL for this user, injected alongside the token.
    pub baseurl: String,
    pub session_token: String,
}

/// One login, end to end. Any failure aborts the attempt; the caller
/// surfaces it as an authentication failure telling the user to log out
/// and back in.
pub struct LoginFlow<P> {
    provider: ProviderConfig,
    registrar: SessionRegistrar,
    provisioner: P,
    client: reqwest::Client,
}

impl<P: UserProvisioner> LoginFlow<P> {
    pub fn new(
        provider: ProviderConfig,
        registrar: SessionRegistrar,
        provisioner: P,
        client: reqwest::Client,
    ) -> Self {
        Self {
            provider,
            registrar,
            provisioner,
            client,
        }
    }

    /// Run the full handshake for an authorization code.
    ///
    /// The registration step runs last: once it returns Ok, the broker
    /// resolves the session token and the environment is safe to spawn.
    #[instrument(skip_all)]
    pub async fn login(&self, code: &str) -> Result<LoginOutcome> {
        let grant = handshake::exchange_code(&self.client, &self.provider, code).await?;
        let identity =
            handshake::resolve_identity(&self.client, &self.provider, &grant.access_token).await?;

        self.provisioner.ensure_user(&identity.username).await?;

        let session_token = session::mint();
        self.registrar
            .register(
                &identity.username,
                &grant.access_token,
                &grant.refresh_token,
                &session_token,
            )
            .await?;

        info!(username = identity.username, "login completed");
        Ok(LoginOutcome {
            username: identity.username,
            baseurl: identity.baseurl,
            session_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use common::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Counts provisioning calls so tests can assert ordering semantics.
    struct CountingProvisioner {
        calls: AtomicUsize,
        fail: bool,
    }

    impl UserProvisioner for &CountingProvisioner {
        async fn ensure_user(&self, username: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Provision(format!("no home for {username}")))
            } else {
                Ok(())
            }
        }
    }

    fn provider_for(server: &MockServer) -> ProviderConfig {
        ProviderConfig {
            client_id: "nb-client".into(),
            client_secret: SecretString::new("nb-secret"),
            token_url: format!("{}/oauth/v2/token", server.uri()),
            userdata_url: format!("{}/api/userdata", server.uri()),
            username_key: "username".into(),
            callback_url: "https://hub.example.org/oauth_callback".into(),
            use_post: false,
            timeout: Duration::from_secs(5),
        }
    }

    fn registrar_for(server: &MockServer) -> SessionRegistrar {
        SessionRegistrar::new(
            server.uri(),
            SecretString::new("manager-secret"),
            reqwest::Client::new(),
            Duration::from_secs(5),
        )
    }

    async fn mount_happy_provider(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/oauth/v2/token"))
            .and(query_param("grant_type", "authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at_login",
                "refresh_token": "rt_login",
                "token_type": "bearer",
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/userdata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "username": "alice",
                "baseurl": "https://data.example.org",
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn login_produces_registered_session() {
        let server = MockServer::start().await;
        mount_happy_provider(&server).await;
        Mock::given(method("POST"))
            .and(path("/create_user"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provisioner = CountingProvisioner {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let flow = LoginFlow::new(
            provider_for(&server),
            registrar_for(&server),
            &provisioner,
            reqwest::Client::new(),
        );

        let outcome = flow.login("auth-code").await.unwrap();
        assert_eq!(outcome.username, "alice");
        assert_eq!(outcome.baseurl, "https://data.example.org");
        assert!(session::is_valid_token(&outcome.session_token));
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_aborts_when_registration_is_rejected() {
        let server = MockServer::start().await;
        mount_happy_provider(&server).await;
        Mock::given(method("POST"))
            .and(path("/create_user"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let flow = LoginFlow::new(
            provider_for(&server),
            registrar_for(&server),
            NoProvisioner,
            reqwest::Client::new(),
        );

        let err = flow.login("auth-code").await.unwrap_err();
        assert!(matches!(err, Error::Registration(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn login_aborts_before_registration_when_provisioning_fails() {
        let server = MockServer::start().await;
        mount_happy_provider(&server).await;
        // No /create_user mock mounted: a registration attempt would 404
        // and the test would still pass, so assert on received requests.

        let provisioner = CountingProvisioner {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let flow = LoginFlow::new(
            provider_for(&server),
            registrar_for(&server),
            &provisioner,
            reqwest::Client::new(),
        );

        let err = flow.login("auth-code").await.unwrap_err();
        assert!(matches!(err, Error::Provision(_)), "got {err:?}");

        let hit_create_user = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .any(|r| r.url.path() == "/create_user");
        assert!(!hit_create_user, "registration must not run after a provisioning failure");
    }

    #[tokio::test]
    async fn login_without_code_never_contacts_provider() {
        let server = MockServer::start().await;
        let flow = LoginFlow::new(
            provider_for(&server),
            registrar_for(&server),
            NoProvisioner,
            reqwest::Client::new(),
        );

        let err = flow.login("").await.unwrap_err();
        assert!(matches!(err, Error::MissingCode));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
