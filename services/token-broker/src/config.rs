//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The two secrets — the manager token that authorizes registrations and
//! the OAuth client secret — are loaded from env vars or `*_file` paths,
//! never stored in the TOML directly to avoid leaking them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::SecretString;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub provider: ProviderSection,
}

/// Broker listener and store settings
#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    pub listen_addr: SocketAddr,
    /// Path of the persisted credential store (one JSON object).
    pub store_path: PathBuf,
    #[serde(skip)]
    pub manager_token: Option<SecretString>,
    /// Path to a file containing the manager token (alternative to the
    /// BROKER_MANAGER_TOKEN env var)
    #[serde(default)]
    pub manager_token_file: Option<PathBuf>,
    /// Upper bound on provider round trips, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Identity provider endpoints and client identity
#[derive(Debug, Deserialize)]
pub struct ProviderSection {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<SecretString>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub token_url: String,
    pub userdata_url: String,
    pub username_key: String,
    pub callback_url: String,
    /// POST the token endpoint instead of the provider's GET dialect
    #[serde(default)]
    pub use_post: bool,
}

fn default_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order, for each secret:
    /// 1. env var (BROKER_MANAGER_TOKEN / OAUTH_CLIENT_SECRET)
    /// 2. `*_file` path from the config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (name, url) in [
            ("token_url", &config.provider.token_url),
            ("userdata_url", &config.provider.userdata_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.broker.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.broker.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config.broker.manager_token = resolve_secret(
            "BROKER_MANAGER_TOKEN",
            config.broker.manager_token_file.as_deref(),
        )?;
        if config.broker.manager_token.is_none() {
            return Err(common::Error::Config(
                "manager token missing: set BROKER_MANAGER_TOKEN or manager_token_file".into(),
            ));
        }

        config.provider.client_secret = resolve_secret(
            "OAUTH_CLIENT_SECRET",
            config.provider.client_secret_file.as_deref(),
        )?;
        if config.provider.client_secret.is_none() {
            return Err(common::Error::Config(
                "client secret missing: set OAUTH_CLIENT_SECRET or client_secret_file".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("notebook-token-broker.toml")
    }

    /// Provider config for the handshake crate, with the broker's timeout
    /// applied to every provider round trip.
    pub fn provider_config(&self) -> notebook_auth::ProviderConfig {
        notebook_auth::ProviderConfig {
            client_id: self.provider.client_id.clone(),
            // load() guarantees presence
            client_secret: self
                .provider
                .client_secret
                .clone()
                .unwrap_or_else(|| SecretString::new("")),
            token_url: self.provider.token_url.clone(),
            userdata_url: self.provider.userdata_url.clone(),
            username_key: self.provider.username_key.clone(),
            callback_url: self.provider.callback_url.clone(),
            use_post: self.provider.use_post,
            timeout: Duration::from_secs(self.broker.timeout_secs),
        }
    }
}

/// Env var first, then key file. A blank file counts as absent.
fn resolve_secret(
    env_var: &str,
    key_file: Option<&Path>,
) -> common::Result<Option<SecretString>> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(Some(SecretString::new(value)));
    }
    if let Some(path) = key_file {
        let value = std::fs::read_to_string(path).map_err(|e| {
            common::Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let value = value.trim();
        if !value.is_empty() {
            return Ok(Some(SecretString::new(value)));
        }
    }
    Ok(None)
}
