//! Durable credential store
//!
//! One JSON object on disk, keyed by username, holding each user's current
//! access/refresh pair and session token. The broker is the only writer.
//! All mutations run under an async mutex held across load+mutate+save, and
//! every save is a whole-file atomic replace (temp file + rename), so
//! readers never observe a partially written store.
//!
//! A `BTreeMap` keeps the serialized form stable: saving a freshly loaded
//! store reproduces the file byte for byte.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One user's active credentials.
///
/// Exactly one record exists per username; a new login overwrites the old
/// record with no history kept. Token fields are opaque bearer strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// 64 lowercase hex chars; the environment-facing handle for this record.
    pub user_session_token: String,
}

/// Thread-safe credential file manager. Single source of truth for the
/// session-token-to-credential mapping.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, CredentialRecord>>,
}

impl CredentialStore {
    /// Open an existing store. Fails `StoreUnavailable` if the backing file
    /// was never initialized — deployment is expected to run `init` once.
    pub async fn open(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(Error::StoreUnavailable(path.display().to_string()));
        }

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Io(format!("reading credential store: {e}")))?;
        let state: BTreeMap<String, CredentialRecord> = serde_json::from_str(&contents)
            .map_err(|e| Error::StoreParse(format!("parsing credential store: {e}")))?;

        info!(path = %path.display(), records = state.len(), "opened credential store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Initialize the store at deployment: create an empty file if none
    /// exists, then open it.
    pub async fn init(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "initializing empty credential store");
            write_atomic(&path, &BTreeMap::new()).await?;
        }
        Self::open(path).await
    }

    /// Create or overwrite the record for `username` and persist.
    ///
    /// A repeat login for the same username supersedes the prior record;
    /// its old session token stops resolving.
    pub async fn register(&self, username: String, record: CredentialRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let replaced = state.insert(username.clone(), record).is_some();
        debug!(username, replaced, "registered credential record");
        write_atomic(&self.path, &state).await
    }

    /// Resolve a session token to its owning username and record.
    ///
    /// Scans the store under the lock, so the caller sees a consistent
    /// snapshot even while writers are active.
    pub async fn find_by_session(&self, session_token: &str) -> Option<(String, CredentialRecord)> {
        let state = self.state.lock().await;
        state
            .iter()
            .find(|(_, record)| record.user_session_token == session_token)
            .map(|(username, record)| (username.clone(), record.clone()))
    }

    /// Overwrite the token pair for an existing user after a refresh and
    /// persist. The session token is untouched; the old pair is gone.
    pub async fn update_tokens(
        &self,
        username: &str,
        access_token: String,
        refresh_token: String,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .get_mut(username)
            .ok_or_else(|| Error::UnknownUser(username.to_owned()))?;
        record.access_token = access_token;
        record.refresh_token = refresh_token;
        debug!(username, "replaced token pair after refresh");
        write_atomic(&self.path, &state).await
    }

    /// Number of active records.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Atomically replace the store file: write a temp file in the same
/// directory, set 0600, rename over the target. A crash mid-write leaves
/// the previous file intact.
async fn write_atomic(path: &Path, data: &BTreeMap<String, CredentialRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::StoreParse(format!("serializing credential store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential_store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp store file: {e}")))?;

    // The file holds live OAuth tokens: owner read/write only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted credential store");
    Ok(())
}
