//! Credential storage
//!
//! Stores hold the token pair and the cached identity. They have plain
//! key/value semantics: no expiry logic, no renewal, no events. Only the
//! session manager writes to them.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use storefront_core::{SessionIdentity, TokenPair};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Everything persisted for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub tokens: TokenPair,
    pub identity: Option<SessionIdentity>,
}

impl StoredCredentials {
    pub fn new(tokens: TokenPair, identity: Option<SessionIdentity>) -> Self {
        Self { tokens, identity }
    }
}

/// Synchronous credential storage.
///
/// `replace` swaps the whole record at once: a reader sees either the old
/// record or the new one, never a mix of the two.
pub trait CredentialStore: Send + Sync {
    /// Current credentials, `None` when no session exists
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError>;

    /// Overwrite the stored record as one unit
    fn replace(&self, credentials: &StoredCredentials) -> Result<(), StoreError>;

    /// Remove tokens and identity
    fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<StoredCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a session
    pub fn with_credentials(credentials: StoredCredentials) -> Self {
        Self {
            slot: RwLock::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError> {
        Ok(self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn replace(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// On-disk layout: the two token strings under fixed keys plus the identity
/// as an opaque JSON blob.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<serde_json::Value>,
}

/// JSON file store, the durable equivalent of origin-scoped local storage
///
/// Writes go to a uniquely named sibling temporary file that is then renamed
/// over the target, so a concurrent reader, in this process or another, never
/// observes a half-written pair.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the file; temp files live here so the final rename
    /// stays on one filesystem
    fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedSession = serde_json::from_str(&content)?;
        let (access_token, refresh_token) = match (persisted.access_token, persisted.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                (access, refresh)
            }
            (None, None) => return Ok(None),
            _ => {
                warn!(path = %self.path.display(), "Ignoring credentials file holding only half a token pair");
                return Ok(None);
            }
        };

        let identity = persisted.user.and_then(|user| {
            serde_json::from_value::<SessionIdentity>(user)
                .inspect_err(|e| debug!("Ignoring unreadable cached identity: {e}"))
                .ok()
        });

        Ok(Some(StoredCredentials {
            tokens: TokenPair::new(access_token, refresh_token),
            identity,
        }))
    }

    fn replace(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        let persisted = PersistedSession {
            access_token: Some(credentials.tokens.access_token.clone()),
            refresh_token: Some(credentials.tokens.refresh_token.clone()),
            user: credentials
                .identity
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        };
        let content = serde_json::to_string_pretty(&persisted)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = self.dir();
        std::fs::create_dir_all(dir)?;

        // Unique name, created with mode 0600; writers in other processes
        // never share it
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
