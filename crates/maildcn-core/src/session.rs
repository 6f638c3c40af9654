//! Durable client session
//!
//! The signed-in user and bearer token live in a small key-value store.
//! A session counts as authenticated only when both entries are present.

use maildcn_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const USER_KEY: &str = "user";
pub const TOKEN_KEY: &str = "token";

/// String key-value persistence
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `session.json` under the platform data directory
    pub fn default_path() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("maildcn").join("session.json"))
            .ok_or_else(|| Error::Storage("no data directory on this platform".to_string()))
    }

    /// Store at the configured path, or the default one
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::new(path)),
            None => Ok(Self::new(Self::default_path()?)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            Error::Storage(format!("corrupt session file {}: {}", self.path.display(), e))
        })
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::Storage(format!("failed to encode session: {}", e)))?;
        write_private(&self.path, content.as_bytes())
            .map_err(|e| Error::Storage(format!("failed to write {}: {}", self.path.display(), e)))
    }
}

/// Write `content` readable by the owner only; the file holds a bearer token
#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies when the file is created
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(content)
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, content)
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read()?;
        entries.insert(key.to_string(), value.to_string());
        self.write(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.read()?;
        if entries.remove(key).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }
}

/// Signed-in user as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub email: String,
    #[serde(default)]
    pub tls_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSession {
    LoggedOut,
    Authenticated { user: SessionUser, token: String },
}

impl AuthSession {
    /// Rebuild the session from `store`
    ///
    /// Any read or decode failure yields `LoggedOut`.
    pub fn restore(store: &dyn KeyValueStore) -> Self {
        let read = |key: &str| match store.get(key) {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(e) => {
                warn!("Failed to read session '{}': {}", key, e);
                None
            }
        };

        let (Some(raw_user), Some(token)) = (read(USER_KEY), read(TOKEN_KEY)) else {
            debug!("No stored session");
            return AuthSession::LoggedOut;
        };

        match serde_json::from_str::<SessionUser>(&raw_user) {
            Ok(user) if !user.email.is_empty() => AuthSession::Authenticated { user, token },
            Ok(_) => AuthSession::LoggedOut,
            Err(e) => {
                warn!("Ignoring unreadable stored user: {}", e);
                AuthSession::LoggedOut
            }
        }
    }

    /// Persist `user` and `token`
    pub fn login(store: &dyn KeyValueStore, user: SessionUser, token: String) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::Auth("backend returned an empty token".to_string()));
        }
        let raw_user = serde_json::to_string(&user)
            .map_err(|e| Error::Storage(format!("failed to encode user: {}", e)))?;
        store.set(USER_KEY, &raw_user)?;
        store.set(TOKEN_KEY, &token)?;
        info!("Signed in as {}", user.email);
        Ok(AuthSession::Authenticated { user, token })
    }

    /// Remove both entries
    pub fn logout(store: &dyn KeyValueStore) -> Result<Self> {
        store.remove(USER_KEY)?;
        store.remove(TOKEN_KEY)?;
        info!("Signed out");
        Ok(AuthSession::LoggedOut)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthSession::Authenticated { .. })
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            AuthSession::Authenticated { token, .. } => Some(token),
            AuthSession::LoggedOut => None,
        }
    }

    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            AuthSession::Authenticated { user, .. } => Some(user),
            AuthSession::LoggedOut => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn user() -> SessionUser {
        SessionUser {
            email: "alice@example.com".to_string(),
            tls_verified: true,
        }
    }

    #[test]
    fn test_login_then_restore() {
        let store = MemoryStore::new();
        AuthSession::login(&store, user(), "tok".to_string()).unwrap();

        let session = AuthSession::restore(&store);
        assert_eq!(
            session,
            AuthSession::Authenticated {
                user: user(),
                token: "tok".to_string()
            }
        );
    }

    #[test]
    fn test_restore_requires_both_entries() {
        let store = MemoryStore::new();
        store.set(TOKEN_KEY, "tok").unwrap();
        assert!(!AuthSession::restore(&store).is_authenticated());

        let store = MemoryStore::new();
        store
            .set(USER_KEY, &serde_json::to_string(&user()).unwrap())
            .unwrap();
        store.set(TOKEN_KEY, "").unwrap();
        assert!(!AuthSession::restore(&store).is_authenticated());
    }

    #[test]
    fn test_unreadable_user_is_logged_out() {
        let store = MemoryStore::new();
        store.set(USER_KEY, "{not json").unwrap();
        store.set(TOKEN_KEY, "tok").unwrap();
        assert_eq!(AuthSession::restore(&store), AuthSession::LoggedOut);
    }

    #[test]
    fn test_login_rejects_blank_token() {
        let store = MemoryStore::new();
        assert!(AuthSession::login(&store, user(), "  ".to_string()).is_err());
        assert_eq!(store.get(USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_and_logout_clears() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileStore::new(&path);
        AuthSession::login(&store, user(), "tok".to_string()).unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(AuthSession::restore(&reopened).token(), Some("tok"));

        AuthSession::logout(&reopened).unwrap();
        assert_eq!(AuthSession::restore(&store), AuthSession::LoggedOut);
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_logged_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = FileStore::new(&path);
        assert!(store.get(TOKEN_KEY).is_err());
        assert_eq!(AuthSession::restore(&store), AuthSession::LoggedOut);
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileStore::new(&path);
        AuthSession::login(&store, user(), "tok".to_string()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(AuthSession::restore(&store).token(), Some("tok"));
    }
}
