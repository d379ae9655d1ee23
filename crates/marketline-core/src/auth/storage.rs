//! Durable storage for session state.
//!
//! Storage is a small key/value surface with three well-known keys. Values are
//! opaque strings; the session snapshot is JSON encoded by `Session`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    AccessToken,
    RefreshToken,
    /// Snapshot of `{user, token, refreshToken, isAuthenticated}`
    Session,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::AccessToken => "accessToken",
            StorageKey::RefreshToken => "refreshToken",
            StorageKey::Session => "auth-storage",
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Corrupt session data: {0}")]
    Corrupt(String),
}

pub trait SessionStorage: Send + Sync {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError>;
    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: StorageKey) -> Result<(), StorageError>;
}

/// One file per key under a directory (normally the cache dir).
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: StorageKey) -> PathBuf {
        match key {
            StorageKey::Session => self.dir.join("session.json"),
            other => self.dir.join(other.as_str()),
        }
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(Self::io_error(&path))?;
        Ok(Some(contents))
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))?;
        let path = self.path(key);
        std::fs::write(&path, value).map_err(Self::io_error(&path))?;

        // Tokens are credentials; keep them owner-only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(Self::io_error(&path))?;
        }
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        let path = self.path(key);
        if path.exists() {
            std::fs::remove_file(&path).map_err(Self::io_error(&path))?;
        }
        Ok(())
    }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<StorageKey, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&key).cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_set_get_remove() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let storage = FileStorage::new(dir.path().join("marketline"));

        assert_eq!(storage.get(StorageKey::AccessToken).unwrap(), None);

        storage.set(StorageKey::AccessToken, "t1").unwrap();
        storage.set(StorageKey::Session, "{}").unwrap();
        assert_eq!(storage.get(StorageKey::AccessToken).unwrap().as_deref(), Some("t1"));
        assert!(dir.path().join("marketline").join("session.json").exists());

        storage.remove(StorageKey::AccessToken).unwrap();
        assert_eq!(storage.get(StorageKey::AccessToken).unwrap(), None);

        // Removing a missing key is not an error
        storage.remove(StorageKey::RefreshToken).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("create temp dir");
        let storage = FileStorage::new(dir.path());
        storage.set(StorageKey::RefreshToken, "r1").unwrap();

        let mode = std::fs::metadata(dir.path().join("refreshToken"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set(StorageKey::RefreshToken, "r1").unwrap();
        storage.set(StorageKey::RefreshToken, "r2").unwrap();
        assert_eq!(storage.get(StorageKey::RefreshToken).unwrap().as_deref(), Some("r2"));
        storage.remove(StorageKey::RefreshToken).unwrap();
        assert_eq!(storage.get(StorageKey::RefreshToken).unwrap(), None);
    }

    #[test]
    fn test_storage_key_names() {
        let names: Vec<&str> = StorageKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["accessToken", "refreshToken", "auth-storage"]);
    }
}
