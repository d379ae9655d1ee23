use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::User;

use super::storage::{SessionStorage, StorageError, StorageKey};

/// Token access handed to the API client.
///
/// The client never sees storage directly; it reads and replaces tokens
/// through this interface so the in-memory session stays the single source
/// of truth.
pub trait SessionAccessor: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    /// Install a refreshed access token, but only while the session still
    /// holds `refreshed_with`. Returns false if the session was cleared or
    /// replaced while the refresh was in flight; nothing is written then.
    fn set_tokens(&self, access_token: String, refreshed_with: &str) -> bool;
    /// Drop the whole session, in memory and on disk.
    fn clear_session(&self);
}

/// Session transitions that front ends react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
    /// Refresh was impossible; the user must sign in again.
    Expired,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
}

impl SessionData {
    /// Authenticated requires both a token and an identity.
    fn settle(&mut self) {
        self.is_authenticated = self.access_token.is_some() && self.user.is_some();
    }
}

/// Snapshot written under `StorageKey::Session`. Never carries transient
/// operation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PersistedSession {
    pub user: Option<User>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub saved_at: DateTime<Utc>,
}

impl From<&SessionData> for PersistedSession {
    fn from(data: &SessionData) -> Self {
        Self {
            user: data.user.clone(),
            token: data.access_token.clone(),
            refresh_token: data.refresh_token.clone(),
            is_authenticated: data.is_authenticated,
            saved_at: Utc::now(),
        }
    }
}

pub struct Session {
    storage: Arc<dyn SessionStorage>,
    data: RwLock<SessionData>,
}

impl Session {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            data: RwLock::new(SessionData::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore the session from storage.
    /// Returns true if an access token was found.
    pub fn load(&self) -> Result<bool, StorageError> {
        let mut current = self.write();
        let snapshot = match self.storage.get(StorageKey::Session)? {
            Some(contents) => Some(
                serde_json::from_str::<PersistedSession>(&contents)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            ),
            None => None,
        };

        // Token keys win over the snapshot; they are written on every refresh.
        let access_token = self
            .storage
            .get(StorageKey::AccessToken)?
            .or_else(|| snapshot.as_ref().and_then(|s| s.token.clone()));
        let refresh_token = self
            .storage
            .get(StorageKey::RefreshToken)?
            .or_else(|| snapshot.as_ref().and_then(|s| s.refresh_token.clone()));

        let mut data = SessionData {
            user: snapshot.as_ref().and_then(|s| s.user.clone()),
            access_token,
            refresh_token,
            is_authenticated: false,
        };
        data.settle();
        if let Some(ref s) = snapshot {
            data.is_authenticated &= s.is_authenticated;
        }

        let found = data.access_token.is_some();
        debug!(found, authenticated = data.is_authenticated, "Session loaded");
        *current = data;
        Ok(found)
    }

    pub fn snapshot(&self) -> SessionData {
        self.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated
    }

    /// Install a complete session after login or signup.
    pub fn establish(&self, user: User, access_token: String, refresh_token: String) {
        let mut data = self.write();
        *data = SessionData {
            user: Some(user),
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            is_authenticated: true,
        };
        self.persist(&data);
    }

    /// Replace the identity, e.g. after `/auth/me`.
    pub fn set_user(&self, user: User) {
        let mut data = self.write();
        data.user = Some(user);
        data.settle();
        self.persist(&data);
    }

    /// Mirror the in-memory session into storage. Callers hold the write
    /// lock so storage never lags a concurrent clear. Failures are logged;
    /// the in-memory session stays authoritative.
    fn persist(&self, data: &SessionData) {
        if let Err(e) = self.try_persist(data) {
            warn!(error = %e, "Failed to persist session");
        }
    }

    fn try_persist(&self, data: &SessionData) -> Result<(), StorageError> {
        match (&data.access_token, &data.refresh_token) {
            (Some(access), Some(refresh)) => {
                self.storage.set(StorageKey::AccessToken, access)?;
                self.storage.set(StorageKey::RefreshToken, refresh)?;
            }
            (Some(access), None) => {
                self.storage.set(StorageKey::AccessToken, access)?;
                self.storage.remove(StorageKey::RefreshToken)?;
            }
            (None, _) => {
                self.storage.remove(StorageKey::AccessToken)?;
                self.storage.remove(StorageKey::RefreshToken)?;
            }
        }
        let snapshot = serde_json::to_string(&PersistedSession::from(data))
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.storage.set(StorageKey::Session, &snapshot)
    }

    fn wipe_storage(&self) {
        for key in StorageKey::ALL {
            if let Err(e) = self.storage.remove(key) {
                warn!(error = %e, key = key.as_str(), "Failed to clear stored session");
            }
        }
    }
}

impl SessionAccessor for Session {
    fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    fn set_tokens(&self, access_token: String, refreshed_with: &str) -> bool {
        let mut data = self.write();
        if data.refresh_token.as_deref() != Some(refreshed_with) {
            debug!("Session changed during refresh, discarding new access token");
            return false;
        }
        data.access_token = Some(access_token);
        data.settle();
        self.persist(&data);
        true
    }

    fn clear_session(&self) {
        let mut data = self.write();
        *data = SessionData::default();
        self.wipe_storage();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{FileStorage, MemoryStorage};
    use crate::models::UserStatus;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: None,
            status: UserStatus::default(),
        }
    }

    #[test]
    fn test_establish_persists_tokens_and_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let session = Session::new(storage.clone());
        session.establish(user(), "t1".to_string(), "r1".to_string());

        assert!(session.is_authenticated());
        assert_eq!(storage.get(StorageKey::AccessToken).unwrap().as_deref(), Some("t1"));
        assert_eq!(storage.get(StorageKey::RefreshToken).unwrap().as_deref(), Some("r1"));

        let raw = storage.get(StorageKey::Session).unwrap().expect("snapshot written");
        let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot["token"], "t1");
        assert_eq!(snapshot["refreshToken"], "r1");
        assert_eq!(snapshot["isAuthenticated"], true);
        assert_eq!(snapshot["user"]["id"], "u1");
        assert!(snapshot.get("isLoading").is_none());
        assert!(snapshot.get("error").is_none());
    }

    #[test]
    fn test_load_restores_previous_process() {
        let dir = tempfile::tempdir().expect("create temp dir");
        {
            let session = Session::new(Arc::new(FileStorage::new(dir.path())));
            session.establish(user(), "t1".to_string(), "r1".to_string());
            assert!(session.set_tokens("t2".to_string(), "r1"));
        }

        let session = Session::new(Arc::new(FileStorage::new(dir.path())));
        assert!(session.load().unwrap());
        let data = session.snapshot();
        assert_eq!(data.access_token.as_deref(), Some("t2"));
        assert_eq!(data.refresh_token.as_deref(), Some("r1"));
        assert_eq!(data.user, Some(user()));
        assert!(data.is_authenticated);
    }

    #[test]
    fn test_load_tokens_without_snapshot_is_not_authenticated() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(StorageKey::AccessToken, "t1").unwrap();
        storage.set(StorageKey::RefreshToken, "r1").unwrap();

        let session = Session::new(storage);
        assert!(session.load().unwrap());
        assert_eq!(session.access_token().as_deref(), Some("t1"));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_load_empty_storage() {
        let session = Session::new(Arc::new(MemoryStorage::new()));
        assert!(!session.load().unwrap());
        assert_eq!(session.snapshot(), SessionData::default());
    }

    #[test]
    fn test_load_corrupt_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(StorageKey::Session, "{not json").unwrap();
        let session = Session::new(storage);
        assert!(matches!(session.load(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_clear_session_removes_everything() {
        let storage = Arc::new(MemoryStorage::new());
        let session = Session::new(storage.clone());
        session.establish(user(), "t1".to_string(), "r1".to_string());

        session.clear_session();
        assert_eq!(session.snapshot(), SessionData::default());
        for key in StorageKey::ALL {
            assert_eq!(storage.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_set_tokens_without_user_stays_unauthenticated() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(StorageKey::AccessToken, "t1").unwrap();
        storage.set(StorageKey::RefreshToken, "r1").unwrap();
        let session = Session::new(storage);
        session.load().unwrap();

        assert!(session.set_tokens("t2".to_string(), "r1"));
        assert!(!session.is_authenticated());

        session.set_user(user());
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_set_tokens_after_clear_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let session = Session::new(storage.clone());
        session.establish(user(), "t1".to_string(), "r1".to_string());
        session.clear_session();

        assert!(!session.set_tokens("t2".to_string(), "r1"));
        assert_eq!(session.snapshot(), SessionData::default());
        for key in StorageKey::ALL {
            assert_eq!(storage.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_set_tokens_rejects_replaced_session() {
        let session = Session::new(Arc::new(MemoryStorage::new()));
        session.establish(user(), "t1".to_string(), "r1".to_string());
        // Signed in again while the old refresh was in flight
        session.establish(user(), "t5".to_string(), "r5".to_string());

        assert!(!session.set_tokens("t2".to_string(), "r1"));
        assert_eq!(session.access_token().as_deref(), Some("t5"));
    }
}
