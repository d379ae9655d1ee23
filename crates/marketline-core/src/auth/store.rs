//! Session store: the single owner of authentication state.
//!
//! Every networked operation follows the same shape: local validation, then
//! `is_loading = true` with the previous error cleared, then either the
//! session is updated or the failure message is recorded. The failure is
//! always returned to the caller as well, so call sites can react directly
//! while bindings read `status()`.
//!
//! Operations are expected to be issued one at a time. Concurrent calls are
//! memory-safe but share one `OperationStatus`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, HttpTransport, ReqwestTransport};
use crate::config::{Config, StorageBackend};
use crate::models::{Location, RegisterProfile, User};

use super::session::{Session, SessionAccessor, SessionData, SessionEvent};
use super::storage::{FileStorage, SessionStorage};
use super::{validate, AuthError, KeyringStorage};

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Transient state of the most recent operation. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStatus {
    pub is_loading: bool,
    pub error: Option<String>,
}

pub struct SessionStore {
    session: Arc<Session>,
    api: ApiClient,
    status: Mutex<OperationStatus>,
    events: broadcast::Sender<SessionEvent>,
    default_location: Location,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>, transport: Arc<dyn HttpTransport>) -> Self {
        let session = Arc::new(Session::new(storage));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let api = ApiClient::new(transport, session.clone(), events.clone());
        Self {
            session,
            api,
            status: Mutex::new(OperationStatus::default()),
            events,
            default_location: Location::default(),
        }
    }

    /// Build a store talking to the configured server with the configured
    /// storage backend.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage: Arc<dyn SessionStorage> = match config.storage {
            StorageBackend::File => Arc::new(FileStorage::new(config.cache_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
        };
        let transport = ReqwestTransport::new(config.api_base_url(), config.request_timeout())?;
        Ok(Self::new(storage, Arc::new(transport))
            .with_default_location(config.default_location.clone()))
    }

    pub fn with_default_location(mut self, location: Location) -> Self {
        self.default_location = location;
        self
    }

    // ===== Accessors =====

    /// Shared request pipeline for the rest of the app.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionData {
        self.session.snapshot()
    }

    pub fn user(&self) -> Option<User> {
        self.session.user()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.access_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn status(&self) -> OperationStatus {
        self.lock_status().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_status().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.lock_status().error.clone()
    }

    pub fn clear_error(&self) {
        self.lock_status().error = None;
    }

    fn lock_status(&self) -> MutexGuard<'_, OperationStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Operation bookkeeping =====

    /// Run one remote call with loading/error bookkeeping.
    async fn track<T, F>(&self, fallback: &str, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        *self.lock_status() = OperationStatus {
            is_loading: true,
            error: None,
        };

        match call.await {
            Ok(value) => {
                self.lock_status().is_loading = false;
                Ok(value)
            }
            Err(source) => {
                let err = AuthError::request(source, fallback);
                warn!(error = %err, "{}", fallback);
                *self.lock_status() = OperationStatus {
                    is_loading: false,
                    error: Some(err.message().to_string()),
                };
                Err(err)
            }
        }
    }

    fn announce(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    // ===== Operations =====

    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        validate::email(email)?;
        validate::require("Password", password)?;

        let payload = self
            .track("Login failed", self.api.login(email.trim(), password))
            .await?;

        self.session
            .establish(payload.user.clone(), payload.token, payload.refresh_token);
        info!(user_id = %payload.user.id, "Logged in");
        self.announce(SessionEvent::LoggedIn);
        Ok(payload.user)
    }

    /// Create an account. The configured default location is attached to
    /// the request.
    pub async fn register(&self, profile: &RegisterProfile) -> Result<User, AuthError> {
        validate::require("First name", &profile.first_name)?;
        validate::require("Last name", &profile.last_name)?;
        validate::email(&profile.email)?;
        validate::new_password(&profile.password)?;

        let payload = self
            .track(
                "Registration failed",
                self.api.signup(profile, &self.default_location),
            )
            .await?;

        self.session
            .establish(payload.user.clone(), payload.token, payload.refresh_token);
        info!(user_id = %payload.user.id, "Registered");
        self.announce(SessionEvent::LoggedIn);
        Ok(payload.user)
    }

    /// End the session locally.
    ///
    /// The server is told in the background when a tokio runtime is
    /// available; that call can fail without affecting the logout. The
    /// returned handle lets short-lived callers wait for it.
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        let token = self.session.access_token();
        self.session.clear_session();
        *self.lock_status() = OperationStatus::default();

        let token = token?;
        info!("Logged out");
        self.announce(SessionEvent::LoggedOut);

        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let api = self.api.clone();
        Some(runtime.spawn(async move {
            if let Err(e) = api.notify_logout(Some(token)).await {
                debug!(error = %e, "Logout notification failed");
            }
        }))
    }

    pub async fn verify_email(&self, code: &str) -> Result<(), AuthError> {
        validate::otp(code)?;
        self.track("Email verification failed", self.api.verify_email(code))
            .await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        validate::email(email)?;
        self.track(
            "Password reset request failed",
            self.api.reset_password(email.trim()),
        )
        .await
    }

    /// Same as `request_password_reset`.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        self.request_password_reset(email).await
    }

    pub async fn update_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate::require("Reset token", reset_token)?;
        validate::new_password(new_password)?;
        self.track(
            "Password update failed",
            self.api.update_password(reset_token, new_password),
        )
        .await
    }

    /// Restore the persisted session and confirm it with `/auth/me`.
    ///
    /// Returns `Ok(None)` when there is nothing to restore. If the server
    /// cannot be reached the persisted session is kept and the error is
    /// returned; if the session is no longer valid it has been cleared.
    pub async fn hydrate(&self) -> Result<Option<User>, AuthError> {
        match self.session.load() {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored session");
                self.session.clear_session();
                return Ok(None);
            }
        }

        let user = self
            .track("Failed to load session", self.api.current_user())
            .await?;
        self.session.set_user(user.clone());
        debug!(user_id = %user.id, "Session restored");
        Ok(Some(user))
    }
}
