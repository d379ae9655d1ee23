//! API client for communicating with the marketline REST API.
//!
//! Every request goes through `ApiClient::execute`, which implements the
//! bearer-token contract:
//!
//! 1. The current access token (if any) is attached as `Authorization: Bearer`.
//! 2. Any response other than 401 is final.
//! 3. A 401 triggers one refresh through `/auth/refresh`. On success the
//!    request is re-issued exactly once with the new token and that outcome
//!    is final, even if it is another 401.
//! 4. If there is no refresh token or the refresh call fails, the session is
//!    cleared and `SessionEvent::Expired` is broadcast.
//!
//! Refreshes are single-flight: concurrent requests that hit 401 with the
//! same stale token share one refresh call.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::auth::{SessionAccessor, SessionEvent};
use crate::models::{Location, RegisterProfile, User};

use super::{ApiError, ApiRequest, ApiResponse, HttpTransport};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const SIGNUP_PATH: &str = "/auth/signup";
const LOGOUT_PATH: &str = "/auth/logout";
const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";
const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
const UPDATE_PASSWORD_PATH: &str = "/auth/update-password";
const REFRESH_PATH: &str = "/auth/refresh";
const ME_PATH: &str = "/auth/me";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Tokens and identity returned by login and signup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: User,
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct SignupResponse {
    data: AuthPayload,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// `/auth/me` has been seen both bare and wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MeResponse {
    Data { data: User },
    Keyed { user: User },
    Bare(User),
}

impl MeResponse {
    fn into_user(self) -> User {
        match self {
            MeResponse::Data { data } => data,
            MeResponse::Keyed { user } => user,
            MeResponse::Bare(user) => user,
        }
    }
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    #[serde(flatten)]
    profile: &'a RegisterProfile,
    location: &'a Location,
}

/// Shared request pipeline.
/// Clone is cheap - all state lives behind `Arc`s, so clones share the
/// session, the transport and the refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn SessionAccessor>,
    events: broadcast::Sender<SessionEvent>,
    refresh_gate: Arc<Mutex<()>>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionAccessor>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            session,
            events,
            refresh_gate: Arc::new(Mutex::new(())),
        }
    }

    // ===== Request pipeline =====

    /// Send a request through the bearer-token / refresh protocol.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.session.access_token();
        let response = self
            .send_with_backoff(&request.clone().with_bearer(token.clone()))
            .await?;

        if response.status != StatusCode::UNAUTHORIZED {
            return Self::check_response(response);
        }

        debug!(path = %request.path, "Unauthorized, attempting token refresh");
        let fresh = self.refresh_after_unauthorized(token.as_deref()).await?;

        // The retry is final: a second 401 is returned to the caller as-is.
        let retried = self.send_with_backoff(&request.with_bearer(Some(fresh))).await?;
        Self::check_response(retried)
    }

    /// Send a request without a bearer token and without the refresh protocol.
    async fn send_anonymous(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.send_with_backoff(&request).await?;
        Self::check_response(response)
    }

    async fn send_with_backoff(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.transport.send(request).await?;
            if response.status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(
                path = %request.path,
                retry = retries,
                backoff_ms = backoff_ms,
                "Rate limited, backing off"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }

    /// Check if response is successful, returning an error with body if not.
    fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    fn decode<T: DeserializeOwned>(response: &ApiResponse, path: &str) -> Result<T, ApiError> {
        serde_json::from_str(&response.body).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {}",
                path, e
            ))
        })
    }

    /// Obtain a usable access token after `stale` was rejected.
    async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> Result<String, ApiError> {
        let _guard = self.refresh_gate.lock().await;

        // Someone else settled the session while we waited for the gate.
        let current = self.session.access_token();
        if current.as_deref() != stale {
            return match current {
                Some(token) => {
                    debug!("Access token already refreshed by a concurrent request");
                    Ok(token)
                }
                None => Err(ApiError::SessionExpired),
            };
        }

        let Some(refresh_token) = self.session.refresh_token() else {
            warn!("No refresh token available, ending session");
            self.expire_session();
            return Err(ApiError::SessionExpired);
        };

        match self.refresh(&refresh_token).await {
            Ok(token) => {
                if !self.session.set_tokens(token.clone(), &refresh_token) {
                    // Logged out (or in again) while the refresh was in flight.
                    return Err(ApiError::SessionExpired);
                }
                info!("Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                if self.session.refresh_token().as_deref() == Some(refresh_token.as_str()) {
                    warn!(error = %e, "Token refresh failed, ending session");
                    self.expire_session();
                } else {
                    debug!(error = %e, "Token refresh failed for a session that already ended");
                }
                Err(e)
            }
        }
    }

    fn expire_session(&self) {
        self.session.clear_session();
        // No subscribers is fine; the session is already gone.
        let _ = self.events.send(SessionEvent::Expired);
    }

    // ===== Generic helpers for the rest of the app =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::get(path)).await?;
        Self::decode(&response, path)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::post(path).with_json(body)?).await?;
        Self::decode(&response, path)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::new(reqwest::Method::DELETE, path)).await?;
        Ok(())
    }

    // ===== Auth endpoints =====

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .send_anonymous(ApiRequest::post(LOGIN_PATH).with_json(&body)?)
            .await?;
        Self::decode(&response, LOGIN_PATH)
    }

    pub async fn signup(
        &self,
        profile: &RegisterProfile,
        location: &Location,
    ) -> Result<AuthPayload, ApiError> {
        let body = SignupRequest { profile, location };
        let response = self
            .send_anonymous(ApiRequest::post(SIGNUP_PATH).with_json(&body)?)
            .await?;
        let parsed: SignupResponse = Self::decode(&response, SIGNUP_PATH)?;
        Ok(parsed.data)
    }

    /// Tell the server a session ended. Best effort; callers usually ignore
    /// the result.
    pub async fn notify_logout(&self, token: Option<String>) -> Result<(), ApiError> {
        self.send_anonymous(ApiRequest::post(LOGOUT_PATH).with_bearer(token))
            .await?;
        Ok(())
    }

    pub async fn verify_email(&self, code: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "token": code });
        self.send_anonymous(ApiRequest::post(VERIFY_EMAIL_PATH).with_json(&body)?)
            .await?;
        Ok(())
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "email": email });
        self.send_anonymous(ApiRequest::post(RESET_PASSWORD_PATH).with_json(&body)?)
            .await?;
        Ok(())
    }

    pub async fn update_password(&self, token: &str, password: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "token": token, "password": password });
        self.send_anonymous(ApiRequest::post(UPDATE_PASSWORD_PATH).with_json(&body)?)
            .await?;
        Ok(())
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError> {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        let response = self
            .send_anonymous(ApiRequest::post(REFRESH_PATH).with_json(&body)?)
            .await?;
        let parsed: RefreshResponse = Self::decode(&response, REFRESH_PATH)?;
        Ok(parsed.token)
    }

    /// Fetch the signed-in user. Goes through the refresh protocol.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let parsed: MeResponse = self.get(ME_PATH).await?;
        Ok(parsed.into_user())
    }
}
