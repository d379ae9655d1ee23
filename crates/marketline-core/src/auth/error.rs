use thiserror::Error;

use crate::api::ApiError;

/// Failure of a session store operation.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Rejected locally; no request was sent and the store was not touched.
    #[error("{0}")]
    Validation(String),

    /// The remote call failed. `message` is what the store recorded.
    #[error("{message}")]
    Request {
        message: String,
        #[source]
        source: ApiError,
    },
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(message.into())
    }

    /// Build a request failure, preferring the server's own message.
    pub fn request(source: ApiError, fallback: &str) -> Self {
        let message = source
            .server_message()
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string());
        AuthError::Request { message, source }
    }

    pub fn message(&self) -> &str {
        match self {
            AuthError::Validation(message) => message,
            AuthError::Request { message, .. } => message,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AuthError::Validation(_))
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            AuthError::Request {
                source: ApiError::SessionExpired,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ErrorBody;

    #[test]
    fn test_request_prefers_server_message() {
        let unauthorized = |body: &str| ApiError::Unauthorized(ErrorBody::parse(body));

        let err =
            AuthError::request(unauthorized(r#"{"message":"Wrong password"}"#), "Login failed");
        assert_eq!(err.message(), "Wrong password");

        let err = AuthError::request(unauthorized(""), "Login failed");
        assert_eq!(err.message(), "Login failed");

        let err = AuthError::request(unauthorized(r#"{"success":false}"#), "Login failed");
        assert_eq!(err.message(), "Login failed");

        let err = AuthError::request(ApiError::RateLimited, "Login failed");
        assert_eq!(err.to_string(), "Login failed");
    }

    #[test]
    fn test_session_expired_detection() {
        let err = AuthError::request(ApiError::SessionExpired, "Failed to load session");
        assert!(err.is_session_expired());
        assert!(!AuthError::validation("Email is required").is_session_expired());
    }
}
