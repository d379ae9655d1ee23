use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(ErrorBody),

    #[error("Access denied: {0}")]
    AccessDenied(ErrorBody),

    #[error("Resource not found: {0}")]
    NotFound(ErrorBody),

    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: ErrorBody },

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(ErrorBody),

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Body of a failed response.
///
/// `message` is only ever taken from a JSON `message` or `error` string and
/// is safe to show to users. `raw` is the truncated body, for logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    message: Option<String>,
    raw: String,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                ["message", "error"]
                    .iter()
                    .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::trim))
                    .filter(|message| !message.is_empty())
                    .map(truncate_body)
            });
        Self {
            message,
            raw: truncate_body(body.trim()),
        }
    }

    /// The server-provided message, if the body carried one.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, self.raw.is_empty()) {
            (Some(message), _) => f.write_str(message),
            (None, false) => f.write_str(&self.raw),
            (None, true) => f.write_str("(empty body)"),
        }
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = ErrorBody::parse(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(body),
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(body),
            code => ApiError::Rejected { status: code, body },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// The message the server sent with the failure, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::ServerError(body)
            | ApiError::Rejected { body, .. } => body.message(),
            _ => None,
        }
    }
}
