//! Core library for marketline.
//!
//! Provides the client-side session store, the shared API client with its
//! bearer-token refresh protocol, durable session storage backends, and the
//! models exchanged with the remote auth API.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, SessionEvent, SessionStore};
pub use config::Config;
