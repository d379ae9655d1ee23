//! REST API client module for the marketline backend.
//!
//! `ApiClient` is the single request pipeline shared by every API call. It
//! attaches the bearer token from the session and, when the server answers
//! 401, performs one silent token refresh before retrying the request.
//!
//! The HTTP library itself sits behind the `HttpTransport` trait.

pub mod client;
pub mod error;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ApiClient, AuthPayload};
pub use error::{ApiError, ErrorBody};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
