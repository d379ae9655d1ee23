//! Data models shared between the session store and the auth API.

pub mod user;

pub use user::{Location, RegisterProfile, User, UserStatus, UserType};
