//! Authentication module for managing the client-side session.
//!
//! This module provides:
//! - `SessionStore`: login / register / logout / verification / password flows
//! - `Session`: in-memory session mirrored into durable storage; it is the
//!   `SessionAccessor` the API client reads tokens from
//! - `SessionStorage` backends: files in the cache dir, the OS keychain, or memory

pub mod credentials;
pub mod error;
pub mod session;
pub mod storage;
pub mod store;
pub mod validate;

pub use credentials::KeyringStorage;
pub use error::AuthError;
pub use session::{PersistedSession, Session, SessionAccessor, SessionData, SessionEvent};
pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError, StorageKey};
pub use store::{OperationStatus, SessionStore};
