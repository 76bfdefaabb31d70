//! Authentication state: tokens and the session snapshot.
//!
//! This module provides:
//! - `TokenManager`: persisted access/refresh/expiry triple plus identity headers
//! - `SessionSnapshot` / `SessionIdentity`: who the caller is, with normalized roles
//!
//! Everything is persisted through the `KvStore`, so auth state survives
//! restarts and degrades to "logged out" when storage is unavailable.

pub mod session;
pub mod tokens;

pub use session::{normalize_role, SessionIdentity, SessionSnapshot};
pub use tokens::{AuthKeys, AuthTokens, TokenManager};
