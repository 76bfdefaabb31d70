use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::session::{SessionIdentity, SessionSnapshot};
use crate::store::KvStore;

/// Buffer time before expiry to trigger refresh (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLES_HEADER: &str = "x-roles";
pub const USER_TYPE_HEADER: &str = "x-user-type";

/// Access token, refresh token and expiry, always persisted together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.expires_at.is_none()
    }

    /// Tokens without an expiry never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }

    /// Check if the access token will expire soon and should be refreshed
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|at| now > at - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES))
            .unwrap_or(false)
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|at| at - now)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.time_until_expiry(now).map(|d| d.num_minutes().max(0))
    }
}

/// Persisted key names for auth and session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
    pub session: String,
}

impl AuthKeys {
    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            access_token: format!("{}authToken", namespace),
            refresh_token: format!("{}refreshToken", namespace),
            expires_at: format!("{}authExpiresAt", namespace),
            session: format!("{}session", namespace),
        }
    }
}

/// Reads and writes auth tokens and the session snapshot, and derives the
/// identity headers every request carries.
///
/// Never fails: all state lives in the `KvStore`, which degrades to "nothing
/// stored" when persistence is unavailable. Multi-key writes are serialized
/// so the token triple is never observed half-written.
#[derive(Clone)]
pub struct TokenManager {
    store: KvStore,
    keys: Arc<AuthKeys>,
    write_lock: Arc<Mutex<()>>,
}

impl TokenManager {
    pub fn new(store: KvStore, namespace: &str) -> Self {
        Self {
            store,
            keys: Arc::new(AuthKeys::with_namespace(namespace)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn keys(&self) -> &AuthKeys {
        &self.keys
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn put(&self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => self.store.set(key, value),
            None => self.store.remove(key),
        }
    }

    // ===== Token triple =====

    /// Persist all three fields as one unit. `None` fields are removed, so
    /// passing an empty triple fully clears auth state.
    pub fn set_auth_tokens(&self, tokens: &AuthTokens) {
        let _guard = self.lock();
        let expires_at = tokens.expires_at.map(|at| at.to_rfc3339());
        self.put(&self.keys.access_token, tokens.access_token.as_deref());
        self.put(&self.keys.refresh_token, tokens.refresh_token.as_deref());
        self.put(&self.keys.expires_at, expires_at.as_deref());
        debug!(
            has_access = tokens.access_token.is_some(),
            has_refresh = tokens.refresh_token.is_some(),
            "Auth tokens stored"
        );
    }

    pub fn get_auth_tokens(&self) -> AuthTokens {
        let _guard = self.lock();
        let expires_at = self.store.get(&self.keys.expires_at).and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    warn!(value = %raw, error = %e, "Ignoring unparseable token expiry");
                    None
                }
            }
        });
        AuthTokens {
            access_token: self.store.get(&self.keys.access_token),
            refresh_token: self.store.get(&self.keys.refresh_token),
            expires_at,
        }
    }

    pub fn clear_auth_tokens(&self) {
        self.set_auth_tokens(&AuthTokens::default());
    }

    // ===== Legacy single-token accessors =====
    // These share the triple's access-token key.

    pub fn set_access_token(&self, token: &str) {
        let _guard = self.lock();
        self.store.set(&self.keys.access_token, token);
    }

    pub fn get_access_token(&self) -> Option<String> {
        let _guard = self.lock();
        self.store.get(&self.keys.access_token)
    }

    pub fn clear_access_token(&self) {
        let _guard = self.lock();
        self.store.remove(&self.keys.access_token);
    }

    // ===== Session snapshot =====

    pub fn save_session(&self, snapshot: &SessionSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(contents) => self.store.set(&self.keys.session, &contents),
            Err(e) => warn!(error = %e, "Failed to serialize session snapshot"),
        }
    }

    pub fn load_session(&self) -> Option<SessionSnapshot> {
        let raw = self.store.get(&self.keys.session)?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable session snapshot");
                None
            }
        }
    }

    pub fn clear_session(&self) {
        self.store.remove(&self.keys.session);
    }

    pub fn identity(&self) -> SessionIdentity {
        self.load_session()
            .map(|snapshot| SessionIdentity::from_snapshot(&snapshot))
            .unwrap_or_default()
    }

    // ===== Request headers =====

    /// Headers identifying the caller. Inputs that are absent add nothing.
    pub fn identity_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(token) = self.get_access_token().filter(|t| !t.trim().is_empty()) {
            insert_header(&mut headers, AUTHORIZATION, &format!("Bearer {}", token));
        }

        let identity = self.identity();
        if let Some(ref user_id) = identity.user_id {
            insert_header(&mut headers, HeaderName::from_static(USER_ID_HEADER), user_id);
        }
        if !identity.roles.is_empty() {
            insert_header(
                &mut headers,
                HeaderName::from_static(ROLES_HEADER),
                &identity.roles.join(","),
            );
        }
        if let Some(ref user_type) = identity.user_type {
            insert_header(&mut headers, HeaderName::from_static(USER_TYPE_HEADER), user_type);
        }

        headers
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => warn!(header = %name, error = %e, "Skipping header with invalid value"),
    }
}
