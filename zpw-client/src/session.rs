//! Session state: cookies, key material and push endpoints.
//!
//! The store is the sole owner of key material. Readers take a snapshot of
//! the key at the start of an operation; only login, restore, the setters and
//! invalidation write.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Cookie jar as sent with every request: name → value.
pub type Cookies = BTreeMap<String, String>;

/// Everything needed to resume an authenticated session.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub cookies:        Cookies,
    /// Base64 AES key used by the REST codec.
    #[serde(default)]
    pub secret_key:     Option<String>,
    #[serde(default)]
    pub imei:           String,
    #[serde(default)]
    pub user_id:        Option<String>,
    #[serde(default)]
    pub phone_number:   Option<String>,
    /// WebSocket URLs from `zpw_ws`, preferred first.
    #[serde(default)]
    pub push_endpoints: Vec<String>,
    #[serde(default)]
    pub logged_in:      bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("imei", &self.imei)
            .field("user_id", &self.user_id)
            .field("push_endpoints", &self.push_endpoints)
            .field("logged_in", &self.logged_in)
            .finish()
    }
}

impl Session {
    /// Serialize to the on-disk JSON form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse the on-disk JSON form.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Render cookies as a `Cookie` header value: `k=v; k2=v2`.
pub fn cookie_header(cookies: &Cookies) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

// ─── SessionStore ─────────────────────────────────────────────────────────────

/// Shared, lock-guarded [`Session`].
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<Session>,
}

impl SessionStore {
    pub fn new(session: Session) -> Self {
        Self { inner: RwLock::new(session) }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// A copy of the current session.
    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    /// Replace the whole session.
    pub fn replace(&self, session: Session) {
        *self.write() = session;
    }

    /// Apply `f` under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.write())
    }

    /// `true` when both a secret key and cookies are present.
    pub fn is_logged_in(&self) -> bool {
        let s = self.read();
        s.secret_key.as_deref().is_some_and(|k| !k.is_empty()) && !s.cookies.is_empty()
    }

    pub fn cookies(&self) -> Cookies {
        self.read().cookies.clone()
    }

    pub fn set_cookies(&self, cookies: Cookies) {
        self.write().cookies = cookies;
    }

    pub fn cookie_header(&self) -> String {
        cookie_header(&self.read().cookies)
    }

    pub fn secret_key(&self) -> Option<String> {
        self.read().secret_key.clone().filter(|k| !k.is_empty())
    }

    /// Set the key without validating it; a bad key surfaces on first use.
    pub fn set_secret_key(&self, key: impl Into<String>) {
        self.write().secret_key = Some(key.into());
    }

    pub fn imei(&self) -> String {
        self.read().imei.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.read().user_id.clone()
    }

    pub fn push_endpoints(&self) -> Vec<String> {
        self.read().push_endpoints.clone()
    }

    /// Drop key material and the logged-in flag. Cookies are kept so the
    /// host can inspect them, but without a key nothing can be sent.
    pub fn invalidate(&self) {
        let mut s = self.write();
        s.logged_in = false;
        s.secret_key = None;
    }
}
