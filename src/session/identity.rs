//! Session key resolution.
//!
//! Authenticated callers get a key derived from their account id. Anonymous
//! callers get a generated key that is remembered in a cookie-backed slot so
//! repeat requests land in the same session. Resolution never fails: when the
//! request state is unusable a throwaway temporary key is handed out instead.

use std::collections::HashMap;
use std::fmt;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::security::claims::UserContext;

/// Name of the slot holding an anonymous caller's session key.
pub const ANONYMOUS_SESSION_SLOT: &str = "anonymous_session_id";

const USER_PREFIX: &str = "user_";
const ANONYMOUS_PREFIX: &str = "anon_";
const TEMPORARY_PREFIX: &str = "temp_";

/// What kind of caller a session key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Derived from an account id; stable for the life of the process.
    Authenticated,
    /// Generated for a browser without an account; purged after inactivity.
    Anonymous,
    /// One-off key issued when identity resolution failed.
    Temporary,
}

/// String key identifying one logical conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for an authenticated account.
    pub fn for_account(account_id: &str) -> Result<Self, IdentityError> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(IdentityError::EmptyAccountId);
        }
        Ok(Self(format!("{USER_PREFIX}{account_id}")))
    }

    /// Fresh anonymous key, derived from the generation time.
    #[must_use]
    pub fn new_anonymous() -> Self {
        let micros = Utc::now().timestamp_micros();
        Self(format!("{ANONYMOUS_PREFIX}{micros}_{}", Uuid::new_v4().simple()))
    }

    /// Fresh temporary key; never stored anywhere, so never reused.
    #[must_use]
    pub fn new_temporary() -> Self {
        Self(format!("{TEMPORARY_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Re-hydrate an anonymous key read back from a caller's slot.
    pub fn parse_anonymous(raw: &str) -> Result<Self, IdentityError> {
        let valid = raw
            .strip_prefix(ANONYMOUS_PREFIX)
            .is_some_and(|rest| {
                !rest.is_empty()
                    && rest
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            });
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdentityError::MalformedSlotValue(raw.to_string()))
        }
    }

    /// Classify this key.
    #[must_use]
    pub fn kind(&self) -> SessionKind {
        kind_of(&self.0)
    }

    /// Borrow the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether a raw key string denotes an anonymous session.
#[must_use]
pub fn is_anonymous_key(key: &str) -> bool {
    key.starts_with(ANONYMOUS_PREFIX)
}

/// Whether a raw key string belongs to a session that expires after inactivity.
///
/// Anonymous and temporary sessions both expire; authenticated ones do not.
#[must_use]
pub fn is_expiring_key(key: &str) -> bool {
    kind_of(key) != SessionKind::Authenticated
}

fn kind_of(key: &str) -> SessionKind {
    if is_anonymous_key(key) {
        SessionKind::Anonymous
    } else if key.starts_with(TEMPORARY_PREFIX) {
        SessionKind::Temporary
    } else {
        SessionKind::Authenticated
    }
}

/// Reasons a caller's identity could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("authenticated identity has an empty account id")]
    EmptyAccountId,

    #[error("session slot holds a malformed value: {0:?}")]
    MalformedSlotValue(String),

    #[error("session slot unavailable: {0}")]
    Slot(String),
}

/// Persistent per-caller storage able to hold one string value per name.
///
/// In the HTTP layer this is the cookie jar; tests use a plain map.
pub trait SessionSlot {
    /// Read the value stored under `name`, if any.
    fn read(&self, name: &str) -> Result<Option<String>, IdentityError>;

    /// Store `value` under `name`.
    fn write(&mut self, name: &str, value: String) -> Result<(), IdentityError>;
}

impl SessionSlot for CookieJar {
    fn read(&self, name: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.get(name).map(|cookie| cookie.value().to_string()))
    }

    fn write(&mut self, name: &str, value: String) -> Result<(), IdentityError> {
        let cookie = Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax);
        *self = self.clone().add(cookie);
        Ok(())
    }
}

impl SessionSlot for HashMap<String, String> {
    fn read(&self, name: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.get(name).cloned())
    }

    fn write(&mut self, name: &str, value: String) -> Result<(), IdentityError> {
        self.insert(name.to_string(), value);
        Ok(())
    }
}

/// Resolve the session key for one request.
///
/// Never fails; on any error a temporary key is returned and the error is
/// logged.
pub fn resolve_session_key<S>(identity: Option<&UserContext>, slot: &mut S) -> SessionKey
where
    S: SessionSlot + ?Sized,
{
    match try_resolve(identity, slot) {
        Ok(key) => key,
        Err(e) => {
            let key = SessionKey::new_temporary();
            tracing::error!(
                name: "session.identity.failed",
                error = %e,
                fallback = %key,
                "Could not resolve session identity; using a temporary key"
            );
            key
        }
    }
}

fn try_resolve<S>(identity: Option<&UserContext>, slot: &mut S) -> Result<SessionKey, IdentityError>
where
    S: SessionSlot + ?Sized,
{
    if let Some(user) = identity {
        return SessionKey::for_account(&user.user_id);
    }

    if let Some(raw) = slot.read(ANONYMOUS_SESSION_SLOT)? {
        return SessionKey::parse_anonymous(&raw);
    }

    let key = SessionKey::new_anonymous();
    slot.write(ANONYMOUS_SESSION_SLOT, key.as_str().to_string())?;
    tracing::debug!(name: "session.anonymous.created", key = %key, "Issued anonymous session key");
    Ok(key)
}
