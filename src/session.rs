//! Cookie-backed session record.
//!
//! ARCHITECTURE
//! ============
//! The whole session lives in one private (encrypted + authenticated)
//! cookie holding a JSON [`SessionRecord`]. The session layer loads it at
//! request start and hands handlers a shared [`Session`] handle. Writes mark
//! the handle modified and the layer re-issues the cookie on the way out.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::AuthError;

pub const SESSION_COOKIE: &str = "lac_session";

/// `%a, %d %b %Y %H:%M:%S` without the trailing zone name.
const EXPIRY_STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second]");

// =============================================================================
// SESSION RECORD
// =============================================================================

/// Fields persisted in the session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Token expiry as sent by the auth service, `"%a, %d %b %Y %H:%M:%S %Z"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in: Option<bool>,
    /// Where to send the browser after the login round trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl SessionRecord {
    /// Read the record from the session cookie. A missing or undecodable
    /// cookie yields an empty record.
    #[must_use]
    pub fn from_jar(jar: &PrivateCookieJar) -> Self {
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Self::default();
        };
        serde_json::from_str(cookie.value()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding undecodable session cookie");
            Self::default()
        })
    }

    /// Build the cookie carrying this record. A parsable expiry makes the
    /// cookie persistent until then; otherwise it lasts for the browser session.
    #[must_use]
    pub fn to_cookie(&self, secure: bool) -> Cookie<'static> {
        let value = serde_json::to_string(self).unwrap_or_default();
        let mut cookie = Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(secure)
            .build();
        if let Some(expiry) = self.expiry.as_deref().and_then(|raw| parse_expiry(raw).ok()) {
            cookie.set_expires(expiry);
        }
        cookie
    }

    /// The token, if present and non-empty.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// SESSION HANDLE
// =============================================================================

#[derive(Debug, Default)]
struct SessionInner {
    record: SessionRecord,
    modified: bool,
}

/// Request-scoped handle on the session record, shared between the session
/// layer, extractors and handlers.
#[derive(Debug, Clone, Default)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    #[must_use]
    pub fn new(record: SessionRecord) -> Self {
        Self { inner: Arc::new(Mutex::new(SessionInner { record, modified: false })) }
    }

    /// Copy of the current record.
    #[must_use]
    pub fn snapshot(&self) -> SessionRecord {
        self.lock().record.clone()
    }

    /// Mutate the record and mark the session modified.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionRecord) -> R) -> R {
        let mut inner = self.lock();
        inner.modified = true;
        f(&mut inner.record)
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// EXPIRY FORMAT
// =============================================================================

/// Parse an expiry such as `"Tue, 15 Nov 1994 08:12:31 GMT"`.
///
/// Only the `GMT` and `UTC` zone names are accepted; both mean UTC.
///
/// # Errors
///
/// Returns [`AuthError::MalformedExpiry`] when `raw` does not match the format.
pub fn parse_expiry(raw: &str) -> Result<OffsetDateTime, AuthError> {
    let malformed = |reason: String| AuthError::MalformedExpiry { value: raw.to_owned(), reason };

    let (stamp, zone) = raw
        .trim()
        .rsplit_once(' ')
        .ok_or_else(|| malformed("missing time zone".into()))?;
    if !matches!(zone, "GMT" | "UTC") {
        return Err(malformed(format!("unsupported time zone '{zone}'")));
    }

    let parsed = PrimitiveDateTime::parse(stamp, EXPIRY_STAMP_FORMAT).map_err(|e| malformed(e.to_string()))?;
    Ok(parsed.assume_utc())
}

/// Format `at` the way the auth service sends expiries, always in GMT.
///
/// # Errors
///
/// Returns [`AuthError::MalformedExpiry`] if `at` cannot be rendered (year
/// outside four digits).
pub fn format_expiry(at: OffsetDateTime) -> Result<String, AuthError> {
    let utc = at.to_offset(UtcOffset::UTC);
    let malformed = |reason: String| AuthError::MalformedExpiry { value: utc.to_string(), reason };
    let stamp = utc.format(EXPIRY_STAMP_FORMAT).map_err(|e| malformed(e.to_string()))?;
    Ok(format!("{stamp} GMT"))
}

// =============================================================================
// LOGGING
// =============================================================================

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Short stable fingerprint of a token, safe to put in logs.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    bytes_to_hex(&digest[..4])
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
