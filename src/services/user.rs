//! Per-request authentication state derived from the session.
//!
//! DESIGN
//! ======
//! [`AuthState::derive`] reads the session record once per request and
//! decides whether the caller is authenticated:
//! - no token, no expiry, an expiry in the past, or a token the verifier
//!   revoked: not authenticated, with [`AuthSignal::LoginRequired`];
//! - otherwise authenticated: the profile is fetched from the auth service
//!   and the token is handed to the verification registry.
//!
//! ERROR HANDLING
//! ==============
//! Profile fetch failures degrade to "no profile" and never flip
//! `authenticated`. An unparsable expiry and an `INVALID` reply are the
//! only errors that escape; the latter clears the session token first.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

use super::client::AuthService;
use super::profile::{LongToken, Profile};
use super::response::{AuthSignal, ResponseError, ServiceResponse};
use crate::error::AuthError;
use crate::session::{Session, parse_expiry, token_fingerprint};
use crate::state::AppState;

/// Authentication state of the current request (the "current user").
pub struct AuthState {
    token: Option<String>,
    expiry: Option<OffsetDateTime>,
    authenticated: bool,
    logged_in: bool,
    profile: Option<Profile>,
    login_advised: bool,
    signal: Option<AuthSignal>,
    service: Arc<dyn AuthService>,
}

/// Serializable view of the current user for templates and JSON responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserView {
    pub authenticated: bool,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<i64>,
    pub permissions: Option<Value>,
}

impl AuthState {
    /// A logged-out state that never talks to the auth service.
    #[must_use]
    pub fn anonymous(service: Arc<dyn AuthService>) -> Self {
        Self {
            token: None,
            expiry: None,
            authenticated: false,
            logged_in: false,
            profile: None,
            login_advised: false,
            signal: Some(AuthSignal::LoginRequired),
            service,
        }
    }

    /// Derive the state from `session`, fetching the profile when the
    /// session holds a live token.
    ///
    /// # Errors
    ///
    /// [`AuthError::MalformedExpiry`] when the stored expiry cannot be parsed,
    /// and [`AuthError::ForcedInvalid`] when the auth service declares the
    /// token `INVALID` (the session token is removed before returning).
    pub async fn derive(state: &AppState, session: &Session) -> Result<Self, AuthError> {
        let record = session.snapshot();
        if record.logged_in.is_none() {
            session.update(|r| r.logged_in = Some(false));
        }
        let mut auth = Self::anonymous(state.service.clone());
        auth.logged_in = record.logged_in.unwrap_or(false);

        let Some(token) = record.token() else {
            debug!("no session token");
            return Ok(auth);
        };
        auth.token = Some(token.to_owned());

        let Some(raw_expiry) = record.expiry.as_deref() else {
            debug!(token = %token_fingerprint(token), "session token has no expiry");
            return Ok(auth);
        };
        let expiry = parse_expiry(raw_expiry)?;
        auth.expiry = Some(expiry);

        if expiry < OffsetDateTime::now_utc() {
            debug!(token = %token_fingerprint(token), "session token expired");
            auth.expire(session);
            return Ok(auth);
        }
        if state.verifier.is_revoked(token) {
            debug!(token = %token_fingerprint(token), "session token revoked");
            auth.expire(session);
            return Ok(auth);
        }

        auth.authenticated = true;
        auth.signal = None;
        auth.fetch_profile(session).await?;
        state.verifier.watch(token, expiry, state.service.clone());
        Ok(auth)
    }

    fn expire(&mut self, session: &Session) {
        self.authenticated = false;
        self.logged_in = false;
        self.profile = None;
        session.update(|r| r.logged_in = Some(false));
    }

    async fn fetch_profile(&mut self, session: &Session) -> Result<(), AuthError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(());
        };

        let raw = match self.service.user_info(token).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "failed to retrieve user info");
                self.profile = None;
                return Ok(());
            }
        };

        match ServiceResponse::validate(raw, false) {
            Ok(response) => {
                if response.signal() == Some(AuthSignal::LoginRequired) {
                    self.login_advised = true;
                }
                self.profile = response.user_info();
                Ok(())
            }
            Err(ResponseError::Invalid) => {
                warn!(token = %token_fingerprint(token), "auth service declared token invalid; clearing session");
                session.update(|r| r.token = None);
                self.token = None;
                self.authenticated = false;
                self.profile = None;
                Err(AuthError::ForcedInvalid)
            }
            Err(e) => {
                error!(error = %e, "user info rejected");
                self.profile = None;
                Ok(())
            }
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Whether the token was live when this state was derived.
    #[must_use]
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    /// Authenticated and marked logged in by the callback.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.logged_in && self.authenticated
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn expiry(&self) -> Option<OffsetDateTime> {
        self.expiry
    }

    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.profile.as_ref()?.username.as_deref()
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.profile.as_ref()?.email.as_deref()
    }

    #[must_use]
    pub fn role(&self) -> Option<i64> {
        self.profile.as_ref()?.role_level()
    }

    #[must_use]
    pub fn permissions(&self) -> Option<&Value> {
        self.profile.as_ref()?.permissions.as_ref()
    }

    /// The profile fetch reported `TOKEN_EXPIRED`. Advisory only.
    #[must_use]
    pub fn login_advised(&self) -> bool {
        self.login_advised
    }

    /// Follow-up the caller should act on, if any.
    #[must_use]
    pub fn signal(&self) -> Option<AuthSignal> {
        self.signal
    }

    #[must_use]
    pub fn view(&self) -> UserView {
        UserView {
            authenticated: self.is_authenticated(),
            username: self.username().map(str::to_owned),
            email: self.email().map(str::to_owned),
            role: self.role(),
            permissions: self.permissions().cloned(),
        }
    }

    // =========================================================================
    // AUTH SERVICE CALLS
    // =========================================================================

    /// Request a long-lived token. The auth service does not implement this
    /// yet, so expect `None`.
    pub async fn long_token(&self) -> Option<LongToken> {
        warn!("long tokens are not yet implemented on the auth service");
        let token = self.token.as_deref()?;
        let raw = match self.service.long_token(token).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "failed to retrieve long token");
                return None;
            }
        };
        match ServiceResponse::validate(raw, false) {
            Ok(response) => response.long_token(),
            Err(e) => {
                error!(error = %e, "long token rejected");
                None
            }
        }
    }

    /// Profile fields are owned by the auth service. An attempt to change
    /// one is reported as an incident and refused.
    ///
    /// # Errors
    ///
    /// Always fails: [`AuthError::ReadOnlyProfile`] after reporting, or
    /// [`AuthError::LoginRequired`] when there is no token to report with.
    pub async fn request_profile_change(&self, field: &str, value: Value) -> Result<(), AuthError> {
        let Some(token) = self.token.as_deref() else {
            return Err(AuthError::LoginRequired { next: None });
        };
        let tried_to = format!("set {field}");
        if let Err(e) = self.service.report_incident(token, &tried_to, value).await {
            error!(error = %e, field, "failed to report profile change attempt");
        }
        warn!(field, "profile fields cannot be set directly; incident reported");
        Err(AuthError::ReadOnlyProfile { field: field.to_owned() })
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: Option<String>| value.unwrap_or_else(|| "None".to_owned());
        write!(
            f,
            "User(username={}, email={}, role={}, permissions={})",
            show(self.username().map(str::to_owned)),
            show(self.email().map(str::to_owned)),
            show(self.role().map(|r| r.to_string())),
            show(self.permissions().map(ToString::to_string)),
        )
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("token", &self.token.as_deref().map(token_fingerprint))
            .field("expiry", &self.expiry)
            .field("authenticated", &self.authenticated)
            .field("logged_in", &self.logged_in)
            .field("profile", &self.profile)
            .field("login_advised", &self.login_advised)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "user_test.rs"]
mod tests;
