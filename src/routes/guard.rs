//! Session layer, current-user extractor and route guards.
//!
//! DESIGN
//! ======
//! `session_layer` wraps the whole router. It loads the session cookie into
//! a [`RequestAuth`] stored in the request extensions and re-issues the
//! cookie if anything wrote to the session. The auth state is derived
//! lazily, on the first [`CurrentUser`] extraction, and memoized for the
//! rest of the request so guards and handlers share one instance.
//!
//! Guards are plain `from_fn_with_state` middleware:
//!
//! ```ignore
//! Router::new()
//!     .route("/reports", get(reports))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), login_required))
//! ```

use std::ops::Deref;
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, OriginalUri, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::PrivateCookieJar;
use tokio::sync::OnceCell;

use crate::error::AuthError;
use crate::services::user::AuthState;
use crate::session::{Session, SessionRecord};
use crate::state::AppState;

// =============================================================================
// REQUEST CONTEXT
// =============================================================================

/// Per-request auth context placed in the request extensions by [`session_layer`].
pub struct RequestAuth {
    session: Session,
    current: OnceCell<Arc<AuthState>>,
}

impl RequestAuth {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self { session, current: OnceCell::new() }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The request's auth state, derived on first use.
    ///
    /// # Errors
    ///
    /// Propagates [`AuthState::derive`] errors. A failed derivation is not
    /// cached.
    pub async fn current(&self, state: &AppState) -> Result<Arc<AuthState>, AuthError> {
        self.current
            .get_or_try_init(|| async { AuthState::derive(state, &self.session).await.map(Arc::new) })
            .await
            .cloned()
    }
}

fn request_auth(parts: &Parts) -> Result<Arc<RequestAuth>, Response> {
    parts
        .extensions
        .get::<Arc<RequestAuth>>()
        .cloned()
        .ok_or_else(|| {
            tracing::error!("session layer missing; wrap the router with routes::install");
            (StatusCode::INTERNAL_SERVER_ERROR, "session layer not installed").into_response()
        })
}

/// Load the session cookie, run the request, persist the session if modified.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = Arc::new(RequestAuth::new(Session::new(SessionRecord::from_jar(&jar))));
    request.extensions_mut().insert(ctx.clone());

    let response = next.run(request).await;

    if !ctx.session.is_modified() {
        return response;
    }
    let cookie = ctx
        .session
        .snapshot()
        .to_cookie(state.config.cookie_secure);
    (jar.add(cookie), response).into_response()
}

// =============================================================================
// EXTRACTORS
// =============================================================================

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(request_auth(parts)?.session.clone())
    }
}

/// The current user. Use as a handler parameter; it never rejects for a
/// logged-out caller, check [`AuthState::is_authenticated`] or put a guard
/// in front.
#[derive(Clone)]
pub struct CurrentUser(pub Arc<AuthState>);

impl Deref for CurrentUser {
    type Target = AuthState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = request_auth(parts)?;
        let app_state = AppState::from_ref(state);
        let current = ctx
            .current(&app_state)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(Self(current))
    }
}

// =============================================================================
// GUARDS
// =============================================================================

/// Path and query of the URL the browser originally asked for.
fn original_target(request: &Request) -> String {
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri(), |original| &original.0);
    uri.path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned())
}

/// Redirect logged-out callers to `/login?next=<original>`.
pub async fn login_required(current: CurrentUser, request: Request, next: Next) -> Response {
    if !current.is_authenticated() {
        return AuthError::LoginRequired { next: Some(original_target(&request)) }.into_response();
    }
    next.run(request).await
}

/// Minimum role for a route, and where to send callers who lack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRequirement {
    pub min_role: i64,
    /// Redirect target instead of a 403.
    pub redirect_to: Option<String>,
}

impl RoleRequirement {
    #[must_use]
    pub fn new(min_role: i64) -> Self {
        Self { min_role, redirect_to: None }
    }

    #[must_use]
    pub fn or_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    /// Check `user` against this requirement. `target` is the URL to come
    /// back to after logging in.
    ///
    /// # Errors
    ///
    /// [`AuthError::LoginRequired`] for a logged-out user and
    /// [`AuthError::Forbidden`] for an insufficient or unknown role.
    pub fn check(&self, user: &AuthState, target: &str) -> Result<(), AuthError> {
        if !user.is_authenticated() {
            return Err(AuthError::LoginRequired { next: Some(target.to_owned()) });
        }
        match user.role() {
            Some(role) if role >= self.min_role => Ok(()),
            actual => {
                tracing::debug!(required = self.min_role, ?actual, "role check failed");
                Err(AuthError::forbidden(self.min_role, actual, self.redirect_to.clone()))
            }
        }
    }
}

/// Middleware state for [`role_required`].
#[derive(Clone)]
pub struct RoleGuard {
    pub app: AppState,
    pub requirement: RoleRequirement,
}

impl RoleGuard {
    #[must_use]
    pub fn new(app: AppState, requirement: RoleRequirement) -> Self {
        Self { app, requirement }
    }
}

impl FromRef<RoleGuard> for AppState {
    fn from_ref(guard: &RoleGuard) -> Self {
        guard.app.clone()
    }
}

/// Allow only callers whose role is at least the guard's minimum.
pub async fn role_required(
    State(guard): State<RoleGuard>,
    current: CurrentUser,
    request: Request,
    next: Next,
) -> Response {
    let target = original_target(&request);
    match guard.requirement.check(&current, &target) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
