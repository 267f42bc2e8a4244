//! Auth routes: login redirect, auth service callback, logout.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::guard::CurrentUser;
use crate::error::AuthError;
use crate::services::response::{ServiceResponse, StatusMachine};
use crate::session::{Session, token_fingerprint};
use crate::state::AppState;

pub const LOGIN_PATH: &str = "/login";
pub const CALLBACK_PATH: &str = "/auth_callback";
pub const LOGOUT_PATH: &str = "/logout";
pub const SECURED_PATH: &str = "/secured_route";

/// `/login`, with the URL to return to as `next` when given.
#[must_use]
pub fn login_url(next: Option<&str>) -> String {
    match next {
        Some(next) if !next.is_empty() => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("next", next)
                .finish();
            format!("{LOGIN_PATH}?{query}")
        }
        _ => LOGIN_PATH.to_owned(),
    }
}

/// Only same-site paths are followed after login.
pub(crate) fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

/// `GET /login`: remember `next`, send the browser to the auth service.
pub async fn login(State(state): State<AppState>, session: Session, Query(params): Query<LoginQuery>) -> Redirect {
    let next = params.next.filter(|n| !n.is_empty());
    session.update(|r| r.next = next);
    Redirect::temporary(&state.config.authorize_url())
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    token: Option<String>,
}

/// `/verify` with `hard_fail`; only an `OK` status is accepted.
async fn verify_callback_token(state: &AppState, token: &str) -> Result<ServiceResponse, AuthError> {
    let raw = state.service.verify(token).await?;
    let verified = ServiceResponse::validate(raw, true)?;
    if verified.status() != StatusMachine::Ok {
        return Err(AuthError::Validation { message: format!("unexpected status {}", verified.status()) });
    }
    Ok(verified)
}

fn invalid_token() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid token").into_response()
}

/// `GET /auth_callback?token=`: verify the token, store it, return to `next`.
pub async fn auth_callback(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<CallbackQuery>,
) -> Response {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        return invalid_token();
    };

    let verified = match verify_callback_token(&state, &token).await {
        Ok(verified) => verified,
        Err(e) => {
            warn!(error = %e, token = %token_fingerprint(&token), "callback token rejected");
            return invalid_token();
        }
    };
    state.verifier.reinstate(&token);

    let expiry = verified.expiry().map(str::to_owned);
    if expiry.is_none() {
        warn!(token = %token_fingerprint(&token), "verify reply carried no expiry; session will not authenticate");
    }
    info!(token = %token_fingerprint(&token), "login completed");

    let next = session.update(|r| {
        r.token = Some(token);
        r.expiry = expiry;
        r.logged_in = Some(true);
        r.next.take()
    });
    let target = next
        .filter(|n| is_local_path(n))
        .unwrap_or_else(|| "/".to_owned());
    Redirect::temporary(&target).into_response()
}

/// `GET /logout`: end the session here and, best effort, at the auth service.
pub async fn logout(State(state): State<AppState>, session: Session) -> Redirect {
    let token = session.snapshot().token().map(str::to_owned);
    if let Some(token) = token {
        match state.service.logout(&token).await {
            Ok(raw) if !(200..300).contains(&raw.status) => {
                warn!(status = raw.status, "auth service logout failed");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "error logging out"),
        }
        state.verifier.cancel(&token);
        info!(token = %token_fingerprint(&token), "logged out");
    }

    session.update(|r| {
        r.clear();
        r.logged_in = Some(false);
    });
    Redirect::temporary("/")
}

/// `GET /secured_route`: demo page behind `login_required`.
pub async fn secured_route(current: CurrentUser) -> String {
    format!("Hello, {}!", current.username().unwrap_or("user"))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
