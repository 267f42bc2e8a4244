//! Request-facing auth errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

use crate::routes::auth::login_url;
use crate::services::client::ServiceError;
use crate::services::response::ResponseError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Network or decode failure talking to the auth service.
    #[error("auth service unavailable: {0}")]
    Transport(#[from] ServiceError),

    /// The auth service reported a failure and the caller asked for `hard_fail`.
    #[error("An error occurred: {message}")]
    Validation { message: String },

    /// No usable session; the browser has to log in, then come back to `next`.
    #[error("login required")]
    LoginRequired { next: Option<String> },

    /// The auth service declared the token `INVALID`.
    #[error("Invalid token. Please log in again.")]
    ForcedInvalid,

    #[error(
        "You do not have permission to access this resource. Level required: {required}. Your role: {actual}"
    )]
    Forbidden { required: i64, actual: String, redirect_to: Option<String> },

    #[error("malformed session expiry {value:?}: {reason}")]
    MalformedExpiry { value: String, reason: String },

    #[error(
        "The {field} cannot be set directly. Use AuthService Admin API to set the {field}. This incident has been reported."
    )]
    ReadOnlyProfile { field: String },
}

impl AuthError {
    /// Role check failure for a user whose level is `actual`.
    #[must_use]
    pub fn forbidden(required: i64, actual: Option<i64>, redirect_to: Option<String>) -> Self {
        let actual = actual.map_or_else(|| "None".to_owned(), |role| role.to_string());
        Self::Forbidden { required, actual, redirect_to }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Transport(_) | Self::Validation { .. } => StatusCode::BAD_GATEWAY,
            Self::LoginRequired { .. } => StatusCode::TEMPORARY_REDIRECT,
            Self::ForcedInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden { redirect_to: Some(_), .. } => StatusCode::TEMPORARY_REDIRECT,
            Self::Forbidden { .. } | Self::ReadOnlyProfile { .. } => StatusCode::FORBIDDEN,
            Self::MalformedExpiry { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ResponseError> for AuthError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Invalid => Self::ForcedInvalid,
            ResponseError::Failed { message, .. } => Self::Validation { message },
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::LoginRequired { next } => Redirect::temporary(&login_url(next.as_deref())).into_response(),
            Self::Forbidden { redirect_to: Some(target), .. } => Redirect::temporary(&target).into_response(),
            Self::MalformedExpiry { .. } => {
                tracing::error!(error = %self, "session expiry could not be parsed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Session expiry is malformed.").into_response()
            }
            Self::Transport(_) | Self::Validation { .. } => {
                tracing::error!(error = %self, "auth service failure");
                (self.status(), "Auth service unavailable.").into_response()
            }
            other => (other.status(), other.to_string()).into_response(),
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
