//! Auth service reply validation.
//!
//! DESIGN
//! ======
//! Every reply is funneled through [`ServiceResponse::validate`]. Outcomes
//! are returned as values the caller has to act on:
//! - `INVALID` is always an error ([`ResponseError::Invalid`]), whatever
//!   `hard_fail` says. Callers clear the session token and answer 401.
//! - `TOKEN_EXPIRED` succeeds but carries [`AuthSignal::LoginRequired`].
//! - A non-200 status with a non-`OK` status is an error under `hard_fail`,
//!   otherwise it is logged and the reply is marked degraded.

use std::fmt;

use serde_json::Value;
use tracing::error;

use super::client::RawResponse;
use super::profile::{LongToken, Profile};

pub const DEFAULT_MESSAGE: &str = "An error occurred.";

/// The auth service's `status_machine` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMachine {
    Ok,
    TokenExpired,
    Invalid,
    /// Anything else, including a missing field.
    Error,
}

impl StatusMachine {
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("OK") => Self::Ok,
            Some("TOKEN_EXPIRED") => Self::TokenExpired,
            Some("INVALID") => Self::Invalid,
            _ => Self::Error,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::Invalid => "INVALID",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for StatusMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up a caller is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSignal {
    /// The user should be sent through the login flow again.
    LoginRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("Invalid token. Please log in again.")]
    Invalid,
    #[error("An error occurred: {message}")]
    Failed { status_code: u16, message: String },
}

/// One validated auth service reply.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    status_code: u16,
    body: Value,
    status: StatusMachine,
    message: String,
    signal: Option<AuthSignal>,
    degraded: bool,
}

impl ServiceResponse {
    /// Validate a raw reply.
    ///
    /// # Errors
    ///
    /// [`ResponseError::Invalid`] for an `INVALID` status, and
    /// [`ResponseError::Failed`] for a failed reply when `hard_fail` is set.
    pub fn validate(raw: RawResponse, hard_fail: bool) -> Result<Self, ResponseError> {
        let status = StatusMachine::parse(raw.body.get("status_machine").and_then(Value::as_str));
        let message = raw
            .body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MESSAGE)
            .to_owned();

        if status == StatusMachine::Invalid {
            return Err(ResponseError::Invalid);
        }

        let signal = (status == StatusMachine::TokenExpired).then_some(AuthSignal::LoginRequired);

        let mut degraded = false;
        if raw.status != 200 && status != StatusMachine::Ok {
            if hard_fail {
                return Err(ResponseError::Failed { status_code: raw.status, message });
            }
            error!(status_code = raw.status, status = %status, message = %message, "auth service reported an error");
            degraded = true;
        }

        Ok(Self { status_code: raw.status, body: raw.body, status, message, signal, degraded })
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    #[must_use]
    pub fn status(&self) -> StatusMachine {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn json(&self) -> &Value {
        &self.body
    }

    #[must_use]
    pub fn signal(&self) -> Option<AuthSignal> {
        self.signal
    }

    /// True when the reply failed but validation ran without `hard_fail`.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// The `user_info` object, unless the reply is degraded or lacks one.
    #[must_use]
    pub fn user_info(&self) -> Option<Profile> {
        if self.degraded {
            return None;
        }
        let info = self.body.get("user_info")?;
        match serde_json::from_value::<Profile>(info.clone()) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(error = %e, "user_info has an unexpected shape");
                None
            }
        }
    }

    /// The `expiry` string, as it should be stored in the session.
    #[must_use]
    pub fn expiry(&self) -> Option<&str> {
        self.body
            .get("expiry")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
    }

    #[must_use]
    pub fn long_token(&self) -> Option<LongToken> {
        if self.degraded {
            return None;
        }
        LongToken::from_json(&self.body)
    }
}

impl fmt::Display for ServiceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body)
    }
}

#[cfg(test)]
#[path = "response_test.rs"]
mod tests;
