//! Auth service HTTP client.
//!
//! DESIGN
//! ======
//! Every auth service call is a JSON `POST` whose reply carries a
//! `status_machine` field. The transport layer only moves bytes: it returns
//! the HTTP status and decoded JSON body untouched and leaves interpretation
//! to [`super::response::ServiceResponse`]. Non-2xx statuses are NOT
//! transport failures, so `INVALID` replies still reach validation.
//!
//! `AuthService` is the seam for tests: production uses [`HttpAuthService`],
//! tests script replies per endpoint.

use std::time::Duration;

use serde_json::{Value, json};

use crate::config::{AuthConfig, ServiceTimeouts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Verify,
    UserInfo,
    LongToken,
    Logout,
    ReportIncident,
}

impl Endpoint {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Verify => "/verify",
            Self::UserInfo => "/user_info",
            Self::LongToken => "/long_token",
            Self::Logout => "/logout",
            Self::ReportIncident => "/report_incident",
        }
    }
}

/// Status and JSON body of one auth service reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

/// Transport-level failures talking to the auth service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("auth service request failed: {0}")]
    Request(String),
    #[error("auth service returned a non-JSON body (status {status})")]
    Decode { status: u16 },
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Post `payload` to `endpoint` and return the raw reply.
    async fn post(&self, endpoint: Endpoint, payload: Value) -> Result<RawResponse, ServiceError>;

    async fn verify(&self, token: &str) -> Result<RawResponse, ServiceError> {
        self.post(Endpoint::Verify, json!({ "token": token })).await
    }

    async fn user_info(&self, token: &str) -> Result<RawResponse, ServiceError> {
        self.post(Endpoint::UserInfo, json!({ "token": token })).await
    }

    /// Not yet implemented on the auth service side.
    async fn long_token(&self, token: &str) -> Result<RawResponse, ServiceError> {
        self.post(Endpoint::LongToken, json!({ "token": token })).await
    }

    async fn logout(&self, token: &str) -> Result<RawResponse, ServiceError> {
        self.post(Endpoint::Logout, json!({ "token": token })).await
    }

    async fn report_incident(&self, token: &str, tried_to: &str, value: Value) -> Result<RawResponse, ServiceError> {
        self.post(Endpoint::ReportIncident, json!({ "token": token, "tried_to": tried_to, "value": value }))
            .await
    }
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

pub struct HttpAuthService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthService {
    /// Build a client for the auth service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeouts: ServiceTimeouts) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| ServiceError::ClientBuild(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, base_url })
    }

    /// Build a client from the service URL and timeouts in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ServiceError> {
        Self::new(config.service_url.clone(), config.timeouts)
    }

    #[must_use]
    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

#[async_trait::async_trait]
impl AuthService for HttpAuthService {
    async fn post(&self, endpoint: Endpoint, payload: Value) -> Result<RawResponse, ServiceError> {
        let response = self
            .http
            .post(self.url(endpoint))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        let body = serde_json::from_str(&text).map_err(|_| ServiceError::Decode { status })?;
        tracing::debug!(endpoint = endpoint.path(), status, "auth service replied");
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
