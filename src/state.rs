//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the auth config, the auth service client, the token
//! verification registry and the key that encrypts session cookies.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::config::AuthConfig;
use crate::services::client::{AuthService, HttpAuthService, ServiceError};
use crate::services::verify::VerificationRegistry;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum: all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub service: Arc<dyn AuthService>,
    pub verifier: VerificationRegistry,
    cookie_key: Key,
}

impl AppState {
    #[must_use]
    pub fn new(config: AuthConfig, service: Arc<dyn AuthService>) -> Self {
        let cookie_key = match config.session_secret.as_deref() {
            Some(secret) => derive_key(secret),
            None => {
                tracing::warn!("SESSION_SECRET not set; sessions will not survive a restart");
                Key::generate()
            }
        };
        let verifier = VerificationRegistry::new(config.verify_interval);
        Self { config: Arc::new(config), service, verifier, cookie_key }
    }

    /// Build state talking to the real auth service over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: AuthConfig) -> Result<Self, ServiceError> {
        let service = HttpAuthService::from_config(&config)?;
        Ok(Self::new(config, Arc::new(service)))
    }

    #[must_use]
    pub fn cookie_key(&self) -> Key {
        self.cookie_key.clone()
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Stretch an arbitrary secret to the 64 bytes a cookie key needs.
pub(crate) fn derive_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(&digest[..])
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::{HeaderMap, HeaderValue};
    use axum::response::{IntoResponse, Response};
    use axum_extra::extract::cookie::PrivateCookieJar;
    use serde_json::Value;

    use super::*;
    use crate::services::client::{Endpoint, RawResponse};
    use crate::session::{SESSION_COOKIE, SessionRecord};

    type Scripted = Result<RawResponse, String>;

    /// Scripted auth service. Replies are queued per endpoint; the last one
    /// is repeated once the queue drains.
    #[derive(Default)]
    pub struct MockService {
        replies: Mutex<HashMap<Endpoint, VecDeque<Scripted>>>,
        calls: Mutex<Vec<(Endpoint, Value)>>,
    }

    impl MockService {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn reply(self, endpoint: Endpoint, status: u16, body: Value) -> Self {
            self.push(endpoint, Ok(RawResponse::new(status, body)))
        }

        #[must_use]
        pub fn fail(self, endpoint: Endpoint) -> Self {
            self.push(endpoint, Err("connection refused".into()))
        }

        fn push(self, endpoint: Endpoint, reply: Scripted) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(endpoint)
                .or_default()
                .push_back(reply);
            self
        }

        pub fn calls(&self, endpoint: Endpoint) -> usize {
            self.payloads(endpoint).len()
        }

        pub fn payloads(&self, endpoint: Endpoint) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(e, _)| *e == endpoint)
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl AuthService for MockService {
        async fn post(&self, endpoint: Endpoint, payload: Value) -> Result<RawResponse, ServiceError> {
            self.calls.lock().unwrap().push((endpoint, payload));
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.entry(endpoint).or_default();
            let scripted = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            match scripted {
                Some(Ok(raw)) => Ok(raw),
                Some(Err(msg)) => Err(ServiceError::Request(msg)),
                None => Err(ServiceError::Request(format!("no scripted reply for {}", endpoint.path()))),
            }
        }
    }

    /// Config pointing at a fake service, with a fixed session secret.
    #[must_use]
    pub fn test_config() -> AuthConfig {
        AuthConfig::new("https://auth.test", "test-app")
            .expect("test config is valid")
            .with_session_secret("test-secret")
    }

    #[must_use]
    pub fn test_app_state(service: Arc<MockService>) -> AppState {
        AppState::new(test_config(), service)
    }

    /// `name=value` pair of the session cookie carrying `record`, ready for
    /// a `Cookie` request header.
    #[must_use]
    pub fn session_cookie(state: &AppState, record: &SessionRecord) -> String {
        let jar = PrivateCookieJar::new(state.cookie_key()).add(record.to_cookie(false));
        let response = (jar, ()).into_response();
        set_cookie_pair(&response).expect("jar emits the session cookie")
    }

    /// `name=value` pair of the session cookie a response sets, if any.
    #[must_use]
    pub fn set_cookie_pair(response: &Response) -> Option<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|pair| pair.starts_with(&format!("{SESSION_COOKIE}=")))
            .map(str::to_owned)
    }

    /// Decrypt the session record a response sets, if any.
    #[must_use]
    pub fn response_session(state: &AppState, response: &Response) -> Option<SessionRecord> {
        let pair = set_cookie_pair(response)?;
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&pair).ok()?);
        let jar = PrivateCookieJar::from_headers(&headers, state.cookie_key());
        jar.get(SESSION_COOKIE)?;
        Some(SessionRecord::from_jar(&jar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_key_is_deterministic() {
        assert_eq!(derive_key("s3cret").master(), derive_key("s3cret").master());
        assert_ne!(derive_key("s3cret").master(), derive_key("other").master());
    }

    #[test]
    fn state_uses_configured_interval() {
        let state = test_helpers::test_app_state(Arc::new(test_helpers::MockService::new()));
        assert_eq!(state.verifier.interval(), state.config.verify_interval);
        assert_eq!(state.verifier.active_count(), 0);
    }
}
