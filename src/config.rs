//! Auth configuration, built in code or parsed from environment variables.

use std::fmt;
use std::time::Duration;

pub const DEFAULT_AUTH_SERVICE_URL: &str = "https://auth.luova.club";
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";
pub const DEFAULT_VERIFY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("App ID is required.")]
    MissingAppId,
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Everything the auth layer needs to talk to the auth service and to
/// issue session cookies.
#[derive(Clone)]
pub struct AuthConfig {
    /// Base URL of the auth service, without a trailing slash.
    pub service_url: String,
    /// Application identifier registered with the auth service.
    pub app_id: String,
    /// Externally reachable base URL of this app; the callback URL is derived from it.
    pub public_url: String,
    /// Secret the session cookie key is derived from. A random key is used when absent.
    pub session_secret: Option<String>,
    /// Delay between background token re-verifications.
    pub verify_interval: Duration,
    pub timeouts: ServiceTimeouts,
    /// Mount the demo `/secured_route`.
    pub secured_route: bool,
    /// Mark the session cookie `Secure`.
    pub cookie_secure: bool,
    pub debug: bool,
}

impl AuthConfig {
    /// Build a config for `service_url` and `app_id` with defaults for the rest.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingAppId`] when `app_id` is blank, or
    /// [`ConfigError::Invalid`] when `service_url` is not an absolute URL.
    pub fn new(service_url: impl Into<String>, app_id: impl Into<String>) -> Result<Self, ConfigError> {
        let app_id = app_id.into().trim().to_owned();
        if app_id.is_empty() {
            return Err(ConfigError::MissingAppId);
        }
        let service_url = normalize_url("AUTH_SERVICE_URL", &service_url.into())?;
        Ok(Self {
            service_url,
            app_id,
            public_url: DEFAULT_PUBLIC_URL.to_owned(),
            session_secret: None,
            verify_interval: Duration::from_secs(DEFAULT_VERIFY_INTERVAL_SECS),
            timeouts: ServiceTimeouts::default(),
            secured_route: false,
            cookie_secure: false,
            debug: false,
        })
    }

    /// Build typed auth config from environment variables.
    ///
    /// Required:
    /// - `AUTH_APP_ID`
    ///
    /// Optional:
    /// - `AUTH_SERVICE_URL`: default `https://auth.luova.club`
    /// - `PUBLIC_URL`: default `http://localhost:3000`
    /// - `SESSION_SECRET`: random per-process key when unset
    /// - `AUTH_VERIFY_INTERVAL_SECS`: default 300
    /// - `AUTH_REQUEST_TIMEOUT_SECS`: default 10
    /// - `AUTH_CONNECT_TIMEOUT_SECS`: default 5
    /// - `AUTH_SECURED_ROUTE`: default false
    /// - `COOKIE_SECURE`: inferred from the `PUBLIC_URL` scheme
    /// - `DEBUG`: default false
    ///
    /// # Errors
    ///
    /// Returns an error if the app ID is missing or a URL is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_url = std::env::var("AUTH_SERVICE_URL").unwrap_or_else(|_| DEFAULT_AUTH_SERVICE_URL.to_owned());
        let app_id = std::env::var("AUTH_APP_ID").unwrap_or_default();
        let mut config = Self::new(service_url, app_id)?;

        if let Ok(public_url) = std::env::var("PUBLIC_URL") {
            config = config.with_public_url(&public_url)?;
        }
        config.session_secret = std::env::var("SESSION_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty());

        let verify_secs = env_parse("AUTH_VERIFY_INTERVAL_SECS", DEFAULT_VERIFY_INTERVAL_SECS);
        config.verify_interval = Duration::from_secs(if verify_secs == 0 { DEFAULT_VERIFY_INTERVAL_SECS } else { verify_secs });
        config.timeouts = ServiceTimeouts {
            request_secs: env_parse("AUTH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("AUTH_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        config.secured_route = env_bool("AUTH_SECURED_ROUTE").unwrap_or(false);
        config.cookie_secure = env_bool("COOKIE_SECURE").unwrap_or_else(|| config.public_url.starts_with("https://"));
        config.debug = debug_enabled();
        Ok(config)
    }

    /// Replace the public base URL used to build the callback URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `public_url` is not an absolute URL.
    pub fn with_public_url(mut self, public_url: &str) -> Result<Self, ConfigError> {
        self.public_url = normalize_url("PUBLIC_URL", public_url)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_session_secret(mut self, secret: impl Into<String>) -> Self {
        self.session_secret = Some(secret.into());
        self
    }

    /// Replace the re-verification interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero interval.
    pub fn with_verify_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Invalid { key: "AUTH_VERIFY_INTERVAL_SECS", reason: "must be positive".into() });
        }
        self.verify_interval = interval;
        Ok(self)
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ServiceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_secured_route(mut self, enabled: bool) -> Self {
        self.secured_route = enabled;
        self
    }

    /// Absolute URL of an auth service endpoint, e.g. `"/verify"`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.service_url, path)
    }

    /// Absolute URL the auth service sends the browser back to.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/auth_callback", self.public_url)
    }

    /// Build the auth service authorization URL the browser is sent to on login.
    #[must_use]
    pub fn authorize_url(&self) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("app_id", &self.app_id)
            .append_pair("next", &self.callback_url())
            .append_pair("scope", "login")
            .finish();
        format!("{}/authorize?{query}", self.service_url)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("service_url", &self.service_url)
            .field("app_id", &self.app_id)
            .field("public_url", &self.public_url)
            .field("session_secret", &self.session_secret.as_ref().map(|_| "<redacted>"))
            .field("verify_interval", &self.verify_interval)
            .field("timeouts", &self.timeouts)
            .field("secured_route", &self.secured_route)
            .field("cookie_secure", &self.cookie_secure)
            .field("debug", &self.debug)
            .finish()
    }
}

fn normalize_url(key: &'static str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::Invalid { key, reason: e.to_string() })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid { key, reason: format!("unsupported scheme '{}'", parsed.scheme()) });
    }
    Ok(trimmed.to_owned())
}

/// `DEBUG=true` turns on verbose logging.
#[must_use]
pub fn debug_enabled() -> bool {
    env_bool("DEBUG").unwrap_or(false)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
