//! Profile and long-token payloads returned by the auth service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `user_info` object. Keys beyond the known ones are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Integer access level. The service sends it as a number or a numeric string.
    #[serde(default)]
    pub role: Option<Value>,
    #[serde(default)]
    pub permissions: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    /// The role as an integer level, if it is one.
    #[must_use]
    pub fn role_level(&self) -> Option<i64> {
        match self.role.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Long-lived (90 day) token. The auth service does not issue these yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongToken {
    pub token: String,
    pub expiry: String,
}

impl LongToken {
    /// Read `token` and `expiry` from a reply body. Both must be strings.
    #[must_use]
    pub fn from_json(body: &Value) -> Option<Self> {
        let token = body.get("token")?.as_str()?;
        let expiry = body.get("expiry")?.as_str()?;
        Some(Self { token: token.to_owned(), expiry: expiry.to_owned() })
    }
}
