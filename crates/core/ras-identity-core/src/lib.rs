//! Core identity types and the user lookup contract.
//!
//! Everything an authentication provider needs to talk about "who" lives
//! here: the principal id, the resolved identity record, the credentials a
//! caller presented and the [`UserLookup`] collaborator that turns either of
//! them into an identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid authentication payload")]
    InvalidPayload,

    #[error("User store error: {0}")]
    StoreError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Opaque id of an authenticated principal.
///
/// Stores may key users by integers or by strings; both are carried as a
/// string so ids compare the same regardless of where they were read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthId(String);

impl AuthId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads an id out of a loosely typed value (session entry, token claim).
    ///
    /// Strings and integers are accepted; empty strings, zero, `null` and
    /// anything else count as "no id".
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(0) => None,
                Some(i) => Some(Self(i.to_string())),
                None => n.as_u64().map(|u| Self(u.to_string())),
            },
            _ => None,
        }
    }

    /// Numeric ids go back out as JSON numbers, everything else as strings.
    pub fn to_value(&self) -> serde_json::Value {
        match self.0.parse::<i64>() {
            Ok(i) => serde_json::Value::from(i),
            Err(_) => serde_json::Value::String(self.0.clone()),
        }
    }
}

impl fmt::Display for AuthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AuthId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for AuthId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for AuthId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i32> for AuthId {
    fn from(id: i32) -> Self {
        Self(id.to_string())
    }
}

/// The logged-in principal: an id plus whatever record the user store keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub id: AuthId,
    pub record: serde_json::Value,
}

impl AuthIdentity {
    pub fn new(id: impl Into<AuthId>) -> Self {
        Self {
            id: id.into(),
            record: serde_json::Value::Null,
        }
    }

    pub fn with_record(mut self, record: serde_json::Value) -> Self {
        self.record = record;
        self
    }
}

/// Credentials as presented by a caller.
///
/// A flat key/value payload; which keys matter depends on the provider
/// (`user_name`/`password` for password logins, `token` for bearer tokens,
/// `code`/`state` for OAuth callbacks).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(serde_json::Map<String, serde_json::Value>);

impl Credentials {
    pub const USER_NAME: &'static str = "user_name";
    pub const PASSWORD: &'static str = "password";
    pub const TOKEN: &'static str = "token";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn basic(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new()
            .with(Self::USER_NAME, user_name.into())
            .with(Self::PASSWORD, password.into())
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::new().with(Self::TOKEN, token.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// String value for `key`, ignoring empty strings.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn token_value(&self) -> Option<&str> {
        self.get_str(Self::TOKEN)
    }

    /// True when no key carries a usable value.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| match v {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            _ => false,
        })
    }

    pub fn into_value(self) -> serde_json::Value {
        serde_json::Value::Object(self.0)
    }
}

/// Purpose of an opaque access token issued by a credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTokenKind {
    Page,
    Login,
    Api,
    OAuth,
}

impl AccessTokenKind {
    /// Lifetime used when the issuer does not ask for one.
    pub const DEFAULT_TTL_SECONDS: i64 = 1800;
}

/// Resolves credentials or ids to identities.
///
/// A miss is `Ok(None)`; `Err` is reserved for the store itself failing.
#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn user_by_credentials(
        &self,
        credentials: &Credentials,
    ) -> IdentityResult<Option<AuthIdentity>>;

    async fn user_by_id(&self, id: &AuthId) -> IdentityResult<Option<AuthIdentity>>;
}

/// A lookup that knows nobody.
pub struct NoopUserLookup;

#[async_trait]
impl UserLookup for NoopUserLookup {
    async fn user_by_credentials(
        &self,
        _credentials: &Credentials,
    ) -> IdentityResult<Option<AuthIdentity>> {
        Ok(None)
    }

    async fn user_by_id(&self, _id: &AuthId) -> IdentityResult<Option<AuthIdentity>> {
        Ok(None)
    }
}
