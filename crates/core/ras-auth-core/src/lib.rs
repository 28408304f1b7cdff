//! Authentication provider contract shared by every credential scheme.
//!
//! A provider owns the state needed to authenticate one kind of credential
//! and answers "who is the current caller, if any". The chain and the access
//! engine in `ras-access` only ever talk to providers through
//! [`AuthProvider`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ras_identity_core::{
    AccessTokenKind, AuthId, AuthIdentity, Credentials, IdentityError, IdentityResult,
    NoopUserLookup, UserLookup,
};

mod request;
mod session;

pub use request::{HttpRequestContext, RequestContext, bearer_token, read_token};
pub use session::{MemorySessionStore, SessionStore};

/// Errors raised while wiring providers together.
///
/// Per-request authentication failures are never errors; they are a
/// `false` from [`AuthProvider::authenticate`].
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuthError {
    /// The name does not belong to any known auth scheme.
    #[error("Unknown auth provider: {0}")]
    UnknownProvider(String),

    /// The name is a known middleware (e.g. `csrf`) but not a provider.
    #[error("Auth name '{0}' does not have a provider")]
    NoProvider(String),

    /// JWT was requested but no signing key was configured.
    #[error("No JWT signing key configured")]
    MissingJwtKey,
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Every name the registry recognises, providers and middleware alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthName {
    Basic,
    Session,
    Jwt,
    Token,
    Csrf,
    OAuth,
    Public,
}

impl AuthName {
    pub const ALL: [AuthName; 7] = [
        AuthName::Basic,
        AuthName::Session,
        AuthName::Jwt,
        AuthName::Token,
        AuthName::Csrf,
        AuthName::OAuth,
        AuthName::Public,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthName::Basic => "basic",
            AuthName::Session => "session",
            AuthName::Jwt => "jwt",
            AuthName::Token => "token",
            AuthName::Csrf => "csrf",
            AuthName::OAuth => "oauth",
            AuthName::Public => "public",
        }
    }

    /// The provider behind this name; `csrf` is middleware only.
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        match self {
            AuthName::Basic => Some(ProviderKind::Basic),
            AuthName::Session => Some(ProviderKind::Session),
            AuthName::Jwt => Some(ProviderKind::Jwt),
            AuthName::Token => Some(ProviderKind::Token),
            AuthName::OAuth => Some(ProviderKind::OAuth),
            AuthName::Public => Some(ProviderKind::Public),
            AuthName::Csrf => None,
        }
    }

    pub fn is_valid(name: &str) -> bool {
        name.parse::<AuthName>().is_ok()
    }
}

impl FromStr for AuthName {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        AuthName::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| AuthError::UnknownProvider(name.to_string()))
    }
}

impl fmt::Display for AuthName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of provider variants the registry can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Session,
    Basic,
    Token,
    Jwt,
    OAuth,
    Public,
}

impl ProviderKind {
    pub fn name(&self) -> AuthName {
        match self {
            ProviderKind::Session => AuthName::Session,
            ProviderKind::Basic => AuthName::Basic,
            ProviderKind::Token => AuthName::Token,
            ProviderKind::Jwt => AuthName::Jwt,
            ProviderKind::OAuth => AuthName::OAuth,
            ProviderKind::Public => AuthName::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.name().as_str()
    }
}

impl TryFrom<AuthName> for ProviderKind {
    type Error = AuthError;

    fn try_from(name: AuthName) -> Result<Self, Self::Error> {
        name.provider_kind()
            .ok_or_else(|| AuthError::NoProvider(name.as_str().to_string()))
    }
}

impl FromStr for ProviderKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::try_from(s.parse::<AuthName>()?)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authentication scheme.
///
/// Implementations never fail loudly for bad credentials: any missing or
/// invalid credential, lookup miss or collaborator error is reported as
/// `false` so the chain can move on to the next provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Pulls this scheme's credentials out of a request.
    fn extract_credentials(&self, _request: &dyn RequestContext) -> Credentials {
        Credentials::new()
    }

    /// Tries to establish an identity.
    ///
    /// On success the identity is kept and failure counters are reset; on
    /// failure the identity stays empty.
    async fn authenticate(
        &self,
        credentials: &Credentials,
        request: Option<&dyn RequestContext>,
    ) -> bool;

    /// Drops the identity and any persisted login markers.
    async fn logout(&self);

    /// Current principal id without re-authenticating.
    async fn id(&self) -> Option<AuthId>;

    async fn user(&self) -> Option<AuthIdentity>;

    /// Failed attempts in the current session. Stateless schemes report 0.
    async fn login_attempts(&self) -> u32 {
        0
    }
}

/// Anonymous access: always authenticates, never has an id.
#[derive(Debug, Default, Clone)]
pub struct PublicAuthProvider;

#[async_trait]
impl AuthProvider for PublicAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Public
    }

    async fn authenticate(
        &self,
        _credentials: &Credentials,
        _request: Option<&dyn RequestContext>,
    ) -> bool {
        true
    }

    async fn logout(&self) {}

    async fn id(&self) -> Option<AuthId> {
        None
    }

    async fn user(&self) -> Option<AuthIdentity> {
        None
    }
}
