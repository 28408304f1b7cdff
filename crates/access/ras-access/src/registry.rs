//! Process-wide authentication registry.
//!
//! Built once at startup and shared behind an `Arc`. It owns the
//! collaborators every provider needs and creates provider instances on
//! demand for each [`AuthScope`]. The memo tables are the only state that
//! changes after construction.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use rand::RngCore;
use ras_auth_core::{
    AuthError, AuthName, AuthProvider, AuthResult, NoopUserLookup, ProviderKind, PublicAuthProvider,
    SessionStore, UserLookup,
};
use ras_identity_basic::BasicAuthProvider;
use ras_identity_jwt::{JwtAuthProvider, TokenCodec};
use ras_identity_oauth2::OAuthProvider;
use ras_identity_session::SessionAuthProvider;
use ras_identity_token::TokenAuthProvider;
use ras_permission_core::{MemoryPermissions, PermissionsStorage};
use tracing::{debug, warn};

use crate::chain::{AuthChain, ChainOptions};
use crate::config::AuthSettings;
use crate::csrf::CsrfGuard;
use crate::scope::AuthScope;

pub struct AuthRegistry {
    default_users: Arc<dyn UserLookup>,
    users: HashMap<ProviderKind, Arc<dyn UserLookup>>,
    codec: Arc<TokenCodec>,
    jwt_key: Option<Arc<[u8]>>,
    permissions: Arc<dyn PermissionsStorage>,
    csrf: CsrfGuard,
    resolved: DashMap<String, ProviderKind>,
    chains: DashMap<(Vec<AuthName>, ChainOptions), Arc<AuthChain>>,
}

impl AuthRegistry {
    pub fn builder() -> AuthRegistryBuilder {
        AuthRegistryBuilder::default()
    }

    /// Maps a provider name to its kind.
    ///
    /// Unknown names are `UnknownProvider`; `csrf` is `NoProvider`.
    pub fn resolve(&self, name: &str) -> AuthResult<ProviderKind> {
        let key = name.trim().to_ascii_lowercase();
        if let Some(kind) = self.resolved.get(&key) {
            return Ok(*kind);
        }

        let kind: ProviderKind = name.parse()?;
        self.resolved.insert(key, kind);
        Ok(kind)
    }

    pub fn is_valid_auth_name(name: &str) -> bool {
        AuthName::is_valid(name)
    }

    pub fn provider_kind(name: AuthName) -> Option<ProviderKind> {
        name.provider_kind()
    }

    /// The lookup configured for `kind`, or the default one.
    pub fn users_for(&self, kind: ProviderKind) -> Arc<dyn UserLookup> {
        self.users
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| self.default_users.clone())
    }

    pub fn token_codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionsStorage> {
        &self.permissions
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    /// Creates a fresh provider bound to `session`.
    pub fn create_provider(
        &self,
        kind: ProviderKind,
        session: Arc<dyn SessionStore>,
    ) -> Arc<dyn AuthProvider> {
        let users = self.users_for(kind);
        match kind {
            ProviderKind::Session => Arc::new(SessionAuthProvider::new(users, session)),
            ProviderKind::OAuth => Arc::new(OAuthProvider::new(users, session)),
            ProviderKind::Basic => Arc::new(BasicAuthProvider::new(users)),
            ProviderKind::Token => Arc::new(TokenAuthProvider::new(users)),
            ProviderKind::Jwt => {
                let key = self.jwt_key.clone().unwrap_or_else(|| {
                    warn!("No JWT signing key configured, JWT provider will reject every token");
                    throwaway_key()
                });
                Arc::new(JwtAuthProvider::new(users, self.codec.clone(), key))
            }
            ProviderKind::Public => Arc::new(PublicAuthProvider),
        }
    }

    /// A JWT provider with the registry's codec and key, for token issuing.
    pub fn jwt_provider(&self) -> AuthResult<JwtAuthProvider> {
        let key = self.jwt_key.clone().ok_or(AuthError::MissingJwtKey)?;
        Ok(JwtAuthProvider::new(
            self.users_for(ProviderKind::Jwt),
            self.codec.clone(),
            key,
        ))
    }

    /// Opens a per-request scope over `session`.
    pub fn scope(self: &Arc<Self>, session: Arc<dyn SessionStore>) -> AuthScope {
        AuthScope::new(self.clone(), session)
    }

    /// The chain for `names`, built once per distinct name list and options.
    ///
    /// A chain naming `jwt` needs a configured signing key.
    pub fn middleware(&self, names: &[&str], options: ChainOptions) -> AuthResult<Arc<AuthChain>> {
        let names = names
            .iter()
            .map(|name| name.parse::<AuthName>())
            .collect::<AuthResult<Vec<_>>>()?;
        if names.contains(&AuthName::Jwt) && self.jwt_key.is_none() {
            return Err(AuthError::MissingJwtKey);
        }

        let chain = self
            .chains
            .entry((names.clone(), options.clone()))
            .or_insert_with(|| {
                let chain = AuthChain::new(&names, self.csrf.clone(), options);
                debug!(providers = ?chain.providers(), "Built auth chain");
                Arc::new(chain)
            })
            .clone();
        Ok(chain)
    }

    /// The chain described by the settings' `chain` and `redirect`.
    pub fn middleware_from_settings(&self, settings: &AuthSettings) -> AuthResult<Arc<AuthChain>> {
        self.middleware(&settings.chain_names(), settings.chain_options())
    }
}

#[derive(Default)]
pub struct AuthRegistryBuilder {
    default_users: Option<Arc<dyn UserLookup>>,
    users: HashMap<ProviderKind, Arc<dyn UserLookup>>,
    codec: Option<TokenCodec>,
    jwt_key: Option<Arc<[u8]>>,
    permissions: Option<Arc<dyn PermissionsStorage>>,
    csrf: Option<CsrfGuard>,
}

impl AuthRegistryBuilder {
    /// Lookup used by every provider without a dedicated one.
    pub fn users(mut self, users: Arc<dyn UserLookup>) -> Self {
        self.default_users = Some(users);
        self
    }

    pub fn users_for(mut self, kind: ProviderKind, users: Arc<dyn UserLookup>) -> Self {
        self.users.insert(kind, users);
        self
    }

    pub fn token_codec(mut self, codec: TokenCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn jwt_key(mut self, key: impl Into<Arc<[u8]>>) -> Self {
        self.jwt_key = Some(key.into());
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionsStorage>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn csrf(mut self, csrf: CsrfGuard) -> Self {
        self.csrf = Some(csrf);
        self
    }

    /// Applies the token, key and CSRF settings.
    pub fn settings(self, settings: &AuthSettings) -> anyhow::Result<Self> {
        settings.validate()?;
        Ok(self
            .token_codec(TokenCodec::new(settings.token_config()?))
            .jwt_key(settings.jwt.secret.as_bytes())
            .csrf(settings.csrf_guard()))
    }

    /// Without [`jwt_key`](Self::jwt_key) the registry refuses `jwt`
    /// chains and token issuing.
    pub fn build(self) -> Arc<AuthRegistry> {
        Arc::new(AuthRegistry {
            default_users: self.default_users.unwrap_or_else(|| Arc::new(NoopUserLookup)),
            users: self.users,
            codec: Arc::new(self.codec.unwrap_or_default()),
            jwt_key: self.jwt_key,
            permissions: self
                .permissions
                .unwrap_or_else(|| Arc::new(MemoryPermissions::new())),
            csrf: self.csrf.unwrap_or_default(),
            resolved: DashMap::new(),
            chains: DashMap::new(),
        })
    }
}

// Random per-provider key; nothing signed elsewhere verifies against it.
fn throwaway_key() -> Arc<[u8]> {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    Arc::from(key.as_slice())
}
