//! Per-request authentication scope.
//!
//! Providers hold caller-specific state (a cached token, a resolved
//! identity), so each scope creates and keeps its own instances. The scope
//! also records which provider the chain bound as active; the facade
//! methods and the access engine read through that provider.

use std::sync::Arc;

use dashmap::DashMap;
use ras_auth_core::{
    AuthId, AuthIdentity, AuthProvider, AuthResult, Credentials, ProviderKind, SessionStore,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::access::AccessEngine;
use crate::registry::AuthRegistry;

pub struct AuthScope {
    registry: Arc<AuthRegistry>,
    session: Arc<dyn SessionStore>,
    providers: DashMap<ProviderKind, Arc<dyn AuthProvider>>,
    active: RwLock<ProviderKind>,
}

impl AuthScope {
    pub fn new(registry: Arc<AuthRegistry>, session: Arc<dyn SessionStore>) -> Self {
        Self {
            registry,
            session,
            providers: DashMap::new(),
            active: RwLock::new(ProviderKind::Session),
        }
    }

    pub fn registry(&self) -> &Arc<AuthRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    /// This scope's instance of `kind`, created on first use.
    pub fn provider(&self, kind: ProviderKind) -> Arc<dyn AuthProvider> {
        self.providers
            .entry(kind)
            .or_insert_with(|| self.registry.create_provider(kind, self.session.clone()))
            .clone()
    }

    pub fn provider_by_name(&self, name: &str) -> AuthResult<Arc<dyn AuthProvider>> {
        Ok(self.provider(self.registry.resolve(name)?))
    }

    /// Replaces the instance used for the provider's kind.
    pub fn insert_provider(&self, provider: Arc<dyn AuthProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub(crate) async fn bind(&self, kind: ProviderKind) {
        *self.active.write().await = kind;
    }

    pub async fn active_kind(&self) -> ProviderKind {
        *self.active.read().await
    }

    pub async fn active(&self) -> Arc<dyn AuthProvider> {
        self.provider(self.active_kind().await)
    }

    /// Switches the active provider by name.
    pub async fn with_provider(&self, name: &str) -> AuthResult<ProviderKind> {
        let kind = self.registry.resolve(name)?;
        debug!(provider = %kind, "Switching active auth provider");
        self.bind(kind).await;
        Ok(kind)
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> bool {
        self.active().await.authenticate(credentials, None).await
    }

    pub async fn logout(&self) {
        self.active().await.logout().await;
    }

    pub async fn id(&self) -> Option<AuthId> {
        self.active().await.id().await
    }

    pub async fn user(&self) -> Option<AuthIdentity> {
        self.active().await.user().await
    }

    pub async fn login_attempts(&self) -> u32 {
        self.active().await.login_attempts().await
    }

    pub async fn is_logged(&self) -> bool {
        self.id().await.is_some()
    }

    /// An access engine reading the principal from this scope.
    pub fn access(self: &Arc<Self>) -> AccessEngine {
        AccessEngine::new(self.registry.permissions().clone(), self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_auth_core::{AuthError, MemorySessionStore};
    use ras_identity_local::LocalUserStore;

    async fn registry() -> Arc<AuthRegistry> {
        let users = LocalUserStore::new();
        users
            .add_user(1, "alice".to_string(), "secret".to_string(), None, None)
            .await
            .unwrap();
        AuthRegistry::builder().users(Arc::new(users)).build()
    }

    #[tokio::test]
    async fn test_facade_defaults_to_session() {
        let scope = registry().await.scope(Arc::new(MemorySessionStore::new()));

        assert_eq!(scope.active_kind().await, ProviderKind::Session);
        assert!(!scope.is_logged().await);

        assert!(!scope.authenticate(&Credentials::basic("alice", "wrong")).await);
        assert_eq!(scope.login_attempts().await, 1);

        assert!(scope.authenticate(&Credentials::basic("alice", "secret")).await);
        assert!(scope.is_logged().await);
        assert_eq!(scope.id().await, Some(AuthId::from(1)));
        assert_eq!(scope.user().await.unwrap().record["username"], "alice");

        scope.logout().await;
        assert!(!scope.is_logged().await);
    }

    #[tokio::test]
    async fn test_provider_instances_are_per_scope() {
        let registry = registry().await;
        let first = registry.scope(Arc::new(MemorySessionStore::new()));
        let second = registry.scope(Arc::new(MemorySessionStore::new()));

        assert!(Arc::ptr_eq(
            &first.provider(ProviderKind::Basic),
            &first.provider(ProviderKind::Basic)
        ));
        assert!(!Arc::ptr_eq(
            &first.provider(ProviderKind::Basic),
            &second.provider(ProviderKind::Basic)
        ));
    }

    #[tokio::test]
    async fn test_with_provider_switches_by_name() {
        let scope = registry().await.scope(Arc::new(MemorySessionStore::new()));

        assert_eq!(scope.with_provider("basic").await, Ok(ProviderKind::Basic));
        assert_eq!(scope.active().await.kind(), ProviderKind::Basic);
        assert_eq!(
            scope.with_provider("csrf").await,
            Err(AuthError::NoProvider("csrf".to_string()))
        );
        assert_eq!(scope.active_kind().await, ProviderKind::Basic);
        assert!(scope.provider_by_name("nope").is_err());
    }
}
