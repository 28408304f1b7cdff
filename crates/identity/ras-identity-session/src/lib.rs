//! Session-backed authentication.
//!
//! The login state lives in the caller's [`SessionStore`], so it survives
//! the provider instance: a later request with the same session is already
//! logged in without presenting credentials again.

use async_trait::async_trait;
use chrono::Utc;
use ras_auth_core::{
    AuthId, AuthIdentity, AuthProvider, Credentials, ProviderKind, RequestContext, SessionStore,
    UserLookup,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Session key holding the logged-in principal id.
pub const SESSION_AUTH_ID: &str = "auth.id";
/// Session key holding the login time (RFC 3339).
pub const SESSION_LOGIN_TIME: &str = "auth.login.time";
/// Session key counting failed logins since the last success.
pub const SESSION_LOGIN_ATTEMPTS: &str = "auth.login.attempts";

#[derive(Clone)]
pub struct SessionAuthProvider {
    users: Arc<dyn UserLookup>,
    session: Arc<dyn SessionStore>,
}

impl SessionAuthProvider {
    pub fn new(users: Arc<dyn UserLookup>, session: Arc<dyn SessionStore>) -> Self {
        Self { users, session }
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    async fn read(&self, key: &str) -> Option<serde_json::Value> {
        match self.session.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read session key {}: {}", key, e);
                None
            }
        }
    }

    async fn write(&self, key: &str, value: serde_json::Value) -> bool {
        match self.session.set(key, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write session key {}: {}", key, e);
                false
            }
        }
    }

    async fn clear(&self, key: &str) {
        if let Err(e) = self.session.remove(key).await {
            warn!("Failed to remove session key {}: {}", key, e);
        }
    }

    async fn record_failure(&self) {
        let attempts = self.login_attempts().await.saturating_add(1);
        self.write(SESSION_LOGIN_ATTEMPTS, attempts.into()).await;
    }

    async fn record_login(&self, identity: &AuthIdentity) -> bool {
        if !self.write(SESSION_AUTH_ID, identity.id.to_value()).await {
            return false;
        }
        self.write(SESSION_LOGIN_TIME, Utc::now().to_rfc3339().into())
            .await;
        self.clear(SESSION_LOGIN_ATTEMPTS).await;
        true
    }
}

#[async_trait]
impl AuthProvider for SessionAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Session
    }

    /// A login form posts `user_name` and `password`.
    fn extract_credentials(&self, request: &dyn RequestContext) -> Credentials {
        let mut credentials = Credentials::new();
        for key in [Credentials::USER_NAME, Credentials::PASSWORD] {
            if let Some(value) = request.body_param(key) {
                credentials.insert(key, value);
            }
        }
        credentials
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        _request: Option<&dyn RequestContext>,
    ) -> bool {
        if credentials.is_empty() {
            return false;
        }

        match self.users.user_by_credentials(credentials).await {
            Ok(Some(identity)) => {
                if self.record_login(&identity).await {
                    debug!(user_id = %identity.id, "Session login succeeded");
                    true
                } else {
                    false
                }
            }
            Ok(None) => {
                debug!("Session login rejected");
                self.record_failure().await;
                false
            }
            Err(e) => {
                warn!("User lookup failed during session login: {}", e);
                self.record_failure().await;
                false
            }
        }
    }

    async fn logout(&self) {
        for key in [SESSION_AUTH_ID, SESSION_LOGIN_TIME, SESSION_LOGIN_ATTEMPTS] {
            self.clear(key).await;
        }
    }

    async fn id(&self) -> Option<AuthId> {
        self.read(SESSION_AUTH_ID)
            .await
            .as_ref()
            .and_then(AuthId::from_value)
    }

    async fn user(&self) -> Option<AuthIdentity> {
        let id = self.id().await?;
        match self.users.user_by_id(&id).await {
            Ok(user) => user,
            Err(e) => {
                warn!("User lookup failed for session user {}: {}", id, e);
                None
            }
        }
    }

    async fn login_attempts(&self) -> u32 {
        self.read(SESSION_LOGIN_ATTEMPTS)
            .await
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_auth_core::{HttpRequestContext, MemorySessionStore};
    use ras_identity_local::LocalUserStore;

    async fn setup() -> (SessionAuthProvider, MemorySessionStore) {
        let users = LocalUserStore::new();
        users
            .add_user(
                42,
                "testuser".to_string(),
                "password123".to_string(),
                Some("test@example.com".to_string()),
                Some("Test User".to_string()),
            )
            .await
            .unwrap();

        let session = MemorySessionStore::new();
        let provider = SessionAuthProvider::new(Arc::new(users), Arc::new(session.clone()));
        (provider, session)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (provider, session) = setup().await;

        assert!(
            provider
                .authenticate(&Credentials::basic("testuser", "password123"), None)
                .await
        );
        assert_eq!(provider.id().await, Some(AuthId::from(42)));
        assert_eq!(
            session.get(SESSION_AUTH_ID).await.unwrap(),
            Some(serde_json::json!(42))
        );
        assert!(session.get(SESSION_LOGIN_TIME).await.unwrap().is_some());

        let user = provider.user().await.unwrap();
        assert_eq!(user.record["username"], "testuser");

        provider.logout().await;
        assert_eq!(provider.id().await, None);
        assert!(session.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_attempts_are_counted_then_reset() {
        let (provider, _session) = setup().await;

        for _ in 0..3 {
            assert!(
                !provider
                    .authenticate(&Credentials::basic("testuser", "wrong"), None)
                    .await
            );
        }
        assert_eq!(provider.login_attempts().await, 3);
        assert_eq!(provider.id().await, None);

        assert!(
            provider
                .authenticate(&Credentials::basic("testuser", "password123"), None)
                .await
        );
        assert_eq!(provider.login_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_empty_credentials_are_not_an_attempt() {
        let (provider, _session) = setup().await;

        assert!(!provider.authenticate(&Credentials::new(), None).await);
        assert!(!provider.authenticate(&Credentials::basic("", ""), None).await);
        assert_eq!(provider.login_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_login_survives_a_new_provider_instance() {
        let users = Arc::new(LocalUserStore::new());
        users
            .add_user(7, "alice".to_string(), "secret".to_string(), None, None)
            .await
            .unwrap();
        let session: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());

        let first = SessionAuthProvider::new(users.clone(), session.clone());
        assert!(
            first
                .authenticate(&Credentials::basic("alice", "secret"), None)
                .await
        );

        let second = SessionAuthProvider::new(users, session);
        assert_eq!(second.id().await, Some(AuthId::from(7)));
    }

    #[tokio::test]
    async fn test_credentials_come_from_the_login_form() {
        let (provider, _session) = setup().await;
        let request = HttpRequestContext::default()
            .with_body_param("user_name", "testuser")
            .with_body_param("password", "password123");

        let credentials = provider.extract_credentials(&request);
        assert_eq!(credentials.get_str(Credentials::USER_NAME), Some("testuser"));
        assert!(provider.authenticate(&credentials, Some(&request)).await);
    }
}
