//! OAuth callback authentication on top of the session provider.
//!
//! The code exchange with the external identity provider is the user
//! lookup's job: it receives the callback's `code` and `state` as
//! credentials. Once a user is resolved, login state is persisted exactly
//! like a session login.

pub mod state;

use async_trait::async_trait;
use chrono::Duration;
use ras_auth_core::{
    AuthId, AuthIdentity, AuthProvider, Credentials, IdentityError, ProviderKind, RequestContext,
    SessionStore, UserLookup,
};
use ras_identity_session::SessionAuthProvider;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use state::{OAuthState, SESSION_OAUTH_STARTED, SESSION_OAUTH_STATE};

pub const CODE_PARAM: &str = "code";
pub const STATE_PARAM: &str = "state";

pub struct OAuthProvider {
    session: SessionAuthProvider,
    state_ttl: Duration,
}

impl OAuthProvider {
    pub fn new(users: Arc<dyn UserLookup>, session: Arc<dyn SessionStore>) -> Self {
        Self {
            session: SessionAuthProvider::new(users, session),
            state_ttl: Duration::minutes(10),
        }
    }

    pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    /// Mints the `state` for an authorization redirect and remembers it in
    /// the session so the callback can be matched against it.
    pub async fn begin_authorization(
        &self,
        redirect_uri: Option<String>,
    ) -> Result<OAuthState, IdentityError> {
        let state = OAuthState::new(redirect_uri, self.state_ttl);
        let session = self.session.session();
        session
            .set(SESSION_OAUTH_STATE, serde_json::to_value(&state)?)
            .await?;
        session
            .set(SESSION_OAUTH_STARTED, serde_json::Value::Bool(true))
            .await?;

        info!("Started OAuth authorization");
        Ok(state)
    }

    pub async fn pending_state(&self) -> Option<OAuthState> {
        match self.session.session().get(SESSION_OAUTH_STATE).await {
            Ok(value) => value.and_then(|v| serde_json::from_value(v).ok()),
            Err(e) => {
                warn!("Failed to read OAuth state from session: {}", e);
                None
            }
        }
    }

    async fn authorization_started(&self) -> bool {
        match self.session.session().get(SESSION_OAUTH_STARTED).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!("Failed to read OAuth marker from session: {}", e);
                true
            }
        }
    }

    async fn discard_state(&self) {
        if let Err(e) = self.session.session().remove(SESSION_OAUTH_STATE).await {
            warn!("Failed to clear OAuth state from session: {}", e);
        }
    }

    // Sessions that never began an authorization leave the check to the
    // lookup. Otherwise the state must match a live pending one, which is
    // consumed on success; a mismatch leaves it pending.
    async fn consume_state(&self, presented: Option<&str>) -> bool {
        let Some(pending) = self.pending_state().await else {
            return !self.authorization_started().await;
        };

        if pending.is_expired() {
            self.discard_state().await;
            return false;
        }
        if !presented.is_some_and(|state| pending.matches(state)) {
            return false;
        }

        self.discard_state().await;
        true
    }
}

#[async_trait]
impl AuthProvider for OAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OAuth
    }

    fn extract_credentials(&self, request: &dyn RequestContext) -> Credentials {
        let mut credentials = Credentials::new();
        for key in [CODE_PARAM, STATE_PARAM] {
            if let Some(value) = request.query_param(key).or_else(|| request.body_param(key)) {
                credentials.insert(key, value);
            }
        }
        credentials
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        request: Option<&dyn RequestContext>,
    ) -> bool {
        if credentials.get_str(CODE_PARAM).is_none() {
            return false;
        }

        if !self.consume_state(credentials.get_str(STATE_PARAM)).await {
            debug!("OAuth callback state does not match the pending authorization");
            return false;
        }

        let authenticated = self.session.authenticate(credentials, request).await;
        if authenticated {
            info!("OAuth login succeeded");
        }
        authenticated
    }

    async fn logout(&self) {
        for key in [SESSION_OAUTH_STATE, SESSION_OAUTH_STARTED] {
            if let Err(e) = self.session.session().remove(key).await {
                warn!("Failed to clear {} from session: {}", key, e);
            }
        }
        self.session.logout().await;
    }

    async fn id(&self) -> Option<AuthId> {
        self.session.id().await
    }

    async fn user(&self) -> Option<AuthIdentity> {
        self.session.user().await
    }

    async fn login_attempts(&self) -> u32 {
        self.session.login_attempts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_auth_core::{HttpRequestContext, MemorySessionStore};
    use ras_identity_core::IdentityResult;

    /// Exchanges the code `good-code` for user 11.
    struct CodeExchange;

    #[async_trait]
    impl UserLookup for CodeExchange {
        async fn user_by_credentials(
            &self,
            credentials: &Credentials,
        ) -> IdentityResult<Option<AuthIdentity>> {
            Ok((credentials.get_str(CODE_PARAM) == Some("good-code"))
                .then(|| AuthIdentity::new(11)))
        }

        async fn user_by_id(&self, id: &AuthId) -> IdentityResult<Option<AuthIdentity>> {
            Ok((id == &AuthId::from(11)).then(|| AuthIdentity::new(11)))
        }
    }

    fn provider() -> OAuthProvider {
        OAuthProvider::new(Arc::new(CodeExchange), Arc::new(MemorySessionStore::new()))
    }

    #[tokio::test]
    async fn test_callback_logs_in_through_the_session() {
        let provider = provider();
        let state = provider.begin_authorization(None).await.unwrap();

        let request = HttpRequestContext::default()
            .with_query(&format!("code=good-code&state={}", state.state));
        let credentials = provider.extract_credentials(&request);

        assert!(provider.authenticate(&credentials, Some(&request)).await);
        assert_eq!(provider.id().await, Some(AuthId::from(11)));
        assert!(provider.pending_state().await.is_none());
        assert_eq!(provider.kind(), ProviderKind::OAuth);
    }

    #[tokio::test]
    async fn test_bad_code_counts_as_failed_attempt() {
        let provider = provider();
        let credentials = Credentials::new().with(CODE_PARAM, "bad-code");

        assert!(!provider.authenticate(&credentials, None).await);
        assert_eq!(provider.login_attempts().await, 1);
    }

    fn callback(state: Option<&str>) -> Credentials {
        let credentials = Credentials::new().with(CODE_PARAM, "good-code");
        match state {
            Some(state) => credentials.with(STATE_PARAM, state),
            None => credentials,
        }
    }

    #[tokio::test]
    async fn test_forged_callback_leaves_state_pending() {
        let provider = provider();
        let state = provider.begin_authorization(None).await.unwrap();

        assert!(!provider.authenticate(&callback(Some("forged")), None).await);
        assert!(!provider.authenticate(&callback(None), None).await);
        assert_eq!(provider.pending_state().await, Some(state.clone()));
        assert_eq!(provider.id().await, None);

        assert!(provider.authenticate(&callback(Some(state.state.as_str())), None).await);
        assert_eq!(provider.id().await, Some(AuthId::from(11)));
    }

    #[tokio::test]
    async fn test_state_is_single_use() {
        let provider = provider();
        let state = provider.begin_authorization(None).await.unwrap();

        assert!(provider.authenticate(&callback(Some(state.state.as_str())), None).await);
        assert!(provider.pending_state().await.is_none());

        // Authorization was started but nothing is pending: replays and
        // state-less callbacks are refused.
        assert!(!provider.authenticate(&callback(Some(state.state.as_str())), None).await);
        assert!(!provider.authenticate(&callback(None), None).await);

        provider.logout().await;
        assert_eq!(provider.id().await, None);
        assert!(provider.authenticate(&callback(None), None).await);
    }

    #[tokio::test]
    async fn test_expired_state_is_rejected() {
        let provider = provider().with_state_ttl(Duration::seconds(-1));
        let state = provider.begin_authorization(None).await.unwrap();

        assert!(!provider.authenticate(&callback(Some(state.state.as_str())), None).await);
        assert!(provider.pending_state().await.is_none());
        assert!(!provider.authenticate(&callback(Some(state.state.as_str())), None).await);
    }

    #[tokio::test]
    async fn test_callback_without_authorization_is_left_to_lookup() {
        let provider = provider();
        assert!(provider.authenticate(&callback(None), None).await);
        assert_eq!(provider.id().await, Some(AuthId::from(11)));
    }

    #[tokio::test]
    async fn test_missing_code_is_not_an_attempt() {
        let provider = provider();
        assert!(!provider.authenticate(&Credentials::new(), None).await);
        assert_eq!(provider.login_attempts().await, 0);
    }
}
