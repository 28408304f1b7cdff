//! Opaque access-token authentication.
//!
//! The token is looked up by the user store, which decides what it means
//! (see `AccessTokenKind` for the kinds a store may issue).

use async_trait::async_trait;
use ras_auth_core::{
    AuthId, AuthIdentity, AuthProvider, Credentials, ProviderKind, RequestContext, UserLookup,
    read_token,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct TokenAuthProvider {
    users: Arc<dyn UserLookup>,
    identity: RwLock<Option<AuthIdentity>>,
}

impl TokenAuthProvider {
    pub fn new(users: Arc<dyn UserLookup>) -> Self {
        Self {
            users,
            identity: RwLock::new(None),
        }
    }
}

#[async_trait]
impl AuthProvider for TokenAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Token
    }

    fn extract_credentials(&self, request: &dyn RequestContext) -> Credentials {
        read_token(request).map(Credentials::token).unwrap_or_default()
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        request: Option<&dyn RequestContext>,
    ) -> bool {
        *self.identity.write().await = None;

        let token = match credentials.token_value() {
            Some(token) => Some(token.to_string()),
            None => request.and_then(read_token),
        };
        let Some(token) = token else {
            return false;
        };

        match self.users.user_by_credentials(&Credentials::token(token)).await {
            Ok(Some(identity)) => {
                debug!(user_id = %identity.id, "Token authentication succeeded");
                *self.identity.write().await = Some(identity);
                true
            }
            Ok(None) => {
                debug!("Token authentication rejected");
                false
            }
            Err(e) => {
                warn!("User lookup failed during token authentication: {}", e);
                false
            }
        }
    }

    async fn logout(&self) {
        *self.identity.write().await = None;
    }

    async fn id(&self) -> Option<AuthId> {
        self.identity.read().await.as_ref().map(|i| i.id.clone())
    }

    async fn user(&self) -> Option<AuthIdentity> {
        self.identity.read().await.clone()
    }
}
