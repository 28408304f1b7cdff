use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use ras_auth_core::{
    AuthId, AuthIdentity, AuthProvider, Credentials, ProviderKind, RequestContext, UserLookup,
    read_token,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::codec::{Token, TokenCodec, TokenResult};

#[derive(Debug, Clone)]
struct VerifiedToken {
    raw: String,
    token: Token,
    identity: AuthIdentity,
}

/// Authenticates callers presenting a signed bearer token.
///
/// The token is read from the credentials or, failing that, from the request
/// (bearer header, route `token`, body `token`, cookie `token`). Its
/// `user_id` claim is resolved through the user lookup.
pub struct JwtAuthProvider {
    users: Arc<dyn UserLookup>,
    codec: Arc<TokenCodec>,
    key: Arc<[u8]>,
    current: RwLock<Option<VerifiedToken>>,
}

impl JwtAuthProvider {
    pub fn new(users: Arc<dyn UserLookup>, codec: Arc<TokenCodec>, key: impl Into<Arc<[u8]>>) -> Self {
        Self {
            users,
            codec,
            key: key.into(),
            current: RwLock::new(None),
        }
    }

    /// Issues a token for `id` signed with `key`, or the provider key.
    pub fn create_token(
        &self,
        id: &AuthId,
        ttl: Option<Duration>,
        key: Option<&[u8]>,
    ) -> TokenResult<String> {
        self.codec
            .issue(id, serde_json::Map::new(), ttl, key.unwrap_or(self.key.as_ref()))
    }

    /// Verifies and decodes `token` under `key`, or the provider key.
    pub fn decode_token(&self, token: &str, key: Option<&[u8]>) -> TokenResult<Token> {
        self.codec
            .decode_verified(token, key.unwrap_or(self.key.as_ref()))
    }

    pub fn is_valid_token(&self, token: &str) -> bool {
        self.codec.verify(token, &self.key)
    }

    /// The raw token that last authenticated successfully.
    pub async fn token_param(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|t| t.raw.clone())
    }

    pub async fn token(&self) -> Option<Token> {
        self.current.read().await.as_ref().map(|t| t.token.clone())
    }

    pub async fn clear_token(&self) {
        *self.current.write().await = None;
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Jwt
    }

    fn extract_credentials(&self, request: &dyn RequestContext) -> Credentials {
        read_token(request).map(Credentials::token).unwrap_or_default()
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        request: Option<&dyn RequestContext>,
    ) -> bool {
        let raw = match credentials.token_value() {
            Some(token) => Some(token.to_string()),
            None => request.and_then(read_token),
        };
        let Some(raw) = raw else {
            self.clear_token().await;
            return false;
        };

        let token = match self.codec.decode_verified(&raw, &self.key) {
            Ok(token) => token,
            Err(e) => {
                debug!("JWT rejected: {}", e);
                self.clear_token().await;
                return false;
            }
        };

        let Some(subject) = token.subject() else {
            debug!("JWT has no usable user_id claim");
            self.clear_token().await;
            return false;
        };

        match self.users.user_by_id(&subject).await {
            Ok(Some(identity)) => {
                debug!(user_id = %identity.id, "JWT authenticated");
                *self.current.write().await = Some(VerifiedToken {
                    raw,
                    token,
                    identity,
                });
                true
            }
            Ok(None) => {
                debug!(user_id = %subject, "JWT subject not found");
                self.clear_token().await;
                false
            }
            Err(e) => {
                warn!("User lookup failed during JWT authentication: {}", e);
                self.clear_token().await;
                false
            }
        }
    }

    async fn logout(&self) {
        self.clear_token().await;
    }

    async fn id(&self) -> Option<AuthId> {
        self.current
            .read()
            .await
            .as_ref()
            .and_then(|t| t.token.subject())
    }

    async fn user(&self) -> Option<AuthIdentity> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|t| t.identity.clone())
    }
}
