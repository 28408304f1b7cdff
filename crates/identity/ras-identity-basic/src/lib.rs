//! HTTP Basic authentication.
//!
//! Credentials come from the `Authorization: Basic …` header on every
//! request; nothing is persisted between requests.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use ras_auth_core::{
    AuthId, AuthIdentity, AuthProvider, Credentials, ProviderKind, RequestContext, UserLookup,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Decodes an `Authorization` header value into `(user_name, password)`.
///
/// The scheme is matched case-insensitively; anything malformed is `None`.
pub fn parse_basic_auth_header(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user_name, password) = decoded.split_once(':')?;

    Some((user_name.to_string(), password.to_string()))
}

pub struct BasicAuthProvider {
    users: Arc<dyn UserLookup>,
    identity: RwLock<Option<AuthIdentity>>,
}

impl BasicAuthProvider {
    pub fn new(users: Arc<dyn UserLookup>) -> Self {
        Self {
            users,
            identity: RwLock::new(None),
        }
    }
}

#[async_trait]
impl AuthProvider for BasicAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Basic
    }

    fn extract_credentials(&self, request: &dyn RequestContext) -> Credentials {
        request
            .header("authorization")
            .and_then(parse_basic_auth_header)
            .map(|(user_name, password)| Credentials::basic(user_name, password))
            .unwrap_or_default()
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        request: Option<&dyn RequestContext>,
    ) -> bool {
        let extracted;
        let credentials = match request {
            Some(request) if credentials.is_empty() => {
                extracted = self.extract_credentials(request);
                &extracted
            }
            _ => credentials,
        };

        *self.identity.write().await = None;
        if credentials.is_empty() {
            return false;
        }

        match self.users.user_by_credentials(credentials).await {
            Ok(Some(identity)) => {
                debug!(user_id = %identity.id, "Basic authentication succeeded");
                *self.identity.write().await = Some(identity);
                true
            }
            Ok(None) => {
                debug!("Basic authentication rejected");
                false
            }
            Err(e) => {
                warn!("User lookup failed during basic authentication: {}", e);
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
