//! CSRF guard for form and API posts.
//!
//! A token is minted into the session with [`CsrfGuard::issue`]; requests
//! must echo it back in a header or body field.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use ras_auth_core::{IdentityError, RequestContext, SessionStore};
use tracing::{debug, warn};

/// Session key holding the expected token.
pub const SESSION_CSRF_TOKEN: &str = "csrf_token";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CsrfGuard {
    header: String,
    field: String,
}

impl Default for CsrfGuard {
    fn default() -> Self {
        Self::new("x-csrf-token", SESSION_CSRF_TOKEN)
    }
}

impl CsrfGuard {
    pub fn new(header: &str, field: &str) -> Self {
        Self {
            header: header.to_ascii_lowercase(),
            field: field.to_string(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Mints a fresh token and stores it in the session.
    pub async fn issue(&self, session: &dyn SessionStore) -> Result<String, IdentityError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        session
            .set(SESSION_CSRF_TOKEN, serde_json::Value::String(token.clone()))
            .await?;
        Ok(token)
    }

    /// True when the request carries the session's token.
    pub async fn verify(&self, session: &dyn SessionStore, request: &dyn RequestContext) -> bool {
        let presented = request
            .header(&self.header)
            .or_else(|| request.body_param(&self.field))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let Some(presented) = presented else {
            debug!("CSRF token missing from request");
            return false;
        };

        let expected = match session.get(SESSION_CSRF_TOKEN).await {
            Ok(Some(serde_json::Value::String(expected))) if !expected.is_empty() => expected,
            Ok(_) => {
                debug!("No CSRF token in session");
                return false;
            }
            Err(e) => {
                warn!("Failed to read CSRF token from session: {}", e);
                return false;
            }
        };

        let matches = constant_time_eq(presented.as_bytes(), expected.as_bytes());
        if !matches {
            debug!("CSRF token mismatch");
        }
        matches
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_auth_core::{HttpRequestContext, MemorySessionStore};

    #[tokio::test]
    async fn test_issued_token_verifies_from_header_or_field() {
        let session = MemorySessionStore::new();
        let guard = CsrfGuard::default();
        let token = guard.issue(&session).await.unwrap();

        let header = HttpRequestContext::default().with_header("X-CSRF-Token", &token);
        assert!(guard.verify(&session, &header).await);

        let field = HttpRequestContext::default().with_body_param("csrf_token", token.clone());
        assert!(guard.verify(&session, &field).await);
    }

    #[tokio::test]
    async fn test_missing_or_wrong_token_fails() {
        let session = MemorySessionStore::new();
        let guard = CsrfGuard::default();

        let request = HttpRequestContext::default().with_header("x-csrf-token", "guess");
        assert!(!guard.verify(&session, &request).await);

        guard.issue(&session).await.unwrap();
        assert!(!guard.verify(&session, &request).await);
        assert!(!guard.verify(&session, &HttpRequestContext::default()).await);
    }

    #[tokio::test]
    async fn test_custom_names() {
        let session = MemorySessionStore::new();
        let guard = CsrfGuard::new("X-Form-Token", "_token");
        let token = guard.issue(&session).await.unwrap();

        let request = HttpRequestContext::default().with_body_param("_token", token);
        assert!(guard.verify(&session, &request).await);
        assert_eq!(guard.header(), "x-form-token");
    }
}
