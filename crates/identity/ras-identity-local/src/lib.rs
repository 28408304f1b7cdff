//! Local user store with Argon2 password hashing and opaque access tokens.
//!
//! Implements [`UserLookup`] so any provider can resolve principals against
//! it: password logins (`user_name`/`password`), opaque access tokens
//! (`token`) and plain id lookups.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand_core::OsRng;
use ras_identity_core::{
    AccessTokenKind, AuthId, AuthIdentity, Credentials, IdentityError, IdentityResult, UserLookup,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: AuthId,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl LocalUser {
    fn identity(&self) -> AuthIdentity {
        AuthIdentity::new(self.id.clone()).with_record(serde_json::json!({
            "username": self.username,
            "email": self.email,
            "display_name": self.display_name,
            "metadata": self.metadata,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub user_id: AuthId,
    pub kind: AccessTokenKind,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Clone)]
pub struct LocalUserStore {
    users: Arc<RwLock<HashMap<String, LocalUser>>>,
    tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl LocalUserStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            semaphore: Arc::new(tokio::sync::Semaphore::new(5)),
        }
    }

    pub async fn add_user(
        &self,
        id: impl Into<AuthId>,
        username: String,
        password: String,
        email: Option<String>,
        display_name: Option<String>,
    ) -> Result<(), argon2::password_hash::Error> {
        let argon2 = Argon2::default();
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        let user = LocalUser {
            id: id.into(),
            username: username.clone(),
            password_hash,
            email,
            display_name,
            metadata: None,
        };

        let mut users = self.users.write().await;

        users.insert(username, user);

        Ok(())
    }

    pub async fn remove_user(&self, username: &str) -> Option<LocalUser> {
        let mut users = self.users.write().await;
        users.remove(username)
    }

    /// Issues an opaque access token for `user_id`.
    ///
    /// Returns `None` when the user is unknown. `ttl` defaults to
    /// [`AccessTokenKind::DEFAULT_TTL_SECONDS`].
    pub async fn issue_access_token(
        &self,
        user_id: &AuthId,
        kind: AccessTokenKind,
        ttl: Option<Duration>,
    ) -> Option<AccessToken> {
        if self.find_by_id(user_id).await.is_none() {
            return None;
        }

        let ttl = ttl.unwrap_or_else(|| Duration::seconds(AccessTokenKind::DEFAULT_TTL_SECONDS));
        let token = AccessToken {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user_id.clone(),
            kind,
            expires_at: Utc::now() + ttl,
        };

        self.tokens
            .write()
            .await
            .insert(token.token.clone(), token.clone());

        Some(token)
    }

    pub async fn revoke_access_token(&self, token: &str) -> Option<AccessToken> {
        self.tokens.write().await.remove(token)
    }

    /// Drops expired tokens; returns how many were removed.
    pub async fn cleanup_expired_tokens(&self) -> usize {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired());
        before - tokens.len()
    }

    async fn find_by_id(&self, id: &AuthId) -> Option<LocalUser> {
        let users = self.users.read().await;
        users.values().find(|user| &user.id == id).cloned()
    }

    async fn find_by_token(&self, token: &str) -> Option<LocalUser> {
        let user_id = {
            let tokens = self.tokens.read().await;
            let access_token = tokens.get(token)?;
            if access_token.is_expired() {
                return None;
            }
            access_token.user_id.clone()
        };
        self.find_by_id(&user_id).await
    }

    async fn verify_user(&self, username: &str, password: &str) -> IdentityResult<LocalUser> {
        let _semlock = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| IdentityError::StoreError(e.to_string()))?;
        let users = self.users.read().await;

        // Use a dummy hash to prevent timing attacks
        // This is a real Argon2 hash of "dummy_password" to ensure consistent timing
        const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$9QsJRKgzJkKaOUvlp7gl2Q$qmE3qIFBNJ6nZYbLYXEI2uo0zZc7T0Q8LU1ZsqsZ3QE";

        let user = users.get(username);
        let password_hash = user.map_or(DUMMY_HASH, |user| user.password_hash.as_str());

        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| IdentityError::StoreError(e.to_string()))?;

        let password_valid = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();

        // Only succeed if both user exists AND password is valid
        match user {
            Some(user) if password_valid => Ok(user.clone()),
            _ => Err(IdentityError::InvalidCredentials),
        }
    }
}

impl Default for LocalUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserLookup for LocalUserStore {
    async fn user_by_credentials(
        &self,
        credentials: &Credentials,
    ) -> IdentityResult<Option<AuthIdentity>> {
        if let Some(token) = credentials.token_value() {
            return Ok(self.find_by_token(token).await.map(|user| user.identity()));
        }

        let (Some(username), Some(password)) = (
            credentials.get_str(Credentials::USER_NAME),
            credentials.get_str(Credentials::PASSWORD),
        ) else {
            return Ok(None);
        };

        match self.verify_user(username, password).await {
            Ok(user) => Ok(Some(user.identity())),
            Err(IdentityError::InvalidCredentials) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn user_by_id(&self, id: &AuthId) -> IdentityResult<Option<AuthIdentity>> {
        Ok(self.find_by_id(id).await.map(|user| user.identity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_store() -> LocalUserStore {
        let store = LocalUserStore::new();

        // Add test users
        store
            .add_user(
                1,
                "testuser".to_string(),
                "password123".to_string(),
                Some("test@example.com".to_string()),
                Some("Test User".to_string()),
            )
            .await
            .unwrap();

        store
            .add_user(
                2,
                "alice".to_string(),
                "supersecret".to_string(),
                Some("alice@example.com".to_string()),
                Some("Alice Smith".to_string()),
            )
            .await
            .unwrap();

        store
    }

    #[tokio::test]
    async fn test_password_login_success() {
        let store = setup_test_store().await;

        let identity = store
            .user_by_credentials(&Credentials::basic("testuser", "password123"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(identity.id, AuthId::from(1));
        assert_eq!(identity.record["username"], "testuser");
        assert_eq!(identity.record["email"], "test@example.com");
        assert_eq!(identity.record["display_name"], "Test User");
    }

    #[tokio::test]
    async fn test_wrong_password_is_a_miss() {
        let store = setup_test_store().await;

        let result = store
            .user_by_credentials(&Credentials::basic("testuser", "wrongpassword"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_username_enumeration_prevention() {
        let store = setup_test_store().await;

        // Both an unknown user and a wrong password look the same to callers
        let unknown = store
            .user_by_credentials(&Credentials::basic("nonexistentuser", "anypassword"))
            .await;
        let wrong = store
            .user_by_credentials(&Credentials::basic("testuser", "wrongpassword"))
            .await;

        assert!(matches!(unknown, Ok(None)));
        assert!(matches!(wrong, Ok(None)));
    }

    #[tokio::test]
    async fn test_missing_or_empty_fields_are_a_miss() {
        let store = setup_test_store().await;

        let missing_password = Credentials::new().with(Credentials::USER_NAME, "testuser");
        assert!(
            store
                .user_by_credentials(&missing_password)
                .await
                .unwrap()
                .is_none()
        );

        assert!(
            store
                .user_by_credentials(&Credentials::basic("", ""))
                .await
                .unwrap()
                .is_none()
        );

        let wrong_fields = Credentials::new()
            .with("user", "testuser")
            .with("pass", "password123");
        assert!(
            store
                .user_by_credentials(&wrong_fields)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_special_characters_in_credentials() {
        let store = LocalUserStore::new();

        store
            .add_user(
                "user-9",
                "user@domain.com".to_string(),
                "p@ssw0rd!#$%".to_string(),
                None,
                None,
            )
            .await
            .unwrap();

        let found = store
            .user_by_credentials(&Credentials::basic("user@domain.com", "p@ssw0rd!#$%"))
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.id), Some(AuthId::from("user-9")));

        // Test with SQL injection-like patterns (should be safely handled)
        let injection = store
            .user_by_credentials(&Credentials::basic(
                "user@domain.com'; DROP TABLE users; --",
                "p@ssw0rd!#$%",
            ))
            .await
            .unwrap();
        assert!(injection.is_none());
    }

    #[tokio::test]
    async fn test_access_tokens_resolve_until_revoked() {
        let store = setup_test_store().await;
        let alice = AuthId::from(2);

        let token = store
            .issue_access_token(&alice, AccessTokenKind::Api, None)
            .await
            .unwrap();
        assert_eq!(token.kind, AccessTokenKind::Api);
        assert!(token.expires_at > Utc::now() + Duration::seconds(1700));

        let identity = store
            .user_by_credentials(&Credentials::token(token.token.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.id, alice);

        store.revoke_access_token(&token.token).await.unwrap();
        assert!(
            store
                .user_by_credentials(&Credentials::token(token.token))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_expired_access_tokens_are_ignored_and_cleaned_up() {
        let store = setup_test_store().await;

        let token = store
            .issue_access_token(
                &AuthId::from(1),
                AccessTokenKind::Page,
                Some(Duration::seconds(-5)),
            )
            .await
            .unwrap();

        assert!(
            store
                .user_by_credentials(&Credentials::token(token.token))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.cleanup_expired_tokens().await, 1);
    }

    #[tokio::test]
    async fn test_tokens_are_only_issued_for_known_users() {
        let store = setup_test_store().await;
        assert!(
            store
                .issue_access_token(&AuthId::from(99), AccessTokenKind::Login, None)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_lookup_by_id() {
        let store = setup_test_store().await;
        let alice = store.user_by_id(&AuthId::from(2)).await.unwrap().unwrap();
        assert_eq!(alice.record["username"], "alice");
        assert!(store.user_by_id(&AuthId::from(3)).await.unwrap().is_none());

        store.remove_user("alice").await.unwrap();
        assert!(store.user_by_id(&AuthId::from(2)).await.unwrap().is_none());
    }
}
