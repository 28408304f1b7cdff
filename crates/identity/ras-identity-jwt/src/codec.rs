//! Signed bearer tokens: issue, decode and verify compact HS256 JWS strings.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use ras_identity_core::AuthId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claim carrying the principal id.
pub const USER_ID_CLAIM: &str = "user_id";

/// Claims stamped by the codec itself; caller values under these names are dropped.
pub const REGISTERED_CLAIMS: [&str; 6] = ["jti", "iss", "aud", "iat", "nbf", "exp"];

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token issuer does not match")]
    WrongIssuer,

    #[error("Token audience does not match")]
    WrongAudience,

    #[error("Token was issued in the future")]
    IssuedInFuture,

    #[error("Token is not active yet")]
    NotYetActive,

    #[error("Token has expired")]
    Expired,
}

pub type TokenResult<T> = Result<T, TokenError>;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
    /// Added to `iat` to compute `nbf`.
    pub activation_delay: Duration,
    /// Tolerance applied to every time check.
    pub leeway: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "ras-auth".to_string(),
            audience: "ras-auth".to_string(),
            ttl: Duration::weeks(1),
            activation_delay: Duration::zero(),
            leeway: Duration::zero(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    jti: String,
    iss: String,
    aud: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    #[serde(flatten)]
    claims: serde_json::Map<String, serde_json::Value>,
}

/// A decoded token. Timestamps are Unix epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub id: String,
    pub issuer: String,
    pub audience: String,
    pub issued_at: i64,
    pub not_before: i64,
    pub expires_at: i64,
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl Token {
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }

    /// The `user_id` claim, if present and usable.
    pub fn subject(&self) -> Option<AuthId> {
        self.claim(USER_ID_CLAIM).and_then(AuthId::from_value)
    }
}

impl From<TokenClaims> for Token {
    fn from(claims: TokenClaims) -> Self {
        Self {
            id: claims.jti,
            issuer: claims.iss,
            audience: claims.aud,
            issued_at: claims.iat,
            not_before: claims.nbf,
            expires_at: claims.exp,
            claims: claims.claims,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenCodec {
    config: TokenConfig,
}

impl TokenCodec {
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn issue(
        &self,
        subject: &AuthId,
        claims: serde_json::Map<String, serde_json::Value>,
        ttl: Option<Duration>,
        key: &[u8],
    ) -> TokenResult<String> {
        self.issue_at(Utc::now(), subject, claims, ttl, key)
    }

    /// Issues a token as if the current time were `now`.
    ///
    /// `ttl` falls back to the configured lifetime. The subject is written to
    /// the `user_id` claim and wins over any caller supplied value, as do the
    /// registered claims.
    pub fn issue_at(
        &self,
        now: DateTime<Utc>,
        subject: &AuthId,
        mut claims: serde_json::Map<String, serde_json::Value>,
        ttl: Option<Duration>,
        key: &[u8],
    ) -> TokenResult<String> {
        let issued_at = now.timestamp();
        let ttl = ttl.unwrap_or(self.config.ttl);

        for name in REGISTERED_CLAIMS {
            claims.remove(name);
        }
        claims.insert(USER_ID_CLAIM.to_string(), subject.to_value());

        let payload = TokenClaims {
            jti: token_id(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: issued_at,
            nbf: issued_at + self.config.activation_delay.num_seconds(),
            exp: issued_at + ttl.num_seconds(),
            claims,
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(key),
        )?)
    }

    /// Parses a token without checking its signature or time window.
    pub fn decode(&self, token: &str) -> TokenResult<Token> {
        let mut validation = Self::base_validation();
        validation.insecure_disable_signature_validation();

        let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
        Ok(data.claims.into())
    }

    pub fn verify(&self, token: &str, key: &[u8]) -> bool {
        self.verify_at(Utc::now(), token, key)
    }

    pub fn verify_at(&self, now: DateTime<Utc>, token: &str, key: &[u8]) -> bool {
        self.decode_verified_at(now, token, key).is_ok()
    }

    pub fn decode_verified(&self, token: &str, key: &[u8]) -> TokenResult<Token> {
        self.decode_verified_at(Utc::now(), token, key)
    }

    /// Decodes a token and checks the signature, issuer, audience and time
    /// window, reporting the first check that failed.
    pub fn decode_verified_at(
        &self,
        now: DateTime<Utc>,
        token: &str,
        key: &[u8],
    ) -> TokenResult<Token> {
        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(key),
            &Self::base_validation(),
        )?;
        let token = Token::from(data.claims);

        if token.issuer != self.config.issuer {
            return Err(TokenError::WrongIssuer);
        }
        if token.audience != self.config.audience {
            return Err(TokenError::WrongAudience);
        }

        let now = now.timestamp();
        let leeway = self.config.leeway.num_seconds();

        if token.issued_at > now + leeway {
            return Err(TokenError::IssuedInFuture);
        }
        if token.not_before > now + leeway {
            return Err(TokenError::NotYetActive);
        }
        if token.expires_at < now - leeway {
            return Err(TokenError::Expired);
        }

        Ok(token)
    }

    // Time and audience checks are done by hand so leeway stays exact.
    fn base_validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation
    }
}

fn token_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
