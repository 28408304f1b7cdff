//! Authorization state kept in the caller's session between the redirect
//! to the identity provider and the callback.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session key holding the pending [`OAuthState`].
pub const SESSION_OAUTH_STATE: &str = "auth.oauth.state";

/// Session key set once an authorization was started; from then on every
/// callback must present a live, matching state.
pub const SESSION_OAUTH_STARTED: &str = "auth.oauth.started";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthState {
    pub state: String,
    pub redirect_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OAuthState {
    pub fn new(redirect_uri: Option<String>, ttl: Duration) -> Self {
        let created_at = Utc::now();

        Self {
            state: Uuid::new_v4().to_string(),
            redirect_uri,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// True when `state` is this one and it has not expired.
    pub fn matches(&self, state: &str) -> bool {
        !self.is_expired() && self.state == state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_matches_until_expiry() {
        let state = OAuthState::new(Some("http://localhost:3000/callback".to_string()), Duration::minutes(5));
        assert!(state.matches(&state.state));
        assert!(!state.matches("something-else"));

        let mut expired = state.clone();
        expired.expires_at = Utc::now() - Duration::minutes(1);
        assert!(!expired.matches(&expired.state));
    }
}
