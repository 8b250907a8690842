//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the in-memory login sessions.

use crate::config::Config;
use chat_core::ports::{CredentialStore, NotificationService};
use chat_core::{ChatOrchestrator, ImageStudio, UserDirectory};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// How long a login cookie stays valid.
pub const AUTH_SESSION_DAYS: i64 = 30;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<UserDirectory>,
    pub chat: Arc<ChatOrchestrator>,
    pub images: Arc<ImageStudio>,
    pub credentials: Arc<dyn CredentialStore>,
    pub notifier: Arc<dyn NotificationService>,
    pub auth_sessions: Arc<AuthSessions>,
}

//=========================================================================================
// Login Sessions
//=========================================================================================

struct AuthSession {
    account: String,
    expires_at: DateTime<Utc>,
}

/// Opaque cookie tokens mapped to the account they authenticate.
/// Held in memory, so a restart logs everyone out.
#[derive(Default)]
pub struct AuthSessions {
    sessions: RwLock<HashMap<String, AuthSession>>,
}

impl AuthSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new token for the account.
    pub async fn create(&self, account: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let session = AuthSession {
            account: account.to_string(),
            expires_at: Utc::now() + Duration::days(AUTH_SESSION_DAYS),
        };
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), session);
        token
    }

    /// The account behind a live token.
    pub async fn resolve(&self, token: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.account.clone())
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_resolves_until_revoked() {
        let sessions = AuthSessions::new();
        let token = sessions.create("a@example.com").await;
        assert_eq!(sessions.resolve(&token).await.as_deref(), Some("a@example.com"));
        assert!(sessions.revoke(&token).await);
        assert_eq!(sessions.resolve(&token).await, None);
    }

    #[tokio::test]
    async fn test_expired_token_does_not_resolve() {
        let sessions = AuthSessions::new();
        let token = sessions.create("a@example.com").await;
        sessions.sessions.write().await.get_mut(&token).unwrap().expires_at = Utc::now() - Duration::seconds(1);
        assert_eq!(sessions.resolve(&token).await, None);
    }
}
