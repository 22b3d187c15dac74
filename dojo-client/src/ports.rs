//! Boundary ports: the identity provider and the remote data store.
//!
//! Stores and the session gateway only talk to these traits; adapters
//! (`supabase`, `memory`) plug in behind them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dojo_core::{NewTask, Profile, Task, TaskId, TaskPatch, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{AuthError, RemoteError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
    /// Display name captured at sign-up, if any.
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Session change notification: `(kind, session-or-none)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            kind: AuthEventKind::TokenRefreshed,
            session: Some(session),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

/// Redirect-based third-party sign-in request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRequest {
    pub provider: OAuthProvider,
    pub redirect_to: Option<String>,
    pub query_params: Vec<(String, String)>,
}

impl OAuthRequest {
    /// Google sign-in asking for offline access and an explicit consent screen.
    pub fn google(redirect_to: Option<String>) -> Self {
        Self {
            provider: OAuthProvider::Google,
            redirect_to,
            query_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
        }
    }
}

/// Where to send the user to finish an OAuth sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRedirect {
    pub url: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session, refreshing it first if the adapter can.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    async fn get_user(&self) -> Result<Option<AuthUser>, AuthError> {
        Ok(self.get_session().await?.map(|s| s.user))
    }

    /// Register; returns no session when the provider wants email confirmation first.
    async fn sign_up(&self, request: &SignUp) -> Result<Option<Session>, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, AuthError>;

    /// Start a redirect-based sign-in; the caller sends the user to the URL.
    async fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<OAuthRedirect, AuthError>;

    /// Finish a redirect-based sign-in from the URL the provider redirected to.
    async fn complete_oauth(&self, callback_url: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Row-oriented access to the `tasks` and `profiles` collections.
///
/// Ownership is enforced by the store itself; profile XP is maintained by
/// the store's own logic when a task is written as completed.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Tasks owned by `owner`, ascending by start time.
    async fn list_tasks(&self, owner: &UserId) -> Result<Vec<Task>, RemoteError>;

    async fn insert_task(&self, task: &NewTask) -> Result<Task, RemoteError>;

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError>;

    async fn delete_task(&self, id: &TaskId) -> Result<(), RemoteError>;

    async fn fetch_profile(&self, id: &UserId) -> Result<Profile, RemoteError>;
}
