//! Session/Identity Gateway.
//!
//! Wraps the identity provider, tracks the current session, and keeps the
//! Profile Store in step with it: signing in loads the profile, signing out
//! clears it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::ports::{
    AuthEvent, AuthEventKind, AuthUser, IdentityProvider, OAuthRedirect, OAuthRequest, Session,
    SignUp,
};
use crate::profile_store::ProfileStore;

/// Upper bound on the initial session lookup before `is_loading` is forced off.
pub const INIT_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session: Option<Session>,
    /// True until the initial session lookup settles or times out.
    pub is_loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session: None,
            is_loading: true,
        }
    }
}

impl SessionState {
    pub fn user(&self) -> Option<&AuthUser> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn,
    /// Account created; the provider wants the email confirmed before sign-in.
    ConfirmationRequired,
}

#[derive(Clone)]
pub struct SessionGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<ProfileStore>,
    state: watch::Sender<SessionState>,
    init_timeout: Duration,
}

impl SessionGateway {
    pub fn new(identity: Arc<dyn IdentityProvider>, profiles: Arc<ProfileStore>) -> Self {
        Self::with_init_timeout(identity, profiles, INIT_SESSION_TIMEOUT)
    }

    pub fn with_init_timeout(
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<ProfileStore>,
        init_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                identity,
                profiles,
                state: watch::Sender::new(SessionState::default()),
                init_timeout,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    /// Resolve the session the provider already holds.
    ///
    /// Returns once the lookup settles or the init timeout passes, whichever
    /// comes first. After a timeout `is_loading` is off, and a late answer
    /// is still applied when it arrives.
    pub async fn resolve_initial_session(&self) {
        let gateway = self.clone();
        let mut lookup = tokio::spawn(async move { gateway.load_initial_session().await });

        match tokio::time::timeout(self.inner.init_timeout, &mut lookup).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "session lookup task failed");
                self.set_loading(false);
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.inner.init_timeout.as_millis() as u64,
                    "session lookup timed out; continuing signed out"
                );
                self.set_loading(false);
            }
        }
    }

    /// Raw provider events, for components that follow sign-in and sign-out.
    pub fn provider_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.identity.subscribe()
    }

    /// Follow provider session events until the provider goes away.
    pub fn listen(&self) -> JoinHandle<()> {
        let mut events = self.inner.identity.subscribe();
        let gateway = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => gateway.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn handle_event(&self, event: AuthEvent) {
        debug!(kind = ?event.kind, "session event");
        match (event.kind, event.session) {
            (AuthEventKind::SignedIn, Some(session)) => {
                if self.holds(&session) {
                    return;
                }
                self.on_signed_in(session).await;
            }
            (AuthEventKind::SignedOut, _) => self.on_signed_out(),
            (AuthEventKind::TokenRefreshed | AuthEventKind::UserUpdated, Some(session)) => {
                self.inner.state.send_modify(|s| s.session = Some(session));
            }
            (kind, None) => {
                debug!(kind = ?kind, "session event without session ignored");
            }
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let request = SignUp {
            email: email.trim().to_string(),
            password: password.to_string(),
            username: display_name.trim().to_string(),
        };
        match self.inner.identity.sign_up(&request).await? {
            Some(session) => {
                self.on_signed_in(session).await;
                Ok(SignUpOutcome::SignedIn)
            }
            None => {
                info!(email = %request.email, "sign-up awaiting email confirmation");
                Ok(SignUpOutcome::ConfirmationRequired)
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let session = self
            .inner
            .identity
            .sign_in_with_password(email.trim(), password)
            .await?;
        self.on_signed_in(session).await;
        Ok(())
    }

    /// Start third-party sign-in; send the user to the returned URL and hand
    /// the URL they land on to [`SessionGateway::complete_external_login`].
    pub async fn login_with_external_provider(
        &self,
        redirect_to: Option<String>,
    ) -> Result<OAuthRedirect, AuthError> {
        self.inner
            .identity
            .sign_in_with_oauth(&OAuthRequest::google(redirect_to))
            .await
    }

    pub async fn complete_external_login(&self, callback_url: &str) -> Result<(), AuthError> {
        let session = self.inner.identity.complete_oauth(callback_url).await?;
        self.on_signed_in(session).await;
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.inner.identity.sign_out().await?;
        self.on_signed_out();
        Ok(())
    }

    pub fn reset(&self) {
        self.inner.state.send_replace(SessionState::default());
    }

    async fn load_initial_session(&self) {
        match self.inner.identity.get_session().await {
            Ok(Some(session)) => self.on_signed_in(session).await,
            Ok(None) => self.set_loading(false),
            Err(err) => {
                warn!(error = %err, "auth load failed");
                self.set_loading(false);
            }
        }
    }

    async fn on_signed_in(&self, session: Session) {
        info!(user_id = %session.user.id, "signed in");
        self.inner.state.send_modify(|s| {
            s.session = Some(session);
            s.is_loading = false;
        });
        // failures are recorded on the profile store itself
        if let Err(err) = self.inner.profiles.fetch().await {
            warn!(error = %err, "profile load after sign-in failed");
        }
    }

    fn on_signed_out(&self) {
        info!("signed out");
        self.inner.state.send_modify(|s| {
            s.session = None;
            s.is_loading = false;
        });
        self.inner.profiles.clear();
    }

    fn holds(&self, session: &Session) -> bool {
        self.inner
            .state
            .borrow()
            .session
            .as_ref()
            .is_some_and(|current| current.access_token == session.access_token)
    }

    fn set_loading(&self, loading: bool) {
        self.inner.state.send_if_modified(|s| {
            let changed = s.is_loading != loading;
            s.is_loading = loading;
            changed
        });
    }
}
