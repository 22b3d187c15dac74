//! Application root: wires the session gateway and both stores to one
//! identity provider and one remote store.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::ports::{AuthEventKind, IdentityProvider, RemoteStore, Session};
use crate::profile_store::ProfileStore;
use crate::session::{SessionGateway, INIT_SESSION_TIMEOUT};
use crate::task_store::TaskStore;

/// Access token the katas were last loaded under. Keeps a sign-in seen both
/// as a command result and as a provider event to a single fetch.
#[derive(Default)]
struct LoadedFor(Mutex<Option<String>>);

impl LoadedFor {
    /// True when `session` differs from the one already loaded for.
    fn claim(&self, session: &Session) -> bool {
        let mut loaded = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if loaded.as_deref() == Some(session.access_token.as_str()) {
            return false;
        }
        *loaded = Some(session.access_token.clone());
        true
    }

    fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct Dojo {
    session: SessionGateway,
    profiles: Arc<ProfileStore>,
    tasks: Arc<TaskStore>,
    loaded_for: Arc<LoadedFor>,
}

impl Dojo {
    pub fn new(identity: Arc<dyn IdentityProvider>, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_init_timeout(identity, remote, INIT_SESSION_TIMEOUT)
    }

    pub fn with_init_timeout(
        identity: Arc<dyn IdentityProvider>,
        remote: Arc<dyn RemoteStore>,
        init_timeout: Duration,
    ) -> Self {
        let profiles = Arc::new(ProfileStore::new(identity.clone(), remote.clone()));
        let tasks = Arc::new(TaskStore::new(identity.clone(), remote, profiles.clone()));
        let session = SessionGateway::with_init_timeout(identity, profiles.clone(), init_timeout);
        Self {
            session,
            profiles,
            tasks,
            loaded_for: Arc::default(),
        }
    }

    pub fn session(&self) -> &SessionGateway {
        &self.session
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    /// Restore the session and, when signed in, load the katas.
    pub async fn start(&self) {
        self.session.resolve_initial_session().await;
        self.load_katas().await;
    }

    /// Keep state in step with provider events: the gateway handles the
    /// session and profile, and katas are reloaded or dropped alongside.
    pub fn listen(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let gateway = self.session.listen();

        let mut events = self.session.provider_events();
        let tasks = self.tasks.clone();
        let loaded_for = self.loaded_for.clone();
        let follower = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match (event.kind, event.session) {
                        (AuthEventKind::SignedIn, Some(session)) => {
                            if loaded_for.claim(&session) {
                                fetch_katas(&tasks).await;
                            }
                        }
                        (AuthEventKind::SignedOut, _) => {
                            loaded_for.clear();
                            tasks.reset();
                        }
                        _ => {}
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        // missed events may include a sign-in or sign-out
                        warn!(skipped, "kata follower lagged; resyncing");
                        loaded_for.clear();
                        fetch_katas(&tasks).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        (gateway, follower)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.session.login(email, password).await?;
        self.load_katas().await;
        Ok(())
    }

    pub async fn complete_external_login(&self, callback_url: &str) -> Result<(), AuthError> {
        self.session.complete_external_login(callback_url).await?;
        self.load_katas().await;
        Ok(())
    }

    /// Sign out and drop every user-owned piece of local state.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.session.logout().await?;
        self.loaded_for.clear();
        self.tasks.reset();
        Ok(())
    }

    pub fn reset(&self) {
        self.session.reset();
        self.profiles.reset();
        self.loaded_for.clear();
        self.tasks.reset();
    }

    async fn load_katas(&self) {
        let Some(session) = self.session.snapshot().session else {
            return;
        };
        if self.loaded_for.claim(&session) {
            fetch_katas(&self.tasks).await;
        } else {
            debug!("katas already loaded for this session");
        }
    }
}

/// A fetch while signed out clears the store, so lag resyncs are safe.
async fn fetch_katas(tasks: &TaskStore) {
    if let Err(err) = tasks.fetch().await {
        warn!(error = %err, "kata load failed");
    }
}
