//! Profile Store: the signed-in user's profile, with optimistic XP preview.

use std::sync::Arc;

use dojo_core::{Profile, RankTier};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::ports::{IdentityProvider, RemoteStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileState {
    pub profile: Option<Profile>,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub struct ProfileStore {
    identity: Arc<dyn IdentityProvider>,
    remote: Arc<dyn RemoteStore>,
    state: watch::Sender<ProfileState>,
}

impl ProfileStore {
    pub fn new(identity: Arc<dyn IdentityProvider>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            identity,
            remote,
            state: watch::Sender::new(ProfileState::default()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ProfileState {
        self.state.borrow().clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    pub fn xp(&self) -> Option<u32> {
        self.state.borrow().profile.as_ref().map(|p| p.xp)
    }

    pub fn rank(&self) -> Option<RankTier> {
        self.state.borrow().profile.as_ref().map(|p| p.rank)
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Load the current user's profile.
    ///
    /// No identity means signed out: the local profile is cleared and that is
    /// not an error. A failed lookup keeps whatever was loaded before.
    pub async fn fetch(&self) -> Result<(), StoreError> {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let user = match self.identity.get_user().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.state.send_modify(|s| {
                    s.profile = None;
                    s.is_loading = false;
                });
                return Ok(());
            }
            Err(err) => return Err(self.record_failure(err.into())),
        };

        match self.remote.fetch_profile(&user.id).await {
            Ok(profile) => {
                debug!(user_id = %profile.id, xp = profile.xp, rank = %profile.rank, "profile loaded");
                self.state.send_modify(|s| {
                    s.profile = Some(profile);
                    s.is_loading = false;
                });
                Ok(())
            }
            Err(err) => Err(self.record_failure(err.into())),
        }
    }

    /// Optimistic XP preview: add `earned` and overwrite the tier with
    /// `new_tier` as given. No-op without a loaded profile.
    pub fn apply_xp_delta(&self, earned: u32, new_tier: RankTier) {
        self.state.send_if_modified(|s| match s.profile.as_mut() {
            Some(profile) => {
                profile.apply_xp_delta(earned, new_tier);
                true
            }
            None => false,
        });
    }

    /// Drop the local profile (sign-out).
    pub fn clear(&self) {
        self.state.send_modify(|s| s.profile = None);
    }

    pub fn reset(&self) {
        self.state.send_replace(ProfileState::default());
    }

    fn record_failure(&self, err: StoreError) -> StoreError {
        warn!(error = %err, "profile fetch failed");
        let message = err.to_string();
        self.state.send_modify(|s| {
            s.error = Some(message);
            s.is_loading = false;
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, Operation};

    async fn signed_in_store(xp: u32) -> (Arc<InMemoryBackend>, ProfileStore) {
        let backend = Arc::new(InMemoryBackend::new());
        let user = backend.add_account("kenji@dojo.test", "hunter22", "kenji");
        backend.set_profile_xp(&user, xp);
        backend.seed_session(&user);
        let store = ProfileStore::new(backend.clone(), backend.clone());
        (backend, store)
    }

    #[tokio::test]
    async fn fetch_loads_profile_for_current_identity() {
        let (_backend, store) = signed_in_store(1600).await;
        store.fetch().await.unwrap();

        let profile = store.profile().unwrap();
        assert_eq!(profile.username, "kenji");
        assert_eq!(profile.rank, RankTier::Warrior);
        assert!(!store.snapshot().is_loading);
    }

    #[tokio::test]
    async fn fetch_without_identity_clears_quietly() {
        let (backend, store) = signed_in_store(10).await;
        store.fetch().await.unwrap();
        assert!(store.profile().is_some());

        backend.clear_session();
        store.fetch().await.unwrap();
        assert!(store.profile().is_none());
        assert!(store.error().is_none());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_prior_profile() {
        let (backend, store) = signed_in_store(700).await;
        store.fetch().await.unwrap();

        backend.fail_next(Operation::FetchProfile, "connection reset");
        let err = store.fetch().await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(store.xp(), Some(700));
        assert_eq!(store.error().as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn xp_delta_needs_a_profile() {
        let (_backend, store) = signed_in_store(480).await;
        store.apply_xp_delta(30, RankTier::Disciple);
        assert!(store.profile().is_none());

        store.fetch().await.unwrap();
        store.apply_xp_delta(30, RankTier::Disciple);
        assert_eq!(store.xp(), Some(510));
        assert_eq!(store.rank(), Some(RankTier::Disciple));

        store.clear();
        assert!(store.profile().is_none());
    }
}
