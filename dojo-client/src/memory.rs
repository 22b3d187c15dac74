//! In-memory identity provider and remote store.
//!
//! Behaves like the hosted backend closely enough for store tests: rows are
//! scoped by owner, tasks come back ordered by start time, and writing a task
//! as completed bumps the owner's profile XP the way the server trigger does.
//! Any operation can be told to fail once, or be held until released so a
//! test can look at optimistic state mid-flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dojo_core::{
    allocated_minutes, rank_from_xp, xp_for_completion, NewTask, Profile, Task, TaskId, TaskPatch,
    TaskStatus, UserId,
};
use tokio::sync::{broadcast, watch};

use crate::error::{AuthError, RemoteError};
use crate::ports::{
    AuthEvent, AuthUser, IdentityProvider, OAuthRedirect, OAuthRequest, RemoteStore, Session,
    SignUp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSession,
    SignUp,
    SignIn,
    SignOut,
    CompleteOAuth,
    ListTasks,
    InsertTask,
    UpdateTask,
    DeleteTask,
    FetchProfile,
}

#[derive(Debug, Clone)]
struct Account {
    email: String,
    password: String,
    user: AuthUser,
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: Vec<Account>,
    session: Option<Session>,
    tasks: Vec<Task>,
    profiles: HashMap<UserId, Profile>,
    failures: HashMap<Operation, String>,
    calls: HashMap<Operation, usize>,
    next_id: u64,
    require_confirmation: bool,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn open_session(&mut self, user: AuthUser) -> Session {
        let n = self.next_id();
        let session = Session {
            access_token: format!("memory:{}:{n}", user.id),
            refresh_token: Some(format!("refresh-{n}")),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            user,
        };
        self.session = Some(session.clone());
        session
    }

    fn account_by_id(&self, id: &UserId) -> Option<&Account> {
        self.accounts.iter().find(|a| &a.user.id == id)
    }
}

pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    held: watch::Sender<HashSet<Operation>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MemoryState::default()),
            held: watch::Sender::new(HashSet::new()),
            events,
        }
    }

    /// Register an account with a fresh Initiate profile.
    pub fn add_account(&self, email: &str, password: &str, username: &str) -> UserId {
        let mut state = self.lock();
        let id = UserId::new(format!("user-{}", state.next_id()));
        Self::insert_account(&mut state, email, password, username, id.clone());
        id
    }

    pub fn set_profile_xp(&self, user: &UserId, xp: u32) {
        let mut state = self.lock();
        if let Some(profile) = state.profiles.get_mut(user) {
            profile.xp = xp;
            profile.rank = rank_from_xp(xp);
        }
    }

    /// Start a session for `user` without emitting an event, as if it had
    /// been persisted by an earlier run.
    pub fn seed_session(&self, user: &UserId) {
        let mut state = self.lock();
        if let Some(account) = state.account_by_id(user).cloned() {
            state.open_session(account.user);
        }
    }

    pub fn clear_session(&self) {
        self.lock().session = None;
    }

    /// Store a row as if it already existed remotely.
    pub fn seed_task(&self, task: Task) {
        self.lock().tasks.push(task);
    }

    pub fn stored_tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    pub fn stored_profile(&self, user: &UserId) -> Option<Profile> {
        self.lock().profiles.get(user).cloned()
    }

    pub fn require_email_confirmation(&self, required: bool) {
        self.lock().require_confirmation = required;
    }

    /// Make the next call of `op` fail with `message`.
    pub fn fail_next(&self, op: Operation, message: &str) {
        self.lock().failures.insert(op, message.to_string());
    }

    /// Park every call of `op` until [`InMemoryBackend::release`].
    pub fn hold(&self, op: Operation) {
        self.held.send_modify(|held| {
            held.insert(op);
        });
    }

    pub fn release(&self, op: Operation) {
        self.held.send_modify(|held| {
            held.remove(&op);
        });
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// URL the OAuth provider would redirect `user` back to.
    pub fn oauth_callback_for(&self, user: &UserId) -> String {
        format!(
            "http://localhost:3000/#access_token=memory:{user}:oauth&refresh_token=r&expires_in=3600&token_type=bearer"
        )
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_account(
        state: &mut MemoryState,
        email: &str,
        password: &str,
        username: &str,
        id: UserId,
    ) -> AuthUser {
        let user = AuthUser {
            id: id.clone(),
            email: Some(email.to_string()),
            username: Some(username.to_string()),
        };
        state.accounts.push(Account {
            email: email.to_string(),
            password: password.to_string(),
            user: user.clone(),
        });
        state
            .profiles
            .insert(id.clone(), Profile::new(id, username, Utc::now()));
        user
    }

    /// Count the call, wait while held, then consume an injected failure.
    async fn enter(&self, op: Operation) -> Result<(), String> {
        *self.lock().calls.entry(op).or_default() += 1;

        let mut held = self.held.subscribe();
        let released = held.wait_for(|ops| !ops.contains(&op)).await.is_ok();
        if !released {
            return Err("backend dropped".to_string());
        }

        match self.lock().failures.remove(&op) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    fn emit(&self, event: AuthEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl IdentityProvider for InMemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        self.enter(Operation::GetSession).await.map_err(AuthError::rejected)?;
        Ok(self.lock().session.clone())
    }

    async fn sign_up(&self, request: &SignUp) -> Result<Option<Session>, AuthError> {
        self.enter(Operation::SignUp).await.map_err(AuthError::rejected)?;
        let session = {
            let mut state = self.lock();
            if state.accounts.iter().any(|a| a.email == request.email) {
                return Err(AuthError::rejected("User already registered"));
            }
            let id = UserId::new(format!("user-{}", state.next_id()));
            let user = Self::insert_account(
                &mut state,
                &request.email,
                &request.password,
                &request.username,
                id,
            );
            if state.require_confirmation {
                return Ok(None);
            }
            state.open_session(user)
        };
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        self.enter(Operation::SignIn).await.map_err(AuthError::rejected)?;
        let session = {
            let mut state = self.lock();
            let user = state
                .accounts
                .iter()
                .find(|a| a.email == email && a.password == password)
                .map(|a| a.user.clone())
                .ok_or_else(|| AuthError::rejected("Invalid login credentials"))?;
            state.open_session(user)
        };
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<OAuthRedirect, AuthError> {
        let mut url = format!("memory://auth/authorize?provider={}", request.provider.as_str());
        if let Some(redirect) = &request.redirect_to {
            url.push_str(&format!("&redirect_to={redirect}"));
        }
        for (key, value) in &request.query_params {
            url.push_str(&format!("&{key}={value}"));
        }
        Ok(OAuthRedirect { url })
    }

    async fn complete_oauth(&self, callback_url: &str) -> Result<Session, AuthError> {
        self.enter(Operation::CompleteOAuth).await.map_err(AuthError::rejected)?;
        let fragment = callback_url
            .split_once('#')
            .map(|(_, f)| f)
            .ok_or_else(|| AuthError::callback("missing URL fragment"))?;
        let token = fragment
            .split('&')
            .find_map(|pair| pair.strip_prefix("access_token="))
            .ok_or_else(|| AuthError::callback("missing access_token"))?;
        let user_id = token
            .strip_prefix("memory:")
            .and_then(|rest| rest.split(':').next())
            .ok_or_else(|| AuthError::callback("unrecognised access_token"))?;

        let session = {
            let mut state = self.lock();
            let user = state
                .account_by_id(&UserId::new(user_id))
                .map(|a| a.user.clone())
                .ok_or_else(|| AuthError::rejected("User not found"))?;
            state.open_session(user)
        };
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.enter(Operation::SignOut).await.map_err(AuthError::rejected)?;
        self.lock().session = None;
        self.emit(AuthEvent::signed_out());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RemoteStore for InMemoryBackend {
    async fn list_tasks(&self, owner: &UserId) -> Result<Vec<Task>, RemoteError> {
        self.enter(Operation::ListTasks).await.map_err(RemoteError::rejected)?;
        let mut tasks: Vec<Task> = self
            .lock()
            .tasks
            .iter()
            .filter(|t| &t.user_id == owner)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.start_time);
        Ok(tasks)
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, RemoteError> {
        self.enter(Operation::InsertTask).await.map_err(RemoteError::rejected)?;
        let mut state = self.lock();
        if !state.profiles.contains_key(&task.user_id) {
            return Err(RemoteError::rejected(
                "insert or update on table \"tasks\" violates foreign key constraint \"tasks_user_id_fkey\"",
            ));
        }
        let row = Task {
            id: TaskId::new(format!("task-{}", state.next_id())),
            user_id: task.user_id.clone(),
            title: task.title.clone(),
            priority: task.priority,
            status: task.status,
            start_time: task.start_time,
            end_time: task.end_time,
            allocated_minutes: allocated_minutes(task.start_time, task.end_time),
            created_at: Utc::now(),
        };
        state.tasks.push(row.clone());
        Ok(row)
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError> {
        self.enter(Operation::UpdateTask).await.map_err(RemoteError::rejected)?;
        let mut state = self.lock();
        let Some(task) = state.tasks.iter_mut().find(|t| &t.id == id) else {
            // zero rows matched; not an error for a filtered update
            return Ok(());
        };

        let was_completed = task.status == TaskStatus::Completed;
        patch.apply_to(task);
        let award = (!was_completed && task.status == TaskStatus::Completed)
            .then(|| (task.user_id.clone(), xp_for_completion(task.priority, task.allocated_minutes)));

        // completion trigger
        if let Some((owner, earned)) = award {
            if let Some(profile) = state.profiles.get_mut(&owner) {
                profile.xp = profile.xp.saturating_add(earned);
                profile.rank = rank_from_xp(profile.xp);
                profile.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), RemoteError> {
        self.enter(Operation::DeleteTask).await.map_err(RemoteError::rejected)?;
        self.lock().tasks.retain(|t| &t.id != id);
        Ok(())
    }

    async fn fetch_profile(&self, id: &UserId) -> Result<Profile, RemoteError> {
        self.enter(Operation::FetchProfile).await.map_err(RemoteError::rejected)?;
        self.lock()
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("profile {id}")))
    }
}
