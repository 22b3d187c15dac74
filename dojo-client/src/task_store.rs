//! Task Store: the signed-in user's katas, kept in sync with the remote store.
//!
//! Every mutation lands in local state before the remote call is awaited.
//! When the remote call fails the store compensates:
//! - add: drop the provisional row
//! - update: reload everything
//! - delete: restore the snapshot taken before the removal
//! - complete: reload katas and the profile
//!
//! Nothing is retried. The failure is returned to the caller and also kept in
//! the state's `error` field.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dojo_core::{
    rank_from_xp, xp_for_completion, RankTier, Task, TaskDraft, TaskId, TaskPatch, TaskStatus,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::locks::EntityLocks;
use crate::ports::{AuthUser, IdentityProvider, RemoteStore};
use crate::profile_store::ProfileStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskState {
    /// Ascending by start time as fetched; provisional rows are appended.
    pub tasks: Vec<Task>,
    pub active_task_id: Option<TaskId>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl TaskState {
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.active_task_id.as_ref().and_then(|id| self.get(id))
    }

    fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }
}

/// Outcome of striking the gong, as previewed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub task_id: TaskId,
    pub earned_xp: u32,
    /// Total after the award; `None` when no profile was loaded to add to.
    pub xp_after: Option<u32>,
    pub previous_rank: RankTier,
    pub new_rank: RankTier,
}

impl Completion {
    pub fn ranked_up(&self) -> bool {
        self.new_rank > self.previous_rank
    }
}

pub struct TaskStore {
    identity: Arc<dyn IdentityProvider>,
    remote: Arc<dyn RemoteStore>,
    profiles: Arc<ProfileStore>,
    state: watch::Sender<TaskState>,
    locks: EntityLocks,
    provisional_seq: AtomicU64,
}

impl TaskStore {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        remote: Arc<dyn RemoteStore>,
        profiles: Arc<ProfileStore>,
    ) -> Self {
        Self {
            identity,
            remote,
            profiles,
            state: watch::Sender::new(TaskState::default()),
            locks: EntityLocks::new(),
            provisional_seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> TaskState {
        self.state.borrow().clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.borrow().tasks.clone()
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.state.borrow().get(id).cloned()
    }

    pub fn active_task_id(&self) -> Option<TaskId> {
        self.state.borrow().active_task_id.clone()
    }

    pub fn active_task(&self) -> Option<Task> {
        self.state.borrow().active_task().cloned()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Replace the local collection with the user's katas from the remote store.
    ///
    /// Signed out is not a failure: the collection and the active pointer
    /// are cleared.
    pub async fn fetch(&self) -> Result<(), StoreError> {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let user = match self.identity.get_user().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("no identity; clearing katas");
                self.state.send_modify(|s| {
                    s.tasks.clear();
                    s.active_task_id = None;
                    s.is_loading = false;
                });
                return Ok(());
            }
            Err(err) => return Err(self.record_failure(err.into())),
        };

        match self.remote.list_tasks(&user.id).await {
            Ok(tasks) => {
                debug!(count = tasks.len(), "katas loaded");
                self.state.send_modify(|s| {
                    s.tasks = tasks;
                    s.is_loading = false;
                    let dangling = s.active_task_id.as_ref().is_some_and(|id| s.get(id).is_none());
                    if dangling {
                        s.active_task_id = None;
                    }
                });
                Ok(())
            }
            Err(err) => Err(self.record_failure(err.into())),
        }
    }

    /// Create a kata. A provisional row shows up immediately and is swapped
    /// for the server's row once the insert is confirmed.
    pub async fn add(&self, draft: TaskDraft) -> Result<Task, StoreError> {
        draft.validate()?;
        let user = self.require_user().await?;

        let temp_id = self.next_provisional_id();
        let provisional = Task::provisional(temp_id.clone(), user.id.clone(), &draft, Utc::now());
        debug!(task_id = %temp_id, title = %provisional.title, "optimistic insert");
        self.state.send_modify(|s| s.tasks.push(provisional));

        match self.remote.insert_task(&draft.to_new_task(user.id)).await {
            Ok(created) => {
                debug!(temp_id = %temp_id, task_id = %created.id, "insert confirmed");
                let confirmed = created.clone();
                self.state.send_modify(|s| {
                    match s.tasks.iter_mut().find(|t| t.id == temp_id) {
                        Some(slot) => *slot = confirmed,
                        None => debug!(temp_id = %temp_id, "provisional row already gone"),
                    }
                    if s.active_task_id.as_ref() == Some(&temp_id) {
                        s.active_task_id = Some(created.id.clone());
                    }
                });
                Ok(created)
            }
            Err(err) => {
                warn!(temp_id = %temp_id, error = %err, "insert failed; dropping provisional row");
                self.state.send_modify(|s| {
                    s.tasks.retain(|t| t.id != temp_id);
                    if s.active_task_id.as_ref() == Some(&temp_id) {
                        s.active_task_id = None;
                    }
                });
                Err(self.record_failure(err.into()))
            }
        }
    }

    /// Apply a partial update. On remote failure the whole collection is
    /// reloaded rather than rolled back field by field.
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let _slot = self.locks.acquire(id).await;

        if let Some(task) = self.get(id) {
            patch.validate_against(&task)?;
        }

        self.state.send_modify(|s| {
            if let Some(task) = s.get_mut(id) {
                patch.apply_to(task);
            }
            let settled = patch.status.is_some_and(TaskStatus::is_settled);
            if settled && s.active_task_id.as_ref() == Some(id) {
                s.active_task_id = None;
            }
        });

        match self.remote.update_task(id, &patch).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(task_id = %id, error = %err, "update failed; resynchronizing");
                self.resync_tasks().await;
                Err(self.record_failure(err.into()))
            }
        }
    }

    /// Remove a kata. On remote failure the exact prior collection is put back.
    pub async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let _slot = self.locks.acquire(id).await;

        let (previous_tasks, previous_active) = {
            let s = self.state.borrow();
            (s.tasks.clone(), s.active_task_id.clone())
        };
        self.state.send_modify(|s| {
            s.tasks.retain(|t| &t.id != id);
            if s.active_task_id.as_ref() == Some(id) {
                s.active_task_id = None;
            }
        });

        match self.remote.delete_task(id).await {
            Ok(()) => {
                debug!(task_id = %id, "delete confirmed");
                Ok(())
            }
            Err(err) => {
                warn!(task_id = %id, error = %err, "delete failed; restoring snapshot");
                self.state.send_modify(|s| {
                    s.tasks = previous_tasks;
                    s.active_task_id = previous_active;
                });
                Err(self.record_failure(err.into()))
            }
        }
    }

    /// Strike the gong: mark the kata completed and preview the XP award.
    ///
    /// Returns `None` when the kata is unknown or already completed. Only the
    /// task status is written remotely; the remote store recomputes profile XP
    /// on its own, so the local XP is a preview that the next profile fetch
    /// overwrites.
    pub async fn complete(&self, id: &TaskId) -> Result<Option<Completion>, StoreError> {
        let _slot = self.locks.acquire(id).await;

        let Some(task) = self.get(id) else {
            debug!(task_id = %id, "gong struck for unknown kata");
            return Ok(None);
        };
        if task.status == TaskStatus::Completed {
            return Ok(None);
        }

        let earned = xp_for_completion(task.priority, task.allocated_minutes);
        let current_xp = self.profiles.xp();
        let previous_rank = self
            .profiles
            .rank()
            .unwrap_or_else(|| rank_from_xp(current_xp.unwrap_or(0)));
        let xp_after = current_xp.map(|xp| xp.saturating_add(earned));
        let new_rank = xp_after.map_or(previous_rank, rank_from_xp);

        self.state.send_modify(|s| {
            if let Some(t) = s.get_mut(id) {
                t.status = TaskStatus::Completed;
            }
            if s.active_task_id.as_ref() == Some(id) {
                s.active_task_id = None;
            }
        });
        self.profiles.apply_xp_delta(earned, new_rank);
        info!(task_id = %id, earned, xp_after = ?xp_after, rank = %new_rank, "gong struck");

        match self.remote.update_task(id, &TaskPatch::status(TaskStatus::Completed)).await {
            Ok(()) => Ok(Some(Completion {
                task_id: id.clone(),
                earned_xp: earned,
                xp_after,
                previous_rank,
                new_rank,
            })),
            Err(err) => {
                warn!(task_id = %id, error = %err, "completion failed; discarding preview");
                self.resync_tasks().await;
                if let Err(profile_err) = self.profiles.fetch().await {
                    warn!(error = %profile_err, "profile resync failed");
                }
                Err(self.record_failure(err.into()))
            }
        }
    }

    /// Point the focus at a kata, or clear it with `None`.
    ///
    /// Only katas present locally with status pending or active qualify.
    pub fn set_active(&self, id: Option<&TaskId>) -> Result<(), StoreError> {
        let Some(id) = id else {
            self.state.send_if_modified(|s| s.active_task_id.take().is_some());
            return Ok(());
        };

        let status = self
            .state
            .borrow()
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        if !status.can_activate() {
            return Err(StoreError::TaskNotActivatable {
                id: id.clone(),
                status,
            });
        }

        self.state.send_modify(|s| s.active_task_id = Some(id.clone()));
        Ok(())
    }

    pub fn reset(&self) {
        self.state.send_replace(TaskState::default());
    }

    async fn require_user(&self) -> Result<AuthUser, StoreError> {
        match self.identity.get_user().await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(self.record_failure(StoreError::NotAuthenticated)),
            Err(err) => Err(self.record_failure(err.into())),
        }
    }

    async fn resync_tasks(&self) {
        if let Err(err) = self.fetch().await {
            warn!(error = %err, "kata resync failed");
        }
    }

    fn next_provisional_id(&self) -> TaskId {
        let seq = self.provisional_seq.fetch_add(1, Ordering::Relaxed);
        TaskId::provisional(Utc::now().timestamp_millis(), seq)
    }

    fn record_failure(&self, err: StoreError) -> StoreError {
        let message = err.to_string();
        self.state.send_modify(|s| {
            s.error = Some(message);
            s.is_loading = false;
        });
        err
    }
}
