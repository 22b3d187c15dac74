//! Kata (task) model.
//!
//! A kata is a time-boxed unit of work owned by one user. Rows come back from
//! the remote store in this exact shape, so the serde names match its columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::profile::UserId;
use crate::rank::xp_for_completion;

/// Local validation failures, caught before any store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Kata title must not be empty")]
    EmptyTitle,
    #[error("End time must be after start time")]
    EndNotAfterStart,
    #[error("priority must be 1, 2 or 3 (got {0})")]
    PriorityOutOfRange(u8),
    #[error("unknown priority '{0}' (expected low, medium, high or 1-3)")]
    UnknownPriority(String),
}

/// Opaque task identifier.
///
/// Server-assigned once confirmed; provisional ids carry a `temp-` prefix and
/// never reach the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

const PROVISIONAL_PREFIX: &str = "temp-";

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn provisional(stamp_millis: i64, seq: u64) -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{stamp_millis}-{seq}"))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed katas are closed: no actions, no XP preview.
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_activate(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority ordinal 1..=3, stored as a plain integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::High),
            other => Err(ValidationError::PriorityOutOfRange(other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.as_u8()
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "1" => Ok(Priority::Low),
            "medium" | "2" => Ok(Priority::Medium),
            "high" | "3" => Ok(Priority::High),
            other => Err(ValidationError::UnknownPriority(other.to_string())),
        }
    }
}

/// Whole minutes between start and end, truncated; zero if the interval is inverted.
pub fn allocated_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    let minutes = (end - start).num_minutes().max(0);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Derived server-side from the interval; recomputed locally for
    /// provisional rows and patched intervals.
    #[serde(default)]
    pub allocated_minutes: u32,

    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build the local-only row shown while an insert is in flight.
    pub fn provisional(
        id: TaskId,
        user_id: UserId,
        draft: &TaskDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            title: draft.title.clone(),
            priority: draft.priority,
            status: TaskStatus::Pending,
            start_time: draft.start_time,
            end_time: draft.end_time,
            allocated_minutes: draft.allocated_minutes(),
            created_at: now,
        }
    }

    /// XP this kata would award if the gong were struck now.
    pub fn potential_xp(&self) -> u32 {
        xp_for_completion(self.priority, self.allocated_minutes)
    }
}

/// User-submitted fields for a new kata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub priority: Priority,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TaskDraft {
    pub fn new(
        title: impl Into<String>,
        priority: Priority,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            priority,
            start_time,
            end_time,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.end_time <= self.start_time {
            return Err(ValidationError::EndNotAfterStart);
        }
        Ok(())
    }

    pub fn allocated_minutes(&self) -> u32 {
        allocated_minutes(self.start_time, self.end_time)
    }

    /// Insert payload for the remote store. The server fills id, timestamps
    /// and the derived minutes.
    pub fn to_new_task(&self, user_id: UserId) -> NewTask {
        NewTask {
            user_id,
            title: self.title.trim().to_string(),
            priority: self.priority,
            status: TaskStatus::Pending,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: UserId,
    pub title: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Partial update; only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_interval(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
    }

    /// Check the patch against the row it would land on.
    pub fn validate_against(&self, task: &Task) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(ValidationError::EmptyTitle);
            }
        }
        let start = self.start_time.unwrap_or(task.start_time);
        let end = self.end_time.unwrap_or(task.end_time);
        if end <= start {
            return Err(ValidationError::EndNotAfterStart);
        }
        Ok(())
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(start) = self.start_time {
            task.start_time = start;
        }
        if let Some(end) = self.end_time {
            task.end_time = end;
        }
        if self.start_time.is_some() || self.end_time.is_some() {
            task.allocated_minutes = allocated_minutes(task.start_time, task.end_time);
        }
    }
}
