//! dojo-core: domain types and pure computations for the Dojo kata tracker.

pub mod profile;
pub mod rank;
pub mod task;
pub mod time;
pub mod timer;
pub mod views;

pub use profile::{Profile, UserId};
pub use rank::{rank_from_xp, rank_progress, xp_for_completion, xp_to_next_rank, RankTier};
pub use task::{
    allocated_minutes, NewTask, Priority, Task, TaskDraft, TaskId, TaskPatch, TaskStatus,
    ValidationError,
};
pub use timer::{TimerReading, Urgency};
pub use views::KataView;
