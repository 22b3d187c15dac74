//! Today / upcoming kata lists.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

use crate::task::Task;
use crate::time::local_day_bounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KataView {
    /// Starts within the local calendar day.
    #[default]
    Today,
    /// Starts at or after local midnight tomorrow.
    Upcoming,
    All,
}

impl KataView {
    pub fn includes(self, task: &Task, now: DateTime<Utc>, tz: Tz) -> bool {
        let (today, tomorrow) = local_day_bounds(now, tz);
        match self {
            KataView::Today => task.start_time >= today && task.start_time < tomorrow,
            KataView::Upcoming => task.start_time >= tomorrow,
            KataView::All => true,
        }
    }

    /// Filter, keeping store order.
    pub fn select<'a>(self, tasks: &'a [Task], now: DateTime<Utc>, tz: Tz) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.includes(t, now, tz)).collect()
    }

    pub fn heading(self) -> &'static str {
        match self {
            KataView::Today => "Today's Katas",
            KataView::Upcoming => "Upcoming Training",
            KataView::All => "All Katas",
        }
    }

    pub fn empty_message(self) -> &'static str {
        match self {
            KataView::Today => "No Katas scheduled for today. Add one to begin training!",
            KataView::Upcoming => "No upcoming Katas scheduled.",
            KataView::All => "No Katas yet.",
        }
    }
}

impl FromStr for KataView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "today" | "daily" => Ok(KataView::Today),
            "upcoming" => Ok(KataView::Upcoming),
            "all" => Ok(KataView::All),
            other => Err(format!("unknown view '{other}' (expected today, upcoming or all)")),
        }
    }
}

impl fmt::Display for KataView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KataView::Today => "today",
            KataView::Upcoming => "upcoming",
            KataView::All => "all",
        })
    }
}
