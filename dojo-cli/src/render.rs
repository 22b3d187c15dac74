//! Plain-text rendering for katas and the profile card.

use chrono_tz::Tz;

use dojo_client::Completion;
use dojo_core::time::format_local_hm;
use dojo_core::{rank_progress, Profile, Task, TaskStatus};

fn status_mark(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "○",
        TaskStatus::Active => "▶",
        TaskStatus::Completed => "✓",
        TaskStatus::Failed => "✗",
    }
}

pub fn flames(task: &Task) -> String {
    "🔥".repeat(usize::from(task.priority.as_u8()))
}

/// One line per kata: marker, status, local time range, length, priority,
/// potential XP while still open, title and id.
pub fn kata_line(task: &Task, is_active: bool, tz: Tz) -> String {
    let pointer = if is_active { "*" } else { " " };
    let xp = if task.status.is_settled() {
        String::new()
    } else {
        format!("+{} XP", task.potential_xp())
    };
    format!(
        "{pointer} {} {:<9} {}–{} {:>4}m {:<6} {:<7} {}  [{}]",
        status_mark(task.status),
        task.status.as_str(),
        format_local_hm(task.start_time, tz),
        format_local_hm(task.end_time, tz),
        task.allocated_minutes,
        flames(task),
        xp,
        task.title,
        task.id,
    )
}

pub fn profile_card(profile: &Profile) -> Vec<String> {
    let mut lines = vec![
        profile.display_name().to_string(),
        format!("Rank: {}", profile.rank),
        format!("XP:   {}", profile.xp),
    ];
    match profile.xp_to_next_rank() {
        Some(needed) => {
            let pct = (rank_progress(profile.xp) * 100.0).round();
            lines.push(format!("Next: {needed} XP to go ({pct}% through this rank)"));
        }
        None => lines.push("Next: highest rank reached".to_string()),
    }
    lines
}

pub fn completion_lines(completion: &Completion) -> Vec<String> {
    let mut lines = vec![match completion.xp_after {
        Some(total) => format!("GONG! +{} XP ({total} total)", completion.earned_xp),
        None => format!("GONG! +{} XP", completion.earned_xp),
    }];
    if completion.ranked_up() {
        lines.push(format!(
            "Rank up: {} → {}",
            completion.previous_rank, completion.new_rank
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use dojo_core::{Priority, RankTier, TaskId, UserId};

    fn kata(status: TaskStatus) -> Task {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        Task {
            id: TaskId::new("k1"),
            user_id: UserId::new("u1"),
            title: "Morning kata".to_string(),
            priority: Priority::Medium,
            status,
            start_time: start,
            end_time: start + Duration::minutes(45),
            allocated_minutes: 45,
            created_at: start,
        }
    }

    #[test]
    fn open_kata_shows_potential_xp_in_local_time() {
        let line = kata_line(&kata(TaskStatus::Pending), true, chrono_tz::Asia::Tokyo);
        assert!(line.starts_with("* ○ pending"));
        assert!(line.contains("19:00–19:45"));
        assert!(line.contains("+24 XP"));
        assert!(line.contains("🔥🔥 "));
        assert!(line.ends_with("Morning kata  [k1]"));
    }

    #[test]
    fn settled_kata_hides_potential_xp() {
        let line = kata_line(&kata(TaskStatus::Completed), false, chrono_tz::UTC);
        assert!(line.starts_with("  ✓ completed"));
        assert!(!line.contains("XP"));
    }

    #[test]
    fn profile_card_reports_distance_to_next_rank() {
        let mut profile = Profile::new(UserId::new("u1"), "kenji", Utc::now());
        profile.xp = 480;
        let card = profile_card(&profile);
        assert_eq!(card[1], "Rank: Initiate");
        assert!(card[3].starts_with("Next: 21 XP to go"));

        profile.xp = 6000;
        profile.rank = RankTier::Sensei;
        assert_eq!(profile_card(&profile)[3], "Next: highest rank reached");
    }

    #[test]
    fn rank_up_is_announced() {
        let completion = Completion {
            task_id: TaskId::new("k1"),
            earned_xp: 39,
            xp_after: Some(519),
            previous_rank: RankTier::Initiate,
            new_rank: RankTier::Disciple,
        };
        assert_eq!(
            completion_lines(&completion),
            ["GONG! +39 XP (519 total)", "Rank up: Initiate → Disciple"]
        );
    }

    #[test]
    fn gong_without_profile_omits_total() {
        let completion = Completion {
            task_id: TaskId::new("k1"),
            earned_xp: 13,
            xp_after: None,
            previous_rank: RankTier::Initiate,
            new_rank: RankTier::Initiate,
        };
        assert_eq!(completion_lines(&completion), ["GONG! +13 XP"]);
    }
}
