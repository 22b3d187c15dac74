//! User profile: identity, experience and belt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rank::{rank_from_xp, xp_to_next_rank, RankTier};

/// Identity-provider user id; also the profile row's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub xp: u32,
    #[serde(rename = "rank_id")]
    pub rank: RankTier,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Fresh Initiate profile, as the remote system creates on signup.
    pub fn new(id: UserId, username: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.into(),
            full_name: None,
            avatar_url: None,
            xp: 0,
            rank: RankTier::Initiate,
            last_active: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Optimistic overwrite: adds XP and takes the tier as given, without
    /// recomputing it. The next fetch reconciles.
    pub fn apply_xp_delta(&mut self, earned: u32, tier: RankTier) {
        self.xp = self.xp.saturating_add(earned);
        self.rank = tier;
    }

    /// True when the stored tier is what the thresholds say it should be.
    pub fn rank_is_consistent(&self) -> bool {
        rank_from_xp(self.xp) == self.rank
    }

    pub fn xp_to_next_rank(&self) -> Option<u32> {
        xp_to_next_rank(self.xp)
    }

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn xp_delta_overwrites_tier_verbatim() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut p = Profile::new(UserId::new("u-1"), "kenji", now);
        p.xp = 480;

        p.apply_xp_delta(30, RankTier::Disciple);
        assert_eq!(p.xp, 510);
        assert_eq!(p.rank, RankTier::Disciple);
        assert!(p.rank_is_consistent());

        // a stale tier is accepted as-is
        p.apply_xp_delta(0, RankTier::Sensei);
        assert!(!p.rank_is_consistent());
    }

    #[test]
    fn profile_row_uses_rank_id_column() {
        let row = r#"{
            "id": "u-1",
            "username": "kenji",
            "full_name": null,
            "avatar_url": null,
            "xp": 1600,
            "rank_id": "Warrior",
            "last_active": "2025-01-01T00:00:00+00:00",
            "created_at": "2025-01-01T00:00:00+00:00",
            "updated_at": "2025-01-01T00:00:00+00:00"
        }"#;
        let p: Profile = serde_json::from_str(row).unwrap();
        assert_eq!(p.rank, RankTier::Warrior);
        assert_eq!(p.display_name(), "kenji");
        assert_eq!(p.xp_to_next_rank(), Some(3400));
    }
}
