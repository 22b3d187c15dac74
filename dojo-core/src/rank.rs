//! Rank/XP model: belt tiers derived from accumulated experience.
//!
//! Everything here is a pure step function. The remote store recomputes the
//! authoritative rank on its side; clients only use these to preview.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task::Priority;

/// Belt system, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RankTier {
    Initiate,
    Disciple,
    Warrior,
    Sensei,
}

impl RankTier {
    pub const ALL: [RankTier; 4] = [
        RankTier::Initiate,
        RankTier::Disciple,
        RankTier::Warrior,
        RankTier::Sensei,
    ];

    /// Inclusive lower XP bound of the tier.
    pub fn threshold(self) -> u32 {
        match self {
            RankTier::Initiate => 0,
            RankTier::Disciple => 501,
            RankTier::Warrior => 1501,
            RankTier::Sensei => 5000,
        }
    }

    pub fn next(self) -> Option<RankTier> {
        match self {
            RankTier::Initiate => Some(RankTier::Disciple),
            RankTier::Disciple => Some(RankTier::Warrior),
            RankTier::Warrior => Some(RankTier::Sensei),
            RankTier::Sensei => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RankTier::Initiate => "Initiate",
            RankTier::Disciple => "Disciple",
            RankTier::Warrior => "Warrior",
            RankTier::Sensei => "Sensei",
        }
    }
}

impl fmt::Display for RankTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map accumulated XP to its tier.
///
/// Bounds are inclusive-lower / exclusive-upper; Sensei is unbounded.
pub fn rank_from_xp(xp: u32) -> RankTier {
    match xp {
        x if x >= 5000 => RankTier::Sensei,
        x if x >= 1501 => RankTier::Warrior,
        x if x >= 501 => RankTier::Disciple,
        _ => RankTier::Initiate,
    }
}

/// XP earned for completing a kata: `priority * 10 + floor(minutes / 10)`.
pub fn xp_for_completion(priority: Priority, allocated_minutes: u32) -> u32 {
    u32::from(priority.as_u8()) * 10 + allocated_minutes / 10
}

/// XP still needed to reach the next tier, `None` at the top.
pub fn xp_to_next_rank(xp: u32) -> Option<u32> {
    rank_from_xp(xp)
        .next()
        .map(|next| next.threshold().saturating_sub(xp))
}

/// Fraction of the current tier already covered, in `[0, 1]`.
pub fn rank_progress(xp: u32) -> f64 {
    let tier = rank_from_xp(xp);
    let Some(next) = tier.next() else {
        return 1.0;
    };
    let span = f64::from(next.threshold() - tier.threshold());
    let done = f64::from(xp - tier.threshold());
    (done / span).clamp(0.0, 1.0)
}
