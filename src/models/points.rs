//! AlexPoints model
//!
//! Points are awarded by a fixed rule table. Every award is written to
//! `points_transactions`; `users.alex_points` carries the running total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Actions that earn points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointsAction {
    DailyLogin,
    FollowUser,
    CreateLibrary,
    AddLibraryItem,
    LibraryApproved,
    CompleteProfile,
    CoursePublished,
    CoursePurchase,
    FirstSale,
}

/// Award rule for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsRule {
    pub points: i64,
    /// Maximum awards per UTC day
    pub daily_limit: Option<i64>,
    /// Awarded at most once per user, ever
    pub one_time: bool,
}

impl PointsAction {
    pub const ALL: [PointsAction; 9] = [
        PointsAction::DailyLogin,
        PointsAction::FollowUser,
        PointsAction::CreateLibrary,
        PointsAction::AddLibraryItem,
        PointsAction::LibraryApproved,
        PointsAction::CompleteProfile,
        PointsAction::CoursePublished,
        PointsAction::CoursePurchase,
        PointsAction::FirstSale,
    ];

    pub fn rule(self) -> PointsRule {
        let (points, daily_limit, one_time) = match self {
            PointsAction::DailyLogin => (5, Some(1), false),
            PointsAction::FollowUser => (2, Some(20), false),
            PointsAction::CreateLibrary => (10, Some(5), false),
            PointsAction::AddLibraryItem => (1, Some(50), false),
            PointsAction::LibraryApproved => (50, None, false),
            PointsAction::CompleteProfile => (25, None, true),
            PointsAction::CoursePublished => (30, None, false),
            PointsAction::CoursePurchase => (20, None, false),
            PointsAction::FirstSale => (100, None, true),
        };
        PointsRule {
            points,
            daily_limit,
            one_time,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PointsAction::DailyLogin => "daily_login",
            PointsAction::FollowUser => "follow_user",
            PointsAction::CreateLibrary => "create_library",
            PointsAction::AddLibraryItem => "add_library_item",
            PointsAction::LibraryApproved => "library_approved",
            PointsAction::CompleteProfile => "complete_profile",
            PointsAction::CoursePublished => "course_published",
            PointsAction::CoursePurchase => "course_purchase",
            PointsAction::FirstSale => "first_sale",
        }
    }
}

impl fmt::Display for PointsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointsAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PointsAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid points action: {}", s))
    }
}

/// Ledger row for one award
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: i64,
    pub user_id: i64,
    pub action: PointsAction,
    pub points: i64,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Why an award did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    DailyLimit,
    AlreadyAwarded,
}

/// Result of an award attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AwardOutcome {
    Awarded { points: i64, total: i64 },
    Skipped { reason: SkipReason },
}

/// Points needed to reach each level; index + 1 is the level number.
pub const LEVEL_THRESHOLDS: [i64; 8] = [0, 100, 250, 500, 1000, 2500, 5000, 10000];

/// Level for a points total, starting at 1
pub fn level_for(points: i64) -> u32 {
    LEVEL_THRESHOLDS
        .iter()
        .filter(|&&threshold| points >= threshold)
        .count()
        .max(1) as u32
}

/// Points needed for the next level, `None` at the top level
pub fn next_level_at(points: i64) -> Option<i64> {
    LEVEL_THRESHOLDS.iter().copied().find(|&t| t > points)
}

/// Balance view returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsBalance {
    pub points: i64,
    pub level: u32,
    pub next_level_at: Option<i64>,
}

impl PointsBalance {
    pub fn from_points(points: i64) -> Self {
        Self {
            points,
            level: level_for(points),
            next_level_at: next_level_at(points),
        }
    }
}

/// Leaderboard row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub points: i64,
    pub level: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(99), 1);
        assert_eq!(level_for(100), 2);
        assert_eq!(level_for(999), 4);
        assert_eq!(level_for(10_000), 8);
        assert_eq!(level_for(1_000_000), 8);
        assert_eq!(level_for(-5), 1);
    }

    #[test]
    fn test_next_level_at() {
        assert_eq!(next_level_at(0), Some(100));
        assert_eq!(next_level_at(100), Some(250));
        assert_eq!(next_level_at(10_000), None);
    }

    #[test]
    fn test_action_round_trip() {
        for action in PointsAction::ALL {
            assert_eq!(PointsAction::from_str(action.as_str()).unwrap(), action);
        }
        assert!(PointsAction::from_str("spam").is_err());
    }

    #[test]
    fn test_one_time_rules() {
        assert!(PointsAction::CompleteProfile.rule().one_time);
        assert!(PointsAction::FirstSale.rule().one_time);
        assert_eq!(PointsAction::DailyLogin.rule().daily_limit, Some(1));
        assert_eq!(PointsAction::LibraryApproved.rule().daily_limit, None);
    }

    #[test]
    fn test_award_outcome_serializes_tagged() {
        let json = serde_json::to_value(AwardOutcome::Skipped {
            reason: SkipReason::DailyLimit,
        })
        .unwrap();
        assert_eq!(json["result"], "skipped");
        assert_eq!(json["reason"], "daily_limit");
    }
}
