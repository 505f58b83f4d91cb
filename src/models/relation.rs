//! Social graph model
//!
//! Follows, blocks and mutes share one join table keyed by
//! `(user_id, target_id, kind)`; the edge is directed from the actor to the
//! target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of directed edge between two users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Follow,
    Block,
    Mute,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::Follow => write!(f, "follow"),
            RelationKind::Block => write!(f, "block"),
            RelationKind::Mute => write!(f, "mute"),
        }
    }
}

impl FromStr for RelationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow" => Ok(RelationKind::Follow),
            "block" => Ok(RelationKind::Block),
            "mute" => Ok(RelationKind::Mute),
            _ => Err(anyhow::anyhow!("Invalid relation kind: {}", s)),
        }
    }
}

/// A stored edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub user_id: i64,
    pub target_id: i64,
    pub kind: RelationKind,
    pub created_at: DateTime<Utc>,
}

/// How the viewer and another user relate, in both directions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub following: bool,
    pub followed_by: bool,
    pub blocking: bool,
    pub blocked_by: bool,
    pub muting: bool,
}

/// Follower / following totals for a profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowCounts {
    pub followers: i64,
    pub following: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [RelationKind::Follow, RelationKind::Block, RelationKind::Mute] {
            assert_eq!(RelationKind::from_str(&kind.to_string()).unwrap(), kind);
        }
        assert!(RelationKind::from_str("like").is_err());
    }
}
