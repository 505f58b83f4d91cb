//! AlexPoints service
//!
//! Applies the fixed rule table: one-time actions are awarded once per user,
//! limited actions at most `daily_limit` times per UTC day. Other services
//! call [`PointsService::award_or_log`] so a points failure never undoes the
//! action that earned them.

use crate::db::repositories::{AwardCap, PointsRepository, UserRepository};
use crate::models::{
    AwardOutcome, LeaderboardEntry, ListParams, PagedResult, PointsAction, PointsBalance,
    PointsTransaction, SkipReason,
};
use anyhow::Context;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use std::sync::Arc;

/// Largest leaderboard a client may request
pub const MAX_LEADERBOARD: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum PointsServiceError {
    #[error("User not found")]
    UserNotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct PointsService {
    repo: Arc<dyn PointsRepository>,
    user_repo: Arc<dyn UserRepository>,
    enabled: bool,
}

impl PointsService {
    pub fn new(
        repo: Arc<dyn PointsRepository>,
        user_repo: Arc<dyn UserRepository>,
        enabled: bool,
    ) -> Self {
        Self {
            repo,
            user_repo,
            enabled,
        }
    }

    /// Award points for `action` if the rules allow it.
    pub async fn award(
        &self,
        user_id: i64,
        action: PointsAction,
        reference: Option<&str>,
    ) -> Result<AwardOutcome, PointsServiceError> {
        if !self.enabled {
            return Ok(AwardOutcome::Skipped {
                reason: SkipReason::Disabled,
            });
        }

        let rule = action.rule();
        let cap = if rule.one_time {
            Some(AwardCap { since: None, max: 1 })
        } else {
            rule.daily_limit.map(|max| AwardCap {
                since: Some(start_of_day(Utc::now())),
                max,
            })
        };

        let awarded = self
            .repo
            .award(user_id, action, rule.points, reference, cap)
            .await
            .context("Failed to award points")?;

        let Some(total) = awarded else {
            let reason = if rule.one_time {
                SkipReason::AlreadyAwarded
            } else {
                SkipReason::DailyLimit
            };
            return Ok(AwardOutcome::Skipped { reason });
        };

        tracing::debug!(user_id, action = %action, points = rule.points, total, "points awarded");

        Ok(AwardOutcome::Awarded {
            points: rule.points,
            total,
        })
    }

    /// Award points, logging instead of failing.
    pub async fn award_or_log(
        &self,
        user_id: i64,
        action: PointsAction,
        reference: Option<&str>,
    ) -> Option<AwardOutcome> {
        match self.award(user_id, action, reference).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(user_id, action = %action, "failed to award points: {}", e);
                None
            }
        }
    }

    pub async fn balance(&self, user_id: i64) -> Result<PointsBalance, PointsServiceError> {
        let user = self
            .user_repo
            .get_by_id(user_id)
            .await?
            .ok_or(PointsServiceError::UserNotFound)?;
        Ok(PointsBalance::from_points(user.alex_points))
    }

    pub async fn history(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<PointsTransaction>, PointsServiceError> {
        let (items, total) = self.repo.history(user_id, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Top users by points; `limit` is clamped to 1..=100
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, PointsServiceError> {
        let limit = limit.clamp(1, MAX_LEADERBOARD);
        Ok(self.repo.leaderboard(limit).await?)
    }
}

/// Midnight UTC of the day containing `now`
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}
