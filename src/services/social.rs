//! Social graph service
//!
//! Follows, blocks and mutes between users. A block in either direction
//! prevents following, and blocking removes existing follows both ways.

use crate::db::is_unique_violation;
use crate::db::repositories::{RelationRepository, UserRepository};
use crate::models::{
    FollowCounts, ListParams, PagedResult, PointsAction, RelationKind, Relationship, User,
    UserSummary,
};
use crate::services::points::PointsService;
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SocialServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct SocialService {
    relations: Arc<dyn RelationRepository>,
    users: Arc<dyn UserRepository>,
    points: Arc<PointsService>,
}

impl SocialService {
    pub fn new(
        relations: Arc<dyn RelationRepository>,
        users: Arc<dyn UserRepository>,
        points: Arc<PointsService>,
    ) -> Self {
        Self {
            relations,
            users,
            points,
        }
    }

    pub async fn follow(&self, actor_id: i64, username: &str) -> Result<(), SocialServiceError> {
        let target = self.target(actor_id, username, "follow").await?;

        if self.blocked_either_way(actor_id, target.id).await? {
            return Err(SocialServiceError::Forbidden(
                "You cannot follow this user".to_string(),
            ));
        }

        self.add_edge(actor_id, target.id, RelationKind::Follow, "Already following this user")
            .await?;

        tracing::debug!(actor_id, target_id = target.id, "followed");
        let reference = target.id.to_string();
        self.points
            .award_or_log(actor_id, PointsAction::FollowUser, Some(&reference))
            .await;
        Ok(())
    }

    pub async fn unfollow(&self, actor_id: i64, username: &str) -> Result<(), SocialServiceError> {
        let target = self.find_user(username).await?;
        self.remove_edge(actor_id, target.id, RelationKind::Follow, "Not following this user")
            .await
    }

    /// Block a user, dropping follows in both directions
    pub async fn block(&self, actor_id: i64, username: &str) -> Result<(), SocialServiceError> {
        let target = self.target(actor_id, username, "block").await?;

        self.add_edge(actor_id, target.id, RelationKind::Block, "User already blocked")
            .await?;

        let removed = self
            .relations
            .delete_follows_between(actor_id, target.id)
            .await
            .context("Failed to remove follows after block")?;

        tracing::debug!(actor_id, target_id = target.id, removed, "blocked");
        Ok(())
    }

    pub async fn unblock(&self, actor_id: i64, username: &str) -> Result<(), SocialServiceError> {
        let target = self.find_user(username).await?;
        self.remove_edge(actor_id, target.id, RelationKind::Block, "User is not blocked")
            .await
    }

    pub async fn mute(&self, actor_id: i64, username: &str) -> Result<(), SocialServiceError> {
        let target = self.target(actor_id, username, "mute").await?;
        self.add_edge(actor_id, target.id, RelationKind::Mute, "User already muted")
            .await
    }

    pub async fn unmute(&self, actor_id: i64, username: &str) -> Result<(), SocialServiceError> {
        let target = self.find_user(username).await?;
        self.remove_edge(actor_id, target.id, RelationKind::Mute, "User is not muted")
            .await
    }

    pub async fn followers(
        &self,
        username: &str,
        params: &ListParams,
    ) -> Result<PagedResult<UserSummary>, SocialServiceError> {
        let user = self.find_user(username).await?;
        let (items, total) = self.relations.followers(user.id, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn following(
        &self,
        username: &str,
        params: &ListParams,
    ) -> Result<PagedResult<UserSummary>, SocialServiceError> {
        let user = self.find_user(username).await?;
        let (items, total) = self.relations.following(user.id, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// How `actor_id` and `username` relate, seen from the actor
    pub async fn relationship(
        &self,
        actor_id: i64,
        username: &str,
    ) -> Result<Relationship, SocialServiceError> {
        let other = self.find_user(username).await?;
        let edge = |from: i64, to: i64, kind: RelationKind| self.relations.exists(from, to, kind);

        Ok(Relationship {
            following: edge(actor_id, other.id, RelationKind::Follow).await?,
            followed_by: edge(other.id, actor_id, RelationKind::Follow).await?,
            blocking: edge(actor_id, other.id, RelationKind::Block).await?,
            blocked_by: edge(other.id, actor_id, RelationKind::Block).await?,
            muting: edge(actor_id, other.id, RelationKind::Mute).await?,
        })
    }

    pub async fn counts(&self, username: &str) -> Result<FollowCounts, SocialServiceError> {
        let user = self.find_user(username).await?;
        Ok(FollowCounts {
            followers: self.relations.count_incoming(user.id, RelationKind::Follow).await?,
            following: self.relations.count_outgoing(user.id, RelationKind::Follow).await?,
        })
    }

    async fn find_user(&self, username: &str) -> Result<User, SocialServiceError> {
        self.users
            .get_by_username(username)
            .await
            .context("Failed to look up user")?
            .ok_or_else(|| SocialServiceError::NotFound(format!("User '{}' not found", username)))
    }

    /// Resolve the target of an edge the actor wants to create
    async fn target(&self, actor_id: i64, username: &str, verb: &str) -> Result<User, SocialServiceError> {
        let target = self.find_user(username).await?;
        if target.id == actor_id {
            return Err(SocialServiceError::ValidationError(format!(
                "cannot {} yourself",
                verb
            )));
        }
        Ok(target)
    }

    async fn blocked_either_way(&self, a: i64, b: i64) -> Result<bool, SocialServiceError> {
        Ok(self.relations.exists(a, b, RelationKind::Block).await?
            || self.relations.exists(b, a, RelationKind::Block).await?)
    }

    async fn add_edge(
        &self,
        actor_id: i64,
        target_id: i64,
        kind: RelationKind,
        duplicate: &str,
    ) -> Result<(), SocialServiceError> {
        match self.relations.create(actor_id, target_id, kind).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(SocialServiceError::Conflict(duplicate.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_edge(
        &self,
        actor_id: i64,
        target_id: i64,
        kind: RelationKind,
        missing: &str,
    ) -> Result<(), SocialServiceError> {
        if self.relations.delete(actor_id, target_id, kind).await? {
            Ok(())
        } else {
            Err(SocialServiceError::NotFound(missing.to_string()))
        }
    }
}
