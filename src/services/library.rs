//! Library service
//!
//! Curated libraries and their moderation workflow:
//!
//! ```text
//! pending --approve--> approved
//! pending --reject---> rejected --resubmit--> pending
//! ```
//!
//! Only approved libraries are public. Approval needs at least
//! [`MIN_ITEMS_FOR_APPROVAL`] items; later item edits keep the approval.

use crate::db::is_unique_violation;
use crate::db::repositories::{ApprovalChange, LibraryFilter, LibraryRepository};
use crate::models::{
    AddLibraryItemInput, ApprovalStatus, ContentType, CreateLibraryInput, Library, LibraryDetail,
    LibraryItem, ListParams, PagedResult, PointsAction, UpdateLibraryInput, User,
    MIN_ITEMS_FOR_APPROVAL,
};
use crate::services::points::PointsService;
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

const MAX_TITLE_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum LibraryServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Well-formed request the current state cannot satisfy
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Library not found")]
    NotFound,

    #[error("Item not found")]
    ItemNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct LibraryService {
    repo: Arc<dyn LibraryRepository>,
    points: Arc<PointsService>,
}

impl LibraryService {
    pub fn new(repo: Arc<dyn LibraryRepository>, points: Arc<PointsService>) -> Self {
        Self { repo, points }
    }

    pub async fn create(&self, owner: &User, input: CreateLibraryInput) -> Result<Library, LibraryServiceError> {
        let title = validate_title(&input.title)?;
        let description = normalize(input.description);

        let library = self
            .repo
            .create(owner.id, &title, description.as_deref())
            .await
            .context("Failed to create library")?;

        let reference = library.id.to_string();
        self.points
            .award_or_log(owner.id, PointsAction::CreateLibrary, Some(&reference))
            .await;

        Ok(library)
    }

    /// Library with items. Unapproved libraries are visible only to their
    /// owner and admins; everyone else gets `NotFound`.
    pub async fn get(&self, viewer: Option<&User>, id: i64) -> Result<LibraryDetail, LibraryServiceError> {
        let library = self.find(id).await?;

        if !visible_to(&library, viewer) {
            return Err(LibraryServiceError::NotFound);
        }

        let items = self.repo.items(id).await?;
        let follower_count = self.repo.follower_count(id).await?;
        Ok(LibraryDetail {
            library,
            items,
            follower_count,
        })
    }

    pub async fn list_public(&self, params: &ListParams) -> Result<PagedResult<Library>, LibraryServiceError> {
        self.list(
            LibraryFilter {
                owner_id: None,
                status: Some(ApprovalStatus::Approved),
            },
            params,
        )
        .await
    }

    pub async fn list_mine(&self, owner: &User, params: &ListParams) -> Result<PagedResult<Library>, LibraryServiceError> {
        self.list(
            LibraryFilter {
                owner_id: Some(owner.id),
                status: None,
            },
            params,
        )
        .await
    }

    /// Moderation queue, newest first
    pub async fn list_pending(&self, params: &ListParams) -> Result<PagedResult<Library>, LibraryServiceError> {
        self.list(
            LibraryFilter {
                owner_id: None,
                status: Some(ApprovalStatus::Pending),
            },
            params,
        )
        .await
    }

    pub async fn update(
        &self,
        user: &User,
        id: i64,
        input: UpdateLibraryInput,
    ) -> Result<Library, LibraryServiceError> {
        let library = self.owned(user, id).await?;

        let title = match input.title {
            Some(title) => validate_title(&title)?,
            None => library.title,
        };
        let description = match input.description {
            Some(desc) => normalize(Some(desc)),
            None => library.description,
        };

        Ok(self
            .repo
            .update(id, &title, description.as_deref())
            .await
            .context("Failed to update library")?)
    }

    /// Delete a library; owners and admins only
    pub async fn delete(&self, user: &User, id: i64) -> Result<(), LibraryServiceError> {
        let library = self.find(id).await?;
        if !visible_to(&library, Some(user)) {
            return Err(LibraryServiceError::NotFound);
        }
        if !user.can_manage(library.owner_id) {
            return Err(LibraryServiceError::Forbidden(
                "Only the owner can delete this library".to_string(),
            ));
        }
        self.repo.delete(id).await.context("Failed to delete library")?;
        tracing::info!(library_id = id, user_id = user.id, "library deleted");
        Ok(())
    }

    pub async fn add_item(
        &self,
        user: &User,
        id: i64,
        input: AddLibraryItemInput,
    ) -> Result<LibraryItem, LibraryServiceError> {
        self.owned(user, id).await?;

        let title = validate_title(&input.title)?;
        let url = normalize(input.url);
        if input.content_type == ContentType::Link && url.is_none() {
            return Err(LibraryServiceError::ValidationError(
                "Link items need a url".to_string(),
            ));
        }

        if let Some(content_id) = input.content_id {
            if self.repo.item_exists(id, input.content_type, content_id).await? {
                return Err(LibraryServiceError::Conflict(
                    "Content is already in this library".to_string(),
                ));
            }
        }

        let input = AddLibraryItemInput { title, url, ..input };
        let item = match self.repo.add_item(id, &input).await {
            Ok(item) => item,
            Err(e) if is_unique_violation(&e) => {
                return Err(LibraryServiceError::Conflict(
                    "Content is already in this library".to_string(),
                ))
            }
            Err(e) => return Err(e.context("Failed to add library item").into()),
        };

        let reference = item.id.to_string();
        self.points
            .award_or_log(user.id, PointsAction::AddLibraryItem, Some(&reference))
            .await;

        Ok(item)
    }

    pub async fn remove_item(&self, user: &User, id: i64, item_id: i64) -> Result<(), LibraryServiceError> {
        self.owned(user, id).await?;
        if !self.repo.remove_item(id, item_id).await? {
            return Err(LibraryServiceError::ItemNotFound);
        }
        Ok(())
    }

    /// Approve a pending library with enough items
    pub async fn approve(&self, admin: &User, id: i64) -> Result<Library, LibraryServiceError> {
        require_admin(admin)?;
        let library = self.find(id).await?;

        match library.approval_status {
            ApprovalStatus::Pending => {}
            ApprovalStatus::Approved => {
                return Err(LibraryServiceError::Conflict("Library is already approved".to_string()))
            }
            ApprovalStatus::Rejected => {
                return Err(LibraryServiceError::Conflict(
                    "Rejected libraries must be resubmitted first".to_string(),
                ))
            }
        }

        let items = self.repo.count_items(id).await?;
        if items < MIN_ITEMS_FOR_APPROVAL {
            return Err(LibraryServiceError::Unprocessable(format!(
                "Library needs at least {} items to be approved (has {})",
                MIN_ITEMS_FOR_APPROVAL, items
            )));
        }

        let change = ApprovalChange {
            to: ApprovalStatus::Approved,
            rejection_reason: None,
            approved_by: Some(admin.id),
            approved_at: Some(Utc::now()),
        };
        self.transition(&library, ApprovalStatus::Pending, &change).await?;

        let reference = id.to_string();
        self.points
            .award_or_log(library.owner_id, PointsAction::LibraryApproved, Some(&reference))
            .await;

        tracing::info!(library_id = id, admin_id = admin.id, "library approved");
        self.find(id).await
    }

    pub async fn reject(&self, admin: &User, id: i64, reason: &str) -> Result<Library, LibraryServiceError> {
        require_admin(admin)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LibraryServiceError::ValidationError(
                "A rejection reason is required".to_string(),
            ));
        }

        let library = self.find(id).await?;
        if library.approval_status != ApprovalStatus::Pending {
            return Err(LibraryServiceError::Conflict(format!(
                "Library is {}, only pending libraries can be rejected",
                library.approval_status
            )));
        }

        let change = ApprovalChange {
            to: ApprovalStatus::Rejected,
            rejection_reason: Some(reason.to_string()),
            approved_by: None,
            approved_at: None,
        };
        self.transition(&library, ApprovalStatus::Pending, &change).await?;

        tracing::info!(library_id = id, admin_id = admin.id, "library rejected");
        self.find(id).await
    }

    /// Send a rejected library back to the moderation queue
    pub async fn resubmit(&self, owner: &User, id: i64) -> Result<Library, LibraryServiceError> {
        let library = self.owned(owner, id).await?;
        if library.approval_status != ApprovalStatus::Rejected {
            return Err(LibraryServiceError::Conflict(
                "Only rejected libraries can be resubmitted".to_string(),
            ));
        }

        let change = ApprovalChange {
            to: ApprovalStatus::Pending,
            rejection_reason: None,
            approved_by: None,
            approved_at: None,
        };
        self.transition(&library, ApprovalStatus::Rejected, &change).await?;
        self.find(id).await
    }

    /// Bookmark an approved library
    pub async fn follow(&self, user: &User, id: i64) -> Result<(), LibraryServiceError> {
        let library = self.find(id).await?;
        if !library.is_public() {
            return Err(LibraryServiceError::NotFound);
        }

        match self.repo.follow(id, user.id).await {
            Ok(()) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(LibraryServiceError::Conflict(
                "Already following this library".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn unfollow(&self, user: &User, id: i64) -> Result<(), LibraryServiceError> {
        let library = self.find(id).await?;
        if !library.is_public() {
            return Err(LibraryServiceError::NotFound);
        }
        if !self.repo.unfollow(id, user.id).await? {
            return Err(LibraryServiceError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, filter: LibraryFilter, params: &ListParams) -> Result<PagedResult<Library>, LibraryServiceError> {
        let (items, total) = self.repo.list(filter, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn find(&self, id: i64) -> Result<Library, LibraryServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get library")?
            .ok_or(LibraryServiceError::NotFound)
    }

    /// Load a library the user owns. Callers who cannot even see it get
    /// `NotFound`.
    async fn owned(&self, user: &User, id: i64) -> Result<Library, LibraryServiceError> {
        let library = self.find(id).await?;
        if !visible_to(&library, Some(user)) {
            return Err(LibraryServiceError::NotFound);
        }
        if library.owner_id != user.id {
            return Err(LibraryServiceError::Forbidden(
                "Only the owner can change this library".to_string(),
            ));
        }
        Ok(library)
    }

    async fn transition(
        &self,
        library: &Library,
        from: ApprovalStatus,
        change: &ApprovalChange,
    ) -> Result<(), LibraryServiceError> {
        let applied = self
            .repo
            .set_approval(library.id, from, change)
            .await
            .context("Failed to update approval status")?;
        if !applied {
            return Err(LibraryServiceError::Conflict(
                "Library status changed concurrently".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_admin(user: &User) -> Result<(), LibraryServiceError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(LibraryServiceError::Forbidden("Admin access required".to_string()))
    }
}

fn validate_title(title: &str) -> Result<String, LibraryServiceError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(LibraryServiceError::ValidationError(format!(
            "Title must be 1-{} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

/// Trim, mapping blank to `None`
fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Approved libraries are public; others only show to their owner and admins
fn visible_to(library: &Library, viewer: Option<&User>) -> bool {
    library.is_public() || viewer.is_some_and(|u| u.can_manage(library.owner_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::db::repositories::{
        SqlxLibraryRepository, SqlxPointsRepository, SqlxUserRepository, UserRepository,
    };
    use crate::db::DynDatabasePool;
    use crate::models::UserRole;

    struct Fixture {
        pool: DynDatabasePool,
        service: LibraryService,
        points: Arc<PointsService>,
        admin: User,
        owner: User,
        reader: User,
    }

    async fn user(pool: &DynDatabasePool, name: &str, role: UserRole) -> User {
        let id = insert_user(pool, name, role).await;
        SqlxUserRepository::new(pool.clone())
            .get_by_id(id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn setup() -> Fixture {
        let pool = setup_pool().await;
        let admin = user(&pool, "curator", UserRole::Admin).await;
        let owner = user(&pool, "owner", UserRole::Educator).await;
        let reader = user(&pool, "reader", UserRole::Learner).await;
        let points = Arc::new(PointsService::new(
            SqlxPointsRepository::boxed(pool.clone()),
            SqlxUserRepository::boxed(pool.clone()),
            true,
        ));
        let service = LibraryService::new(SqlxLibraryRepository::boxed(pool.clone()), points.clone());
        Fixture {
            pool,
            service,
            points,
            admin,
            owner,
            reader,
        }
    }

    fn item(n: i64) -> AddLibraryItemInput {
        AddLibraryItemInput {
            content_type: ContentType::Article,
            content_id: Some(n),
            title: format!("Reading {}", n),
            url: None,
        }
    }

    async fn library_with_items(f: &Fixture, count: i64) -> Library {
        let library = f
            .service
            .create(
                &f.owner,
                CreateLibraryInput {
                    title: "Rust reading list".to_string(),
                    description: Some("  ".to_string()),
                },
            )
            .await
            .unwrap();
        for n in 1..=count {
            f.service.add_item(&f.owner, library.id, item(n)).await.unwrap();
        }
        library
    }

    #[tokio::test]
    async fn test_create_validates_and_awards() {
        let f = setup().await;

        let empty = f
            .service
            .create(
                &f.owner,
                CreateLibraryInput {
                    title: "   ".to_string(),
                    description: None,
                },
            )
            .await;
        assert!(matches!(empty, Err(LibraryServiceError::ValidationError(_))));

        let library = library_with_items(&f, 0).await;
        assert_eq!(library.approval_status, ApprovalStatus::Pending);
        assert!(library.description.is_none());
        assert_eq!(f.points.balance(f.owner.id).await.unwrap().points, 10);
    }

    #[tokio::test]
    async fn test_pending_library_hidden_from_others() {
        let f = setup().await;
        let library = library_with_items(&f, 1).await;

        assert!(matches!(
            f.service.get(Some(&f.reader), library.id).await,
            Err(LibraryServiceError::NotFound)
        ));
        assert!(matches!(f.service.get(None, library.id).await, Err(LibraryServiceError::NotFound)));
        assert_eq!(f.service.get(Some(&f.owner), library.id).await.unwrap().items.len(), 1);
        assert!(f.service.get(Some(&f.admin), library.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_approval_needs_five_items() {
        let f = setup().await;
        let library = library_with_items(&f, 4).await;

        assert!(matches!(
            f.service.approve(&f.admin, library.id).await,
            Err(LibraryServiceError::Unprocessable(_))
        ));

        f.service.add_item(&f.owner, library.id, item(5)).await.unwrap();
        let approved = f.service.approve(&f.admin, library.id).await.unwrap();
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert_eq!(approved.approved_by, Some(f.admin.id));

        assert!(matches!(
            f.service.approve(&f.admin, library.id).await,
            Err(LibraryServiceError::Conflict(_))
        ));

        // 10 for creating, 5 items, 50 for approval
        assert_eq!(f.points.balance(f.owner.id).await.unwrap().points, 65);

        let public = f.service.list_public(&ListParams::default()).await.unwrap();
        assert_eq!(public.total, 1);
    }

    #[tokio::test]
    async fn test_only_admin_approves() {
        let f = setup().await;
        let library = library_with_items(&f, 5).await;
        assert!(matches!(
            f.service.approve(&f.owner, library.id).await,
            Err(LibraryServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_reject_and_resubmit() {
        let f = setup().await;
        let library = library_with_items(&f, 5).await;

        assert!(matches!(
            f.service.reject(&f.admin, library.id, " ").await,
            Err(LibraryServiceError::ValidationError(_))
        ));

        let rejected = f.service.reject(&f.admin, library.id, "Off topic").await.unwrap();
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Off topic"));

        assert!(matches!(
            f.service.approve(&f.admin, library.id).await,
            Err(LibraryServiceError::Conflict(_))
        ));
        assert!(matches!(
            f.service.resubmit(&f.reader, library.id).await,
            Err(LibraryServiceError::NotFound)
        ));

        let pending = f.service.resubmit(&f.owner, library.id).await.unwrap();
        assert_eq!(pending.approval_status, ApprovalStatus::Pending);
        assert!(pending.rejection_reason.is_none());

        let queue = f.service.list_pending(&ListParams::default()).await.unwrap();
        assert_eq!(queue.total, 1);

        f.service.approve(&f.admin, library.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_items_dense_and_unique() {
        let f = setup().await;
        let library = library_with_items(&f, 3).await;

        assert!(matches!(
            f.service.add_item(&f.owner, library.id, item(2)).await,
            Err(LibraryServiceError::Conflict(_))
        ));
        assert!(matches!(
            f.service.add_item(&f.reader, library.id, item(9)).await,
            Err(LibraryServiceError::NotFound)
        ));

        let link = AddLibraryItemInput {
            content_type: ContentType::Link,
            content_id: None,
            title: "External".to_string(),
            url: None,
        };
        assert!(matches!(
            f.service.add_item(&f.owner, library.id, link).await,
            Err(LibraryServiceError::ValidationError(_))
        ));

        let detail = f.service.get(Some(&f.owner), library.id).await.unwrap();
        let middle = detail.items[1].id;
        f.service.remove_item(&f.owner, library.id, middle).await.unwrap();
        assert!(matches!(
            f.service.remove_item(&f.owner, library.id, middle).await,
            Err(LibraryServiceError::ItemNotFound)
        ));

        let detail = f.service.get(Some(&f.owner), library.id).await.unwrap();
        let positions: Vec<i64> = detail.items.iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_follow_requires_approval() {
        let f = setup().await;
        let library = library_with_items(&f, 5).await;

        assert!(matches!(
            f.service.follow(&f.reader, library.id).await,
            Err(LibraryServiceError::NotFound)
        ));

        f.service.approve(&f.admin, library.id).await.unwrap();
        f.service.follow(&f.reader, library.id).await.unwrap();
        assert!(matches!(
            f.service.follow(&f.reader, library.id).await,
            Err(LibraryServiceError::Conflict(_))
        ));
        assert_eq!(f.service.get(None, library.id).await.unwrap().follower_count, 1);

        f.service.unfollow(&f.reader, library.id).await.unwrap();
        assert!(matches!(
            f.service.unfollow(&f.reader, library.id).await,
            Err(LibraryServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_hidden_library_is_not_found_for_strangers() {
        let f = setup().await;
        let library = library_with_items(&f, 5).await;
        let edit = UpdateLibraryInput {
            title: Some("Taken over".to_string()),
            description: None,
        };

        assert!(matches!(
            f.service.update(&f.reader, library.id, edit.clone()).await,
            Err(LibraryServiceError::NotFound)
        ));
        assert!(matches!(
            f.service.get(Some(&f.reader), library.id).await,
            Err(LibraryServiceError::NotFound)
        ));

        f.service.approve(&f.admin, library.id).await.unwrap();
        assert!(matches!(
            f.service.update(&f.reader, library.id, edit).await,
            Err(LibraryServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_by_owner_or_admin() {
        let f = setup().await;
        let first = library_with_items(&f, 2).await;
        let second = library_with_items(&f, 0).await;

        assert!(matches!(
            f.service.delete(&f.reader, first.id).await,
            Err(LibraryServiceError::NotFound)
        ));
        f.service.delete(&f.owner, first.id).await.unwrap();
        f.service.delete(&f.admin, second.id).await.unwrap();

        let repo = SqlxLibraryRepository::new(f.pool.clone());
        assert!(repo.get_by_id(first.id).await.unwrap().is_none());
        assert!(matches!(f.service.delete(&f.owner, first.id).await, Err(LibraryServiceError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_owner_only() {
        let f = setup().await;
        let library = library_with_items(&f, 0).await;

        let updated = f
            .service
            .update(
                &f.owner,
                library.id,
                UpdateLibraryInput {
                    title: Some("Systems reading".to_string()),
                    description: Some("Kernels and compilers".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Systems reading");
        assert_eq!(updated.description.as_deref(), Some("Kernels and compilers"));

        assert!(matches!(
            f.service.update(&f.admin, library.id, UpdateLibraryInput::default()).await,
            Err(LibraryServiceError::Forbidden(_))
        ));
    }
}
