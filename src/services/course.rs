//! Course service
//!
//! Courses are what the ledger sells. Free courses are enrolled directly;
//! paid ones go through checkout in the payment service.

use crate::db::is_unique_violation;
use crate::db::repositories::{CourseFilter, CourseRepository};
use crate::models::{Course, CreateCourseInput, Enrollment, ListParams, PagedResult, PointsAction, User};
use crate::services::points::PointsService;
use anyhow::Context;
use std::sync::Arc;

const MAX_TITLE_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum CourseServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Course not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct CourseService {
    repo: Arc<dyn CourseRepository>,
    points: Arc<PointsService>,
}

impl CourseService {
    pub fn new(repo: Arc<dyn CourseRepository>, points: Arc<PointsService>) -> Self {
        Self { repo, points }
    }

    /// Create an unpublished course owned by `educator`
    pub async fn create(&self, educator: &User, input: CreateCourseInput) -> Result<Course, CourseServiceError> {
        if !educator.is_educator() {
            return Err(CourseServiceError::Forbidden(
                "Only educators can create courses".to_string(),
            ));
        }

        let title = input.title.trim().to_string();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(CourseServiceError::ValidationError(format!(
                "Title must be 1-{} characters",
                MAX_TITLE_LEN
            )));
        }
        if input.price < 0 {
            return Err(CourseServiceError::ValidationError(
                "Price cannot be negative".to_string(),
            ));
        }

        let input = CreateCourseInput {
            title,
            description: input
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            price: input.price,
        };

        Ok(self
            .repo
            .create(educator.id, &input)
            .await
            .context("Failed to create course")?)
    }

    /// Published courses are visible to everyone, drafts only to their
    /// educator and admins.
    pub async fn get(&self, viewer: Option<&User>, id: i64) -> Result<Course, CourseServiceError> {
        let course = self.find(id).await?;
        if course.is_published || viewer.is_some_and(|u| u.can_manage(course.educator_id)) {
            Ok(course)
        } else {
            Err(CourseServiceError::NotFound)
        }
    }

    /// Load a published course, for purchase and enrollment flows
    pub async fn get_published(&self, id: i64) -> Result<Course, CourseServiceError> {
        let course = self.find(id).await?;
        if !course.is_published {
            return Err(CourseServiceError::NotFound);
        }
        Ok(course)
    }

    pub async fn publish(&self, user: &User, id: i64) -> Result<Course, CourseServiceError> {
        let course = self.find(id).await?;
        if !user.can_manage(course.educator_id) {
            return Err(CourseServiceError::Forbidden(
                "Only the educator can publish this course".to_string(),
            ));
        }

        if !self.repo.publish(id).await.context("Failed to publish course")? {
            return Err(CourseServiceError::Conflict("Course is already published".to_string()));
        }

        let reference = id.to_string();
        self.points
            .award_or_log(course.educator_id, PointsAction::CoursePublished, Some(&reference))
            .await;

        tracing::info!(course_id = id, educator_id = course.educator_id, "course published");
        self.find(id).await
    }

    pub async fn list_published(&self, params: &ListParams) -> Result<PagedResult<Course>, CourseServiceError> {
        self.list(
            CourseFilter {
                educator_id: None,
                published_only: true,
            },
            params,
        )
        .await
    }

    /// An educator's courses; drafts are included only for the educator
    /// and admins
    pub async fn list_by_educator(
        &self,
        viewer: Option<&User>,
        educator_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<Course>, CourseServiceError> {
        let published_only = !viewer.is_some_and(|u| u.can_manage(educator_id));
        self.list(
            CourseFilter {
                educator_id: Some(educator_id),
                published_only,
            },
            params,
        )
        .await
    }

    /// Enroll in a free published course
    pub async fn enroll_free(&self, learner: &User, id: i64) -> Result<Enrollment, CourseServiceError> {
        let course = self.get_published(id).await?;
        if !course.is_free() {
            return Err(CourseServiceError::Unprocessable(
                "Paid courses must be purchased through checkout".to_string(),
            ));
        }

        match self.repo.enroll(id, learner.id, None).await {
            Ok(enrollment) => Ok(enrollment),
            Err(e) if is_unique_violation(&e) => {
                Err(CourseServiceError::Conflict("Already enrolled".to_string()))
            }
            Err(e) => Err(e.context("Failed to enroll").into()),
        }
    }

    pub async fn is_enrolled(&self, user_id: i64, course_id: i64) -> Result<bool, CourseServiceError> {
        Ok(self
            .repo
            .get_enrollment(course_id, user_id)
            .await
            .context("Failed to check enrollment")?
            .is_some())
    }

    async fn list(&self, filter: CourseFilter, params: &ListParams) -> Result<PagedResult<Course>, CourseServiceError> {
        let (items, total) = self.repo.list(filter, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn find(&self, id: i64) -> Result<Course, CourseServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get course")?
            .ok_or(CourseServiceError::NotFound)
    }
}
