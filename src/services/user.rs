//! User service
//!
//! Registration, login/logout and session validation:
//! - The first registered user becomes admin
//! - Sessions are random UUID tokens that expire after `auth.session_days`
//! - Expired sessions are deleted when presented
//! - Banned users cannot log in and their sessions stop resolving

use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{PointsAction, Session, User, UserRole};
use crate::services::password::{hash_password, verify_password};
use crate::services::points::PointsService;
use anyhow::Context;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Default session lifetime in days
pub const DEFAULT_SESSION_DAYS: i64 = 7;

pub const MIN_PASSWORD_LEN: usize = 8;

const MAX_DISPLAY_NAME_LEN: usize = 100;

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]{3,30}$").expect("hardcoded regex")
});

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Invalid credentials
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Account exists but may not sign in
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Username or email already taken
    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for user registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    /// `learner` when omitted; `admin` cannot be requested
    #[serde(default)]
    pub role: Option<UserRole>,
}

impl RegisterInput {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Input for user login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

/// Profile fields a user may change about themselves
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileInput {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// User service for managing users and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    points: Arc<PointsService>,
    session_days: i64,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        points: Arc<PointsService>,
    ) -> Self {
        Self::with_session_days(user_repo, session_repo, points, DEFAULT_SESSION_DAYS)
    }

    pub fn with_session_days(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        points: Arc<PointsService>,
        session_days: i64,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            points,
            session_days,
        }
    }

    /// Register a new user.
    ///
    /// The first user in the system becomes admin regardless of the
    /// requested role.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        validate_register_input(&input)?;

        let requested = match input.role {
            None => UserRole::Learner,
            Some(UserRole::Admin) => {
                return Err(UserServiceError::ValidationError(
                    "Role must be educator or learner".to_string(),
                ))
            }
            Some(role) => role,
        };

        if self
            .user_repo
            .get_by_username(&input.username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                input.username
            )));
        }

        if self
            .user_repo
            .get_by_email(&input.email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Email '{}' is already registered",
                input.email
            )));
        }

        let role = if self.is_first_user().await? {
            UserRole::Admin
        } else {
            requested
        };

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let user = User::new(input.username, input.email, password_hash, role);

        let created = self.user_repo.create(&user).await.map_err(|e| {
            // Lost a race with a concurrent registration
            if crate::db::is_unique_violation(&e) {
                UserServiceError::UserExists("Username or email already registered".to_string())
            } else {
                UserServiceError::InternalError(e.context("Failed to create user"))
            }
        })?;

        tracing::info!(user_id = created.id, role = %created.role, "user registered");
        Ok(created)
    }

    /// Check credentials and open a session.
    ///
    /// The first login of each UTC day earns `daily_login` points.
    pub async fn login(&self, input: LoginInput) -> Result<Session, UserServiceError> {
        let invalid = || UserServiceError::AuthenticationError("Invalid username or password".to_string());

        let user = self
            .find_user_by_username_or_email(&input.username_or_email)
            .await?
            .ok_or_else(invalid)?;

        let password_valid =
            verify_password(&input.password, &user.password_hash).context("Failed to verify password")?;
        if !password_valid {
            tracing::debug!(user_id = user.id, "login rejected: bad password");
            return Err(invalid());
        }

        if user.is_banned() {
            return Err(UserServiceError::Forbidden("Account is banned".to_string()));
        }

        let session = self.create_session(user.id).await?;
        self.points
            .award_or_log(user.id, PointsAction::DailyLogin, None)
            .await;

        Ok(session)
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Unknown and expired tokens resolve to `None`; expired ones are
    /// deleted on the way.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            self.session_repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;

        Ok(user.filter(|u| !u.is_banned()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to get user by username")?)
    }

    /// Update the caller's own profile.
    ///
    /// Setting a non-empty display name earns the one-time
    /// `complete_profile` award.
    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user")?
            .ok_or(UserServiceError::NotFound)?;

        let mut sets_display_name = false;
        if let Some(name) = input.display_name {
            let name = name.trim().to_string();
            if name.chars().count() > MAX_DISPLAY_NAME_LEN {
                return Err(UserServiceError::ValidationError(format!(
                    "Display name must be at most {} characters",
                    MAX_DISPLAY_NAME_LEN
                )));
            }
            sets_display_name = !name.is_empty();
            user.display_name = if name.is_empty() { None } else { Some(name) };
        }

        if let Some(email) = input.email {
            let email = email.trim().to_string();
            if !email.contains('@') {
                return Err(UserServiceError::ValidationError("Invalid email format".to_string()));
            }
            if email != user.email {
                if let Some(other) = self
                    .user_repo
                    .get_by_email(&email)
                    .await
                    .context("Failed to check email")?
                {
                    if other.id != user.id {
                        return Err(UserServiceError::UserExists(format!(
                            "Email '{}' is already registered",
                            email
                        )));
                    }
                }
            }
            user.email = email;
        }

        let updated = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update user")?;

        if sets_display_name {
            self.points
                .award_or_log(user_id, PointsAction::CompleteProfile, None)
                .await;
        }

        // Points may have moved the balance
        Ok(self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to reload user")?
            .unwrap_or(updated))
    }

    pub async fn is_first_user(&self) -> Result<bool, UserServiceError> {
        let count = self
            .user_repo
            .count()
            .await
            .context("Failed to count users")?;
        Ok(count == 0)
    }

    /// Delete all expired sessions, returning how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?)
    }

    async fn find_user_by_username_or_email(
        &self,
        username_or_email: &str,
    ) -> Result<Option<User>, UserServiceError> {
        if let Some(user) = self
            .user_repo
            .get_by_username(username_or_email)
            .await
            .context("Failed to get user by username")?
        {
            return Ok(Some(user));
        }

        Ok(self
            .user_repo
            .get_by_email(username_or_email)
            .await
            .context("Failed to get user by email")?)
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::days(self.session_days),
            created_at: now,
        };

        Ok(self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?)
    }
}

fn validate_register_input(input: &RegisterInput) -> Result<(), UserServiceError> {
    if !USERNAME_RE.is_match(&input.username) {
        return Err(UserServiceError::ValidationError(
            "Username must be 3-30 letters, digits or underscores".to_string(),
        ));
    }

    if !input.email.contains('@') {
        return Err(UserServiceError::ValidationError("Invalid email format".to_string()));
    }

    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(UserServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    Ok(())
}
