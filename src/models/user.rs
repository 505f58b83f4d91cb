//! User model
//!
//! Users are either learners (consume content) or educators (create courses
//! and receive revenue splits). Admins moderate libraries, reconcile payments
//! and approve payouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User entity representing a registered user in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Username (unique)
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Optional display name
    pub display_name: Option<String>,
    /// User role
    pub role: UserRole,
    /// User status (active/banned)
    pub status: UserStatus,
    /// Running AlexPoints balance
    pub alex_points: i64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new User with the given parameters.
    ///
    /// The password must already be hashed; see `services::password::hash_password()`.
    pub fn new(username: String, email: String, password_hash: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Will be set by the database
            username,
            email,
            password_hash,
            display_name: None,
            role,
            status: UserStatus::Active,
            alex_points: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the user is an administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Educators and admins may sell courses and see earnings
    pub fn is_educator(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::Educator)
    }

    /// Check if the user may manage something owned by `owner_id`
    pub fn can_manage(&self, owner_id: i64) -> bool {
        self.is_admin() || self.id == owner_id
    }

    /// Check if the user is banned
    pub fn is_banned(&self) -> bool {
        self.status == UserStatus::Banned
    }
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Platform administrator
    Admin,
    /// Creates courses and libraries, receives revenue
    Educator,
    /// Consumes content
    #[default]
    Learner,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Educator => write!(f, "educator"),
            UserRole::Learner => write!(f, "learner"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "educator" => Ok(UserRole::Educator),
            "learner" => Ok(UserRole::Learner),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}

/// User status for account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Normal access
    #[default]
    Active,
    /// Cannot login
    Banned,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Banned => write!(f, "banned"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

/// Public projection of a user, safe to show to other users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub role: UserRole,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole, id: i64) -> User {
        let mut u = User::new("u".into(), "u@test.com".into(), "hash".into(), role);
        u.id = id;
        u
    }

    #[test]
    fn test_user_new_defaults() {
        let u = User::new("learner".into(), "l@test.com".into(), "hash".into(), UserRole::Learner);
        assert_eq!(u.id, 0);
        assert_eq!(u.alex_points, 0);
        assert_eq!(u.status, UserStatus::Active);
        assert!(u.display_name.is_none());
    }

    #[test]
    fn test_role_predicates() {
        assert!(user(UserRole::Admin, 1).is_educator());
        assert!(user(UserRole::Educator, 1).is_educator());
        assert!(!user(UserRole::Learner, 1).is_educator());
        assert!(user(UserRole::Admin, 1).is_admin());
        assert!(!user(UserRole::Educator, 1).is_admin());
    }

    #[test]
    fn test_can_manage() {
        let admin = user(UserRole::Admin, 1);
        let educator = user(UserRole::Educator, 2);
        assert!(admin.can_manage(2));
        assert!(educator.can_manage(2));
        assert!(!educator.can_manage(3));
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!(UserRole::from_str("EDUCATOR").unwrap(), UserRole::Educator);
        assert_eq!(UserRole::Learner.to_string(), "learner");
        assert!(UserRole::from_str("author").is_err());
        assert_eq!(UserRole::default(), UserRole::Learner);
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(user(UserRole::Learner, 5)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "learner");
    }
}
