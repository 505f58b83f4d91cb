//! Course and enrollment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A course sold by an educator. `price` is in minor units of the platform
/// currency; zero means free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub educator_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    pub fn is_free(&self) -> bool {
        self.price == 0
    }
}

/// Input for creating a course
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourseInput {
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
}

/// A learner's access to a course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub course_id: i64,
    pub user_id: i64,
    /// Ledger reference of the purchase; `None` for free enrollments
    pub transaction_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}
