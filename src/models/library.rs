//! Library model
//!
//! A library is a curated, ordered collection of content. Libraries start
//! `pending` and must be approved by an admin before they are listed
//! publicly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum number of items a library needs before it can be approved
pub const MIN_ITEMS_FOR_APPROVAL: i64 = 5;

/// Library entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub approval_status: ApprovalStatus,
    pub rejection_reason: Option<String>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    pub fn is_public(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved
    }
}

/// Moderation state of a library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for ApprovalStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            _ => Err(anyhow::anyhow!("Invalid approval status: {}", s)),
        }
    }
}

/// What a library item points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Article,
    Course,
    Post,
    Link,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Article => write!(f, "article"),
            ContentType::Course => write!(f, "course"),
            ContentType::Post => write!(f, "post"),
            ContentType::Link => write!(f, "link"),
        }
    }
}

impl FromStr for ContentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" => Ok(ContentType::Article),
            "course" => Ok(ContentType::Course),
            "post" => Ok(ContentType::Post),
            "link" => Ok(ContentType::Link),
            _ => Err(anyhow::anyhow!("Invalid content type: {}", s)),
        }
    }
}

/// One entry in a library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: i64,
    pub library_id: i64,
    pub content_type: ContentType,
    pub content_id: Option<i64>,
    pub title: String,
    pub url: Option<String>,
    /// Zero-based, dense within a library
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

/// Library with its items and follower count
#[derive(Debug, Clone, Serialize)]
pub struct LibraryDetail {
    #[serde(flatten)]
    pub library: Library,
    pub items: Vec<LibraryItem>,
    pub follower_count: i64,
}

/// Input for creating a library
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLibraryInput {
    pub title: String,
    pub description: Option<String>,
}

/// Input for updating a library
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLibraryInput {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Input for adding an item
#[derive(Debug, Clone, Deserialize)]
pub struct AddLibraryItemInput {
    pub content_type: ContentType,
    pub content_id: Option<i64>,
    pub title: String,
    pub url: Option<String>,
}
