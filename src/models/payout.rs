//! Educator earnings and payout models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a payout request: `requested -> paid | rejected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    #[default]
    Requested,
    Paid,
    Rejected,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutStatus::Requested => write!(f, "requested"),
            PayoutStatus::Paid => write!(f, "paid"),
            PayoutStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for PayoutStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(PayoutStatus::Requested),
            "paid" => Ok(PayoutStatus::Paid),
            "rejected" => Ok(PayoutStatus::Rejected),
            _ => Err(anyhow::anyhow!("Invalid payout status: {}", s)),
        }
    }
}

/// A request to withdraw earned revenue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: i64,
    pub educator_id: i64,
    pub amount: i64,
    pub currency: String,
    pub status: PayoutStatus,
    pub note: Option<String>,
    pub processed_by: Option<i64>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Split totals for one educator, grouped by split status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTotals {
    pub pending: i64,
    pub earned: i64,
    pub refunded: i64,
    pub sales_count: i64,
}

/// Payout totals for one educator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTotals {
    pub paid_out: i64,
    pub requested: i64,
}

/// Earnings overview shown on the educator dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSummary {
    /// Educator share of sales still awaiting confirmation
    pub pending: i64,
    /// Educator share of confirmed sales
    pub earned: i64,
    /// Educator share of refunded sales
    pub refunded: i64,
    pub paid_out: i64,
    /// Open payout requests
    pub requested: i64,
    /// What can still be requested
    pub available: i64,
    pub sales_count: i64,
    pub currency: String,
}

impl EarningsSummary {
    pub fn new(splits: SplitTotals, payouts: PayoutTotals, currency: impl Into<String>) -> Self {
        Self {
            pending: splits.pending,
            earned: splits.earned,
            refunded: splits.refunded,
            paid_out: payouts.paid_out,
            requested: payouts.requested,
            available: (splits.earned - payouts.paid_out - payouts.requested).max(0),
            sales_count: splits.sales_count,
            currency: currency.into(),
        }
    }
}

/// Per-course revenue for an educator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseEarnings {
    pub course_id: i64,
    pub title: String,
    pub sales_count: i64,
    pub earned: i64,
}
