//! Payment split ledger model
//!
//! Every sale is one `PaymentTransaction` identified by a gateway reference,
//! plus two `PaymentSplit` rows (platform and educator) whose amounts sum to
//! the transaction amount. Status changes go through [`next_status`], the
//! single source of truth for which transitions are legal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One hundred percent, in basis points
pub const FULL_BPS: u32 = 10_000;

/// Shared status of transactions and their splits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Success,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
    ];

    /// No event can move a transaction out of a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid payment status: {}", s))
    }
}

/// Something that happened to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEvent {
    Confirm,
    Fail,
    Cancel,
    Refund,
}

impl LedgerEvent {
    pub const ALL: [LedgerEvent; 4] = [
        LedgerEvent::Confirm,
        LedgerEvent::Fail,
        LedgerEvent::Cancel,
        LedgerEvent::Refund,
    ];

    /// Status a transaction ends up in after this event
    pub fn target(self) -> PaymentStatus {
        match self {
            LedgerEvent::Confirm => PaymentStatus::Success,
            LedgerEvent::Fail => PaymentStatus::Failed,
            LedgerEvent::Cancel => PaymentStatus::Cancelled,
            LedgerEvent::Refund => PaymentStatus::Refunded,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LedgerEvent::Confirm => "confirm",
            LedgerEvent::Fail => "fail",
            LedgerEvent::Cancel => "cancel",
            LedgerEvent::Refund => "refund",
        }
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision of the state machine for one (status, event) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given status
    Apply(PaymentStatus),
    /// The event's target is already the current status; nothing to do
    AlreadyApplied,
    /// The event is not legal from the current status
    Invalid,
}

/// Transition table:
///
/// ```text
/// pending --confirm--> success --refund--> refunded
/// pending --fail-----> failed
/// pending --cancel---> cancelled
/// ```
pub fn next_status(current: PaymentStatus, event: LedgerEvent) -> Transition {
    let target = event.target();
    if current == target {
        return Transition::AlreadyApplied;
    }
    match (current, event) {
        (PaymentStatus::Pending, LedgerEvent::Confirm | LedgerEvent::Fail | LedgerEvent::Cancel) => {
            Transition::Apply(target)
        }
        (PaymentStatus::Success, LedgerEvent::Refund) => Transition::Apply(target),
        _ => Transition::Invalid,
    }
}

/// Errors computing a split
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    #[error("Amount must be greater than zero, got {0}")]
    NonPositiveAmount(i64),
    #[error("Platform fee must be between 0 and 10000 basis points, got {0}")]
    InvalidFee(u32),
}

/// Platform/educator division of one amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAmounts {
    pub amount: i64,
    pub fee_bps: u32,
    pub platform_fee: i64,
    pub educator_amount: i64,
}

/// Divide `amount` between platform and educator.
///
/// `platform_fee = round(amount * fee_bps / 10000)` with halves rounded up;
/// the educator receives the remainder, so the parts always sum to `amount`.
pub fn compute_split(amount: i64, fee_bps: u32) -> Result<SplitAmounts, SplitError> {
    if amount <= 0 {
        return Err(SplitError::NonPositiveAmount(amount));
    }
    if fee_bps > FULL_BPS {
        return Err(SplitError::InvalidFee(fee_bps));
    }
    let scaled = amount as i128 * fee_bps as i128;
    let platform_fee = ((scaled + (FULL_BPS as i128 / 2)) / FULL_BPS as i128) as i64;
    Ok(SplitAmounts {
        amount,
        fee_bps,
        platform_fee,
        educator_amount: amount - platform_fee,
    })
}

/// Generate a fresh ledger reference
pub fn new_reference() -> String {
    format!("ALX-{}", Uuid::new_v4().simple())
}

/// Ledger transaction for one purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: i64,
    pub reference: String,
    pub payer_id: i64,
    pub course_id: i64,
    pub educator_id: i64,
    pub amount: i64,
    pub currency: String,
    pub fee_bps: u32,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who receives a split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitRecipient {
    Platform,
    Educator,
}

impl fmt::Display for SplitRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitRecipient::Platform => write!(f, "platform"),
            SplitRecipient::Educator => write!(f, "educator"),
        }
    }
}

impl FromStr for SplitRecipient {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform" => Ok(SplitRecipient::Platform),
            "educator" => Ok(SplitRecipient::Educator),
            _ => Err(anyhow::anyhow!("Invalid split recipient: {}", s)),
        }
    }
}

/// One recipient's share of a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub id: i64,
    pub transaction_id: i64,
    pub reference: String,
    pub recipient: SplitRecipient,
    /// Educator user id; `None` for the platform share
    pub recipient_id: Option<i64>,
    pub amount: i64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transaction together with its splits
#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetail {
    #[serde(flatten)]
    pub transaction: PaymentTransaction,
    pub splits: Vec<PaymentSplit>,
}

/// How a processed event was handled; stored with the idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The transition was applied
    Applied,
    /// The transaction was already in the target status
    AlreadyApplied,
    /// The event is not legal from the current status
    Rejected,
}

impl EventOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::AlreadyApplied => "already_applied",
            EventOutcome::Rejected => "rejected",
        }
    }
}

impl FromStr for EventOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(EventOutcome::Applied),
            "already_applied" => Ok(EventOutcome::AlreadyApplied),
            "rejected" => Ok(EventOutcome::Rejected),
            _ => Err(anyhow::anyhow!("Invalid event outcome: {}", s)),
        }
    }
}

/// A processed gateway or admin event, keyed for idempotency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: i64,
    pub event_key: String,
    pub reference: String,
    pub event_type: String,
    pub outcome: EventOutcome,
    pub payload: Option<String>,
    pub received_at: DateTime<Utc>,
}
