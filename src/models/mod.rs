//! Data models
//!
//! Database entities, API inputs and the pure rules that operate on them
//! (the points table, the ledger state machine and split arithmetic).

mod course;
mod library;
mod paging;
mod payment;
mod payout;
mod points;
mod relation;
mod session;
mod user;

pub use course::{Course, CreateCourseInput, Enrollment};
pub use library::{
    AddLibraryItemInput, ApprovalStatus, ContentType, CreateLibraryInput, Library, LibraryDetail,
    LibraryItem, UpdateLibraryInput, MIN_ITEMS_FOR_APPROVAL,
};
pub use paging::{ListParams, PagedResult};
pub use payment::{
    compute_split, new_reference, next_status, EventOutcome, LedgerEvent, PaymentEvent,
    PaymentSplit, PaymentStatus, PaymentTransaction, SplitAmounts, SplitError, SplitRecipient,
    TransactionDetail, Transition, FULL_BPS,
};
pub use payout::{CourseEarnings, EarningsSummary, Payout, PayoutStatus, PayoutTotals, SplitTotals};
pub use points::{
    level_for, next_level_at, AwardOutcome, LeaderboardEntry, PointsAction, PointsBalance,
    PointsRule, PointsTransaction, SkipReason, LEVEL_THRESHOLDS,
};
pub use relation::{FollowCounts, Relation, RelationKind, Relationship};
pub use session::Session;
pub use user::{User, UserRole, UserStatus, UserSummary};
