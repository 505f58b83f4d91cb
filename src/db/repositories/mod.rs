//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository is a trait plus an SQLx implementation that dispatches
//! on the configured driver.

pub mod course;
pub mod library;
pub mod payment;
pub mod payout;
pub mod points;
pub mod relation;
pub mod session;
pub mod user;

#[cfg(test)]
pub(crate) mod test_support;

pub use course::{CourseFilter, CourseRepository, SqlxCourseRepository};
pub use library::{ApprovalChange, LibraryFilter, LibraryRepository, SqlxLibraryRepository};
pub use payment::{
    EnrollmentChange, NewPaymentEvent, NewTransaction, PaymentRepository, RevenueTotals,
    SqlxPaymentRepository, TransitionWrite,
};
pub use payout::{PayoutRepository, SqlxPayoutRepository};
pub use points::{AwardCap, PointsRepository, SqlxPointsRepository};
pub use relation::{RelationRepository, SqlxRelationRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
