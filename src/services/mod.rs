//! Services layer - Business logic
//!
//! Services enforce the platform rules on top of the repositories:
//! validation, permission checks, AlexPoints awards and the payment
//! ledger's state machine.

pub mod analytics;
pub mod course;
pub mod library;
pub mod password;
pub mod payment;
pub mod payout;
pub mod points;
pub mod social;
pub mod user;

pub use analytics::{AnalyticsOverview, AnalyticsService, AnalyticsServiceError};
pub use course::{CourseService, CourseServiceError};
pub use library::{LibraryService, LibraryServiceError};
pub use password::{hash_password, verify_password};
pub use payment::{
    Checkout, LedgerOutcome, PaymentService, PaymentServiceError, WebhookAck, WebhookPayload,
    SIGNATURE_HEADER,
};
pub use payout::{PayoutService, PayoutServiceError};
pub use points::{PointsService, PointsServiceError};
pub use social::{SocialService, SocialServiceError};
pub use user::{LoginInput, RegisterInput, UpdateProfileInput, UserService, UserServiceError};
