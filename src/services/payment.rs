//! Payment split ledger service
//!
//! Checkout creates a pending transaction with its platform and educator
//! splits. Gateway webhooks and admin/buyer actions then drive it through
//! the state machine in [`next_status`]. Every event carries an idempotency
//! key (the gateway event id, or `"{reference}:{event}"`) that is stored
//! with its outcome; replaying a key returns that outcome and writes
//! nothing.

use crate::cache::{SharedCache, ANALYTICS_PREFIX};
use crate::config::PaymentsConfig;
use crate::db::is_unique_violation;
use crate::db::repositories::{
    CourseRepository, EnrollmentChange, NewPaymentEvent, NewTransaction, PaymentRepository,
    TransitionWrite,
};
use crate::models::{
    compute_split, new_reference, next_status, EventOutcome, LedgerEvent, ListParams, PagedResult,
    PaymentEvent, PaymentSplit, PaymentStatus, PaymentTransaction, PointsAction, SplitAmounts,
    SplitError, TransactionDetail, Transition, User,
};
use crate::services::points::PointsService;
use anyhow::Context;
use data_encoding::HEXLOWER_PERMISSIVE;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::sync::Arc;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the hex HMAC-SHA512 of the raw webhook body
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Guarded writes that lose a race are retried this many times
const MAX_TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PaymentServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    InvalidSplit(#[from] SplitError),

    #[error("Free courses do not need checkout")]
    FreeCourse,

    #[error("Amount mismatch: expected {expected}, gateway reported {reported}")]
    AmountMismatch { expected: i64, reported: i64 },

    #[error("Cannot {event} a {status} transaction")]
    InvalidTransition {
        status: PaymentStatus,
        event: LedgerEvent,
    },

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Result of feeding one event to the ledger
#[derive(Debug, Clone, Serialize)]
pub struct LedgerOutcome {
    pub reference: String,
    pub event: LedgerEvent,
    pub outcome: EventOutcome,
    /// Transaction status after the event
    pub transaction_status: PaymentStatus,
    /// True when the idempotency key had been seen before
    pub duplicate: bool,
}

/// Result of a checkout request
#[derive(Debug, Clone)]
pub struct Checkout {
    pub detail: TransactionDetail,
    /// False when an open checkout was returned instead
    pub created: bool,
}

/// Gateway webhook body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    /// Gateway event id, used as the idempotency key when present
    #[serde(default)]
    pub id: Option<String>,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub reference: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub gateway_response: Option<String>,
}

/// Answer to the gateway. Anything but an error tells it to stop retrying.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookAck {
    Ignored { reason: String },
    Processed(LedgerOutcome),
}

/// One event to apply
#[derive(Debug, Clone)]
struct LedgerCommand {
    reference: String,
    event: LedgerEvent,
    /// Gateway-supplied event id
    event_id: Option<String>,
    event_type: String,
    reported_amount: Option<i64>,
    /// Confirmations must carry `reported_amount`
    amount_required: bool,
    reason: Option<String>,
    payload: Option<String>,
}

impl LedgerCommand {
    fn new(reference: &str, event: LedgerEvent, event_type: &str) -> Self {
        Self {
            reference: reference.to_string(),
            event,
            event_id: None,
            event_type: event_type.to_string(),
            reported_amount: None,
            amount_required: false,
            reason: None,
            payload: None,
        }
    }

    fn event_key(&self) -> String {
        match &self.event_id {
            Some(id) => id.clone(),
            None => format!("{}:{}", self.reference, self.event),
        }
    }

    fn record(&self, key: &str, outcome: EventOutcome) -> NewPaymentEvent {
        NewPaymentEvent {
            event_key: key.to_string(),
            reference: self.reference.clone(),
            event_type: self.event_type.clone(),
            outcome,
            payload: self.payload.clone(),
        }
    }
}

/// Map a gateway event name onto the ledger
pub fn ledger_event_for(gateway_event: &str) -> Option<LedgerEvent> {
    match gateway_event {
        "charge.success" => Some(LedgerEvent::Confirm),
        "charge.failed" => Some(LedgerEvent::Fail),
        "refund.processed" => Some(LedgerEvent::Refund),
        _ => None,
    }
}

/// Hex HMAC-SHA512 of `body`, as the gateway computes it
pub fn sign_payload(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid webhook secret: {}", e))?;
    mac.update(body);
    Ok(HEXLOWER_PERMISSIVE.encode(&mac.finalize().into_bytes()))
}

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    courses: Arc<dyn CourseRepository>,
    points: Arc<PointsService>,
    cache: SharedCache,
    fee_bps: u32,
    currency: String,
    webhook_secret: String,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        courses: Arc<dyn CourseRepository>,
        points: Arc<PointsService>,
        cache: SharedCache,
        config: &PaymentsConfig,
    ) -> Self {
        Self {
            payments,
            courses,
            points,
            cache,
            fee_bps: config.fee_basis_points(),
            currency: config.currency.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Split `amount` with the configured platform fee
    pub fn preview_split(&self, amount: i64) -> Result<SplitAmounts, PaymentServiceError> {
        Ok(compute_split(amount, self.fee_bps)?)
    }

    /// Open a checkout for a paid course.
    ///
    /// An open checkout for the same learner and course is returned as is.
    pub async fn checkout(&self, learner: &User, course_id: i64) -> Result<Checkout, PaymentServiceError> {
        let course = self
            .courses
            .get_by_id(course_id)
            .await
            .context("Failed to get course")?
            .filter(|c| c.is_published)
            .ok_or_else(|| PaymentServiceError::NotFound("Course not found".to_string()))?;

        if course.is_free() {
            return Err(PaymentServiceError::FreeCourse);
        }
        if course.educator_id == learner.id {
            return Err(PaymentServiceError::ValidationError(
                "You cannot buy your own course".to_string(),
            ));
        }
        if self
            .courses
            .get_enrollment(course.id, learner.id)
            .await
            .context("Failed to check enrollment")?
            .is_some()
        {
            return Err(PaymentServiceError::Conflict("Already enrolled in this course".to_string()));
        }

        if let Some(open) = self
            .payments
            .find_pending(learner.id, course.id)
            .await
            .context("Failed to look up open checkout")?
        {
            let splits = self.payments.splits_for(&open.reference).await?;
            return Ok(Checkout {
                detail: TransactionDetail {
                    transaction: open,
                    splits,
                },
                created: false,
            });
        }

        let split = compute_split(course.price, self.fee_bps)?;
        let new = NewTransaction {
            reference: new_reference(),
            payer_id: learner.id,
            course_id: course.id,
            educator_id: course.educator_id,
            currency: self.currency.clone(),
            split,
        };
        let detail = self
            .payments
            .create_checkout(&new)
            .await
            .context("Failed to create checkout")?;

        tracing::info!(
            reference = %detail.transaction.reference,
            course_id = course.id,
            amount = split.amount,
            platform_fee = split.platform_fee,
            "checkout created"
        );

        Ok(Checkout {
            detail,
            created: true,
        })
    }

    /// Transaction with splits, visible to its buyer, its educator and admins
    pub async fn get_transaction(&self, viewer: &User, reference: &str) -> Result<TransactionDetail, PaymentServiceError> {
        let transaction = self.find(reference).await?;
        if !(viewer.is_admin() || viewer.id == transaction.payer_id || viewer.id == transaction.educator_id) {
            return Err(PaymentServiceError::Forbidden(
                "You cannot view this transaction".to_string(),
            ));
        }
        let splits = self.payments.splits_for(reference).await?;
        Ok(TransactionDetail { transaction, splits })
    }

    pub async fn splits_for(&self, reference: &str) -> Result<Vec<PaymentSplit>, PaymentServiceError> {
        self.find(reference).await?;
        Ok(self.payments.splits_for(reference).await?)
    }

    pub async fn list_transactions(
        &self,
        status: Option<PaymentStatus>,
        params: &ListParams,
    ) -> Result<PagedResult<PaymentTransaction>, PaymentServiceError> {
        let (items, total) = self.payments.list(status, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn get_event(&self, event_key: &str) -> Result<Option<PaymentEvent>, PaymentServiceError> {
        Ok(self.payments.get_event(event_key).await?)
    }

    /// Buyer abandons a pending checkout
    pub async fn cancel(&self, buyer: &User, reference: &str) -> Result<LedgerOutcome, PaymentServiceError> {
        let transaction = self.find(reference).await?;
        if transaction.payer_id != buyer.id {
            return Err(PaymentServiceError::Forbidden(
                "Only the buyer can cancel this checkout".to_string(),
            ));
        }
        let cmd = LedgerCommand::new(reference, LedgerEvent::Cancel, "buyer.cancel");
        strict(self.process(cmd).await?)
    }

    /// Manual confirmation. `reported_amount`, when given, must match the
    /// transaction amount.
    pub async fn verify(&self, reference: &str, reported_amount: Option<i64>) -> Result<LedgerOutcome, PaymentServiceError> {
        let mut cmd = LedgerCommand::new(reference, LedgerEvent::Confirm, "admin.verify");
        cmd.reported_amount = reported_amount;
        strict(self.process(cmd).await?)
    }

    pub async fn refund(&self, reference: &str, reason: Option<String>) -> Result<LedgerOutcome, PaymentServiceError> {
        let mut cmd = LedgerCommand::new(reference, LedgerEvent::Refund, "admin.refund");
        cmd.reason = reason;
        strict(self.process(cmd).await?)
    }

    /// Check the signature of a raw webhook body
    pub fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> Result<(), PaymentServiceError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(PaymentServiceError::InvalidSignature)?;

        if self.webhook_secret.is_empty() {
            tracing::warn!("webhook rejected: no webhook secret configured");
            return Err(PaymentServiceError::InvalidSignature);
        }

        let expected = HEXLOWER_PERMISSIVE
            .decode(signature.as_bytes())
            .map_err(|_| PaymentServiceError::InvalidSignature)?;

        let mut mac = HmacSha512::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid webhook secret: {}", e))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| PaymentServiceError::InvalidSignature)
    }

    /// Verify, parse and apply a gateway webhook.
    ///
    /// Unknown event types and unknown references are acknowledged as
    /// ignored so the gateway stops retrying.
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookAck, PaymentServiceError> {
        if let Err(e) = self.verify_signature(body, signature) {
            tracing::warn!(has_signature = signature.is_some(), "webhook signature rejected");
            return Err(e);
        }

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| PaymentServiceError::ValidationError(format!("Invalid webhook payload: {}", e)))?;

        let event = match ledger_event_for(&payload.event) {
            Some(event) => event,
            None => {
                tracing::debug!(event = %payload.event, "webhook ignored: unhandled event type");
                return Ok(WebhookAck::Ignored {
                    reason: format!("unhandled event type '{}'", payload.event),
                });
            }
        };

        let mut cmd = LedgerCommand::new(&payload.data.reference, event, &payload.event);
        cmd.event_id = payload.id.filter(|id| !id.is_empty());
        cmd.reported_amount = payload.data.amount;
        cmd.amount_required = true;
        cmd.reason = payload.data.gateway_response;
        cmd.payload = Some(String::from_utf8_lossy(body).into_owned());

        match self.process(cmd).await {
            Ok(outcome) => Ok(WebhookAck::Processed(outcome)),
            Err(PaymentServiceError::NotFound(_)) => {
                tracing::debug!(reference = %payload.data.reference, "webhook ignored: unknown reference");
                Ok(WebhookAck::Ignored {
                    reason: "unknown reference".to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Apply one event under its idempotency key
    async fn process(&self, cmd: LedgerCommand) -> Result<LedgerOutcome, PaymentServiceError> {
        let key = cmd.event_key();

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            if let Some(stored) = self.payments.get_event(&key).await? {
                return self.replay(&cmd, stored).await;
            }

            let transaction = self.find(&cmd.reference).await?;

            let to = match next_status(transaction.status, cmd.event) {
                Transition::Apply(to) => to,
                Transition::AlreadyApplied => {
                    return self
                        .settle_unchanged(&cmd, &key, &transaction, EventOutcome::AlreadyApplied)
                        .await
                }
                Transition::Invalid => {
                    tracing::debug!(
                        reference = %cmd.reference,
                        status = %transaction.status,
                        event = %cmd.event,
                        "ledger event rejected"
                    );
                    return self
                        .settle_unchanged(&cmd, &key, &transaction, EventOutcome::Rejected)
                        .await;
                }
            };

            if cmd.event == LedgerEvent::Confirm {
                match cmd.reported_amount {
                    Some(reported) if reported != transaction.amount => {
                        tracing::warn!(
                            reference = %cmd.reference,
                            expected = transaction.amount,
                            reported,
                            "confirmation amount mismatch, transaction left pending"
                        );
                        return Err(PaymentServiceError::AmountMismatch {
                            expected: transaction.amount,
                            reported,
                        });
                    }
                    None if cmd.amount_required => {
                        tracing::warn!(
                            reference = %cmd.reference,
                            "confirmation without amount, transaction left pending"
                        );
                        return Err(PaymentServiceError::ValidationError(
                            "Confirmation must report the charged amount".to_string(),
                        ));
                    }
                    _ => {}
                }
            }

            let write = TransitionWrite {
                transaction_id: transaction.id,
                reference: transaction.reference.clone(),
                from: transaction.status,
                to,
                failure_reason: match cmd.event {
                    LedgerEvent::Confirm => None,
                    _ => cmd.reason.clone(),
                },
                enrollment: enrollment_change(&transaction, cmd.event),
                event: cmd.record(&key, EventOutcome::Applied),
            };

            match self.payments.apply_transition(&write).await {
                Ok(true) => {
                    tracing::info!(
                        reference = %transaction.reference,
                        from = %transaction.status,
                        to = %to,
                        event = %cmd.event,
                        "ledger transition applied"
                    );
                    self.after_transition(&transaction, cmd.event).await;
                    return Ok(LedgerOutcome {
                        reference: transaction.reference,
                        event: cmd.event,
                        outcome: EventOutcome::Applied,
                        transaction_status: to,
                        duplicate: false,
                    });
                }
                // Another writer moved the status first; decide again
                Ok(false) => continue,
                // Same key committed concurrently; the next pass replays it
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.context("Failed to apply ledger transition").into()),
            }
        }

        Err(PaymentServiceError::Conflict(
            "Transaction is being updated concurrently, retry later".to_string(),
        ))
    }

    /// Answer a repeated idempotency key from what was stored
    async fn replay(&self, cmd: &LedgerCommand, stored: PaymentEvent) -> Result<LedgerOutcome, PaymentServiceError> {
        tracing::debug!(key = %stored.event_key, outcome = stored.outcome.as_str(), "duplicate ledger event");
        let status = self.find(&stored.reference).await?.status;
        Ok(LedgerOutcome {
            reference: stored.reference,
            event: cmd.event,
            outcome: stored.outcome,
            transaction_status: status,
            duplicate: true,
        })
    }

    /// Outcome for an event that changes nothing.
    ///
    /// Only gateway event ids are recorded here. A derived key such as
    /// `"{reference}:refund"` must stay free for a later, valid attempt.
    async fn settle_unchanged(
        &self,
        cmd: &LedgerCommand,
        key: &str,
        transaction: &PaymentTransaction,
        outcome: EventOutcome,
    ) -> Result<LedgerOutcome, PaymentServiceError> {
        if cmd.event_id.is_some() {
            if let Err(e) = self.payments.record_event(&cmd.record(key, outcome)).await {
                if !is_unique_violation(&e) {
                    return Err(e.context("Failed to record ledger event").into());
                }
            }
        }
        Ok(LedgerOutcome {
            reference: transaction.reference.clone(),
            event: cmd.event,
            outcome,
            transaction_status: transaction.status,
            duplicate: false,
        })
    }

    async fn after_transition(&self, transaction: &PaymentTransaction, event: LedgerEvent) {
        self.cache.delete_prefix(ANALYTICS_PREFIX).await;

        if event == LedgerEvent::Confirm {
            let reference = Some(transaction.reference.as_str());
            self.points
                .award_or_log(transaction.payer_id, PointsAction::CoursePurchase, reference)
                .await;
            self.points
                .award_or_log(transaction.educator_id, PointsAction::FirstSale, reference)
                .await;
        }
    }

    async fn find(&self, reference: &str) -> Result<PaymentTransaction, PaymentServiceError> {
        self.payments
            .get_by_reference(reference)
            .await
            .context("Failed to get transaction")?
            .ok_or_else(|| PaymentServiceError::NotFound(format!("Transaction '{}' not found", reference)))
    }
}

fn enrollment_change(transaction: &PaymentTransaction, event: LedgerEvent) -> EnrollmentChange {
    let (course_id, user_id) = (transaction.course_id, transaction.payer_id);
    match event {
        LedgerEvent::Confirm => EnrollmentChange::Grant { course_id, user_id },
        LedgerEvent::Refund => EnrollmentChange::Revoke { course_id, user_id },
        LedgerEvent::Fail | LedgerEvent::Cancel => EnrollmentChange::None,
    }
}

/// Turn a rejected outcome into an error for callers that acted directly
fn strict(outcome: LedgerOutcome) -> Result<LedgerOutcome, PaymentServiceError> {
    if outcome.outcome == EventOutcome::Rejected {
        return Err(PaymentServiceError::InvalidTransition {
            status: outcome.transaction_status,
            event: outcome.event,
        });
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, ANALYTICS_OVERVIEW_KEY};
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::db::repositories::{
        SqlxCourseRepository, SqlxPaymentRepository, SqlxPointsRepository, SqlxUserRepository,
        UserRepository,
    };
    use crate::db::DynDatabasePool;
    use crate::models::{CreateCourseInput, UserRole};

    const SECRET: &str = "whsec_test";

    struct Fixture {
        service: PaymentService,
        courses: Arc<dyn CourseRepository>,
        points: Arc<PointsService>,
        cache: SharedCache,
        educator: User,
        learner: User,
        admin: User,
        course_id: i64,
    }

    async fn user(pool: &DynDatabasePool, name: &str, role: UserRole) -> User {
        let id = insert_user(pool, name, role).await;
        SqlxUserRepository::new(pool.clone()).get_by_id(id).await.unwrap().unwrap()
    }

    async fn setup() -> Fixture {
        let pool = setup_pool().await;
        let admin = user(&pool, "bursar", UserRole::Admin).await;
        let educator = user(&pool, "prof_ada", UserRole::Educator).await;
        let learner = user(&pool, "student", UserRole::Learner).await;

        let courses = SqlxCourseRepository::boxed(pool.clone());
        let course = courses
            .create(
                educator.id,
                &CreateCourseInput {
                    title: "Async Rust".to_string(),
                    description: None,
                    price: 10_000,
                },
            )
            .await
            .unwrap();
        courses.publish(course.id).await.unwrap();

        let points = Arc::new(PointsService::new(
            SqlxPointsRepository::boxed(pool.clone()),
            SqlxUserRepository::boxed(pool.clone()),
            true,
        ));
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let config = PaymentsConfig {
            platform_fee_percent: 15.0,
            currency: "NGN".to_string(),
            webhook_secret: SECRET.to_string(),
            min_payout: 1_000,
        };
        let service = PaymentService::new(
            SqlxPaymentRepository::boxed(pool.clone()),
            courses.clone(),
            points.clone(),
            cache.clone(),
            &config,
        );

        Fixture {
            service,
            courses,
            points,
            cache,
            educator,
            learner,
            admin,
            course_id: course.id,
        }
    }

    fn webhook(event: &str, id: Option<&str>, reference: &str, amount: i64) -> Vec<u8> {
        let mut body = serde_json::json!({
            "event": event,
            "data": { "reference": reference, "amount": amount }
        });
        if let Some(id) = id {
            body["id"] = serde_json::json!(id);
        }
        serde_json::to_vec(&body).unwrap()
    }

    async fn send(f: &Fixture, body: &[u8]) -> Result<WebhookAck, PaymentServiceError> {
        let signature = sign_payload(SECRET, body).unwrap();
        f.service.handle_webhook(body, Some(&signature)).await
    }

    #[test]
    fn test_gateway_event_mapping() {
        assert_eq!(ledger_event_for("charge.success"), Some(LedgerEvent::Confirm));
        assert_eq!(ledger_event_for("charge.failed"), Some(LedgerEvent::Fail));
        assert_eq!(ledger_event_for("refund.processed"), Some(LedgerEvent::Refund));
        assert_eq!(ledger_event_for("transfer.success"), None);
    }

    #[tokio::test]
    async fn test_preview_split() {
        let f = setup().await;
        let split = f.service.preview_split(10_001).unwrap();
        assert_eq!(split.fee_bps, 1_500);
        assert_eq!(split.platform_fee, 1_500);
        assert_eq!(split.educator_amount, 8_501);
        assert!(matches!(
            f.service.preview_split(0),
            Err(PaymentServiceError::InvalidSplit(SplitError::NonPositiveAmount(0)))
        ));
    }

    #[tokio::test]
    async fn test_checkout_creates_pending_splits_and_is_idempotent() {
        let f = setup().await;

        let first = f.service.checkout(&f.learner, f.course_id).await.unwrap();
        assert!(first.created);
        let detail = &first.detail;
        assert!(detail.transaction.reference.starts_with("ALX-"));
        assert_eq!(detail.transaction.status, PaymentStatus::Pending);
        assert_eq!(detail.transaction.amount, 10_000);
        assert_eq!(detail.splits.len(), 2);
        assert_eq!(detail.splits.iter().map(|s| s.amount).sum::<i64>(), 10_000);
        assert!(detail.splits.iter().all(|s| s.status == PaymentStatus::Pending));

        let again = f.service.checkout(&f.learner, f.course_id).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.detail.transaction.reference, detail.transaction.reference);
    }

    #[tokio::test]
    async fn test_checkout_rules() {
        let f = setup().await;

        assert!(matches!(
            f.service.checkout(&f.educator, f.course_id).await,
            Err(PaymentServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.checkout(&f.learner, 9_999).await,
            Err(PaymentServiceError::NotFound(_))
        ));

        let free = f
            .courses
            .create(
                f.educator.id,
                &CreateCourseInput {
                    title: "Free intro".to_string(),
                    description: None,
                    price: 0,
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            f.service.checkout(&f.learner, free.id).await,
            Err(PaymentServiceError::NotFound(_))
        ));
        f.courses.publish(free.id).await.unwrap();
        assert!(matches!(
            f.service.checkout(&f.learner, free.id).await,
            Err(PaymentServiceError::FreeCourse)
        ));

        f.courses.enroll(f.course_id, f.learner.id, None).await.unwrap();
        assert!(matches!(
            f.service.checkout(&f.learner, f.course_id).await,
            Err(PaymentServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_confirm_settles_everything() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;
        f.cache.set(ANALYTICS_OVERVIEW_KEY, &"stale").await.unwrap();

        let ack = send(&f, &webhook("charge.success", Some("evt_1"), &reference, 10_000)).await.unwrap();
        match ack {
            WebhookAck::Processed(outcome) => {
                assert_eq!(outcome.outcome, EventOutcome::Applied);
                assert_eq!(outcome.transaction_status, PaymentStatus::Success);
            }
            other => panic!("unexpected ack: {:?}", other),
        }

        let detail = f.service.get_transaction(&f.admin, &reference).await.unwrap();
        assert_eq!(detail.transaction.status, PaymentStatus::Success);
        assert!(detail.transaction.settled_at.is_some());
        assert!(detail.splits.iter().all(|s| s.status == PaymentStatus::Success));

        let enrollment = f.courses.get_enrollment(f.course_id, f.learner.id).await.unwrap().unwrap();
        assert_eq!(enrollment.transaction_reference.as_deref(), Some(reference.as_str()));

        assert_eq!(f.points.balance(f.learner.id).await.unwrap().points, 20);
        assert_eq!(f.points.balance(f.educator.id).await.unwrap().points, 100);

        let cached: Option<String> = f.cache.get(ANALYTICS_OVERVIEW_KEY).await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_webhook_replays_stored_outcome() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;
        let body = webhook("charge.success", Some("evt_dup"), &reference, 10_000);

        send(&f, &body).await.unwrap();
        let ack = send(&f, &body).await.unwrap();
        match ack {
            WebhookAck::Processed(outcome) => {
                assert!(outcome.duplicate);
                assert_eq!(outcome.outcome, EventOutcome::Applied);
            }
            other => panic!("unexpected ack: {:?}", other),
        }

        // Awarded once
        assert_eq!(f.points.balance(f.learner.id).await.unwrap().points, 20);

        // A different event id for the same confirmation is a no-op
        let ack = send(&f, &webhook("charge.success", Some("evt_other"), &reference, 10_000)).await.unwrap();
        match ack {
            WebhookAck::Processed(outcome) => {
                assert!(!outcome.duplicate);
                assert_eq!(outcome.outcome, EventOutcome::AlreadyApplied);
            }
            other => panic!("unexpected ack: {:?}", other),
        }
        let stored = f.service.get_event("evt_other").await.unwrap().unwrap();
        assert_eq!(stored.outcome, EventOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_amount_mismatch_leaves_pending() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;

        let result = send(&f, &webhook("charge.success", Some("evt_short"), &reference, 9_999)).await;
        assert!(matches!(
            result,
            Err(PaymentServiceError::AmountMismatch { expected: 10_000, reported: 9_999 })
        ));

        let detail = f.service.get_transaction(&f.learner, &reference).await.unwrap();
        assert_eq!(detail.transaction.status, PaymentStatus::Pending);
        assert!(f.service.get_event("evt_short").await.unwrap().is_none());
        assert!(f.courses.get_enrollment(f.course_id, f.learner.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirmation_without_amount_leaves_pending() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;

        let body = serde_json::to_vec(&serde_json::json!({
            "event": "charge.success",
            "id": "evt_noamt",
            "data": { "reference": reference }
        }))
        .unwrap();
        assert!(matches!(
            send(&f, &body).await,
            Err(PaymentServiceError::ValidationError(_))
        ));

        let detail = f.service.get_transaction(&f.learner, &reference).await.unwrap();
        assert_eq!(detail.transaction.status, PaymentStatus::Pending);
        assert!(f.service.get_event("evt_noamt").await.unwrap().is_none());
        assert!(f.courses.get_enrollment(f.course_id, f.learner.id).await.unwrap().is_none());

        // A corrected retry under the same id still settles
        let retry = send(&f, &webhook("charge.success", Some("evt_noamt"), &reference, 10_000)).await.unwrap();
        assert!(matches!(retry, WebhookAck::Processed(_)));
        let detail = f.service.get_transaction(&f.learner, &reference).await.unwrap();
        assert_eq!(detail.transaction.status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn test_webhook_signature_and_ignored_events() {
        let f = setup().await;
        let body = webhook("charge.success", None, "ALX-missing", 10_000);

        assert!(matches!(
            f.service.handle_webhook(&body, None).await,
            Err(PaymentServiceError::InvalidSignature)
        ));
        let forged = sign_payload("wrong-secret", &body).unwrap();
        assert!(matches!(
            f.service.handle_webhook(&body, Some(&forged)).await,
            Err(PaymentServiceError::InvalidSignature)
        ));
        assert!(matches!(
            f.service.handle_webhook(&body, Some("zz-not-hex")).await,
            Err(PaymentServiceError::InvalidSignature)
        ));

        assert!(matches!(send(&f, &body).await.unwrap(), WebhookAck::Ignored { .. }));

        let unknown_type = webhook("subscription.create", None, "ALX-missing", 1);
        assert!(matches!(send(&f, &unknown_type).await.unwrap(), WebhookAck::Ignored { .. }));

        let garbage = b"not json".to_vec();
        assert!(matches!(
            send(&f, &garbage).await,
            Err(PaymentServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_transaction_is_terminal() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;

        send(&f, &webhook("charge.failed", Some("evt_fail"), &reference, 10_000)).await.unwrap();
        let detail = f.service.get_transaction(&f.educator, &reference).await.unwrap();
        assert_eq!(detail.transaction.status, PaymentStatus::Failed);
        assert!(detail.splits.iter().all(|s| s.status == PaymentStatus::Failed));

        let result = f.service.verify(&reference, None).await;
        assert!(matches!(
            result,
            Err(PaymentServiceError::InvalidTransition {
                status: PaymentStatus::Failed,
                event: LedgerEvent::Confirm
            })
        ));

        // Failed checkouts do not block a new one
        let retry = f.service.checkout(&f.learner, f.course_id).await.unwrap();
        assert!(retry.created);
        assert_ne!(retry.detail.transaction.reference, reference);
    }

    #[tokio::test]
    async fn test_cancel_by_buyer_only() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;

        assert!(matches!(
            f.service.cancel(&f.educator, &reference).await,
            Err(PaymentServiceError::Forbidden(_))
        ));

        let outcome = f.service.cancel(&f.learner, &reference).await.unwrap();
        assert_eq!(outcome.transaction_status, PaymentStatus::Cancelled);

        let again = f.service.cancel(&f.learner, &reference).await.unwrap();
        assert!(again.duplicate);
    }

    #[tokio::test]
    async fn test_refund_revokes_enrollment_and_keeps_points() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;

        // Refund before settlement is invalid, and must not burn the key
        assert!(matches!(
            f.service.refund(&reference, None).await,
            Err(PaymentServiceError::InvalidTransition { .. })
        ));

        f.service.verify(&reference, Some(10_000)).await.unwrap();
        assert!(f.courses.get_enrollment(f.course_id, f.learner.id).await.unwrap().is_some());

        let outcome = f.service.refund(&reference, Some("requested by learner".to_string())).await.unwrap();
        assert_eq!(outcome.outcome, EventOutcome::Applied);
        assert_eq!(outcome.transaction_status, PaymentStatus::Refunded);

        let detail = f.service.get_transaction(&f.admin, &reference).await.unwrap();
        assert!(detail.splits.iter().all(|s| s.status == PaymentStatus::Refunded));
        assert_eq!(detail.transaction.failure_reason.as_deref(), Some("requested by learner"));
        assert!(f.courses.get_enrollment(f.course_id, f.learner.id).await.unwrap().is_none());
        assert_eq!(f.points.balance(f.learner.id).await.unwrap().points, 20);
    }

    #[tokio::test]
    async fn test_transaction_visibility() {
        let f = setup().await;
        let reference = f.service.checkout(&f.learner, f.course_id).await.unwrap().detail.transaction.reference;
        let stranger = User {
            id: f.learner.id + 100,
            ..f.learner.clone()
        };

        assert!(f.service.get_transaction(&f.learner, &reference).await.is_ok());
        assert!(f.service.get_transaction(&f.educator, &reference).await.is_ok());
        assert!(matches!(
            f.service.get_transaction(&stranger, &reference).await,
            Err(PaymentServiceError::Forbidden(_))
        ));

        let listed = f
            .service
            .list_transactions(Some(PaymentStatus::Pending), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
    }
}
