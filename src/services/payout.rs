//! Educator earnings and payouts
//!
//! Earnings are read from educator splits: pending sales, confirmed
//! (earned) sales and refunds. `available = earned - paid_out - requested`.
//! An educator may hold one open payout request at a time; admins mark it
//! paid or rejected.

use crate::config::PaymentsConfig;
use crate::db::repositories::{PaymentRepository, PayoutRepository};
use crate::models::{
    CourseEarnings, EarningsSummary, ListParams, PagedResult, PaymentSplit, Payout, PayoutStatus,
    User,
};
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PayoutServiceError {
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Payout not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct PayoutService {
    payments: Arc<dyn PaymentRepository>,
    payouts: Arc<dyn PayoutRepository>,
    currency: String,
    min_payout: i64,
}

impl PayoutService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        payouts: Arc<dyn PayoutRepository>,
        config: &PaymentsConfig,
    ) -> Self {
        Self {
            payments,
            payouts,
            currency: config.currency.clone(),
            min_payout: config.min_payout,
        }
    }

    pub async fn earnings_summary(&self, educator_id: i64) -> Result<EarningsSummary, PayoutServiceError> {
        let splits = self
            .payments
            .educator_split_totals(educator_id)
            .await
            .context("Failed to sum educator splits")?;
        let payouts = self
            .payouts
            .totals(educator_id)
            .await
            .context("Failed to sum payouts")?;
        Ok(EarningsSummary::new(splits, payouts, self.currency.clone()))
    }

    pub async fn earnings_by_course(&self, educator_id: i64) -> Result<Vec<CourseEarnings>, PayoutServiceError> {
        Ok(self.payments.earnings_by_course(educator_id).await?)
    }

    pub async fn recent_splits(
        &self,
        educator_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<PaymentSplit>, PayoutServiceError> {
        let (items, total) = self.payments.educator_splits(educator_id, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Ask for `amount` of the available balance to be paid out
    pub async fn request_payout(&self, educator: &User, amount: i64) -> Result<Payout, PayoutServiceError> {
        if !educator.is_educator() {
            return Err(PayoutServiceError::Forbidden(
                "Only educators can request payouts".to_string(),
            ));
        }
        if amount <= 0 || amount < self.min_payout {
            return Err(PayoutServiceError::Unprocessable(format!(
                "Minimum payout is {} {}",
                self.min_payout, self.currency
            )));
        }

        let summary = self.earnings_summary(educator.id).await?;
        if amount > summary.available {
            return Err(PayoutServiceError::Unprocessable(format!(
                "Requested {} but only {} is available",
                amount, summary.available
            )));
        }

        let payout = self
            .payouts
            .create_request(educator.id, amount, &self.currency)
            .await
            .context("Failed to create payout request")?
            .ok_or_else(|| {
                PayoutServiceError::Conflict("A payout request is already open".to_string())
            })?;

        tracing::info!(payout_id = payout.id, educator_id = educator.id, amount, "payout requested");
        Ok(payout)
    }

    pub async fn approve_payout(&self, admin: &User, id: i64, note: Option<&str>) -> Result<Payout, PayoutServiceError> {
        self.close(admin, id, PayoutStatus::Paid, note).await
    }

    pub async fn reject_payout(&self, admin: &User, id: i64, note: Option<&str>) -> Result<Payout, PayoutServiceError> {
        self.close(admin, id, PayoutStatus::Rejected, note).await
    }

    /// Payouts newest first; `None` lists every educator's
    pub async fn list_payouts(
        &self,
        educator_id: Option<i64>,
        params: &ListParams,
    ) -> Result<PagedResult<Payout>, PayoutServiceError> {
        let (items, total) = self.payouts.list(educator_id, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn close(
        &self,
        admin: &User,
        id: i64,
        to: PayoutStatus,
        note: Option<&str>,
    ) -> Result<Payout, PayoutServiceError> {
        if !admin.is_admin() {
            return Err(PayoutServiceError::Forbidden("Admin access required".to_string()));
        }

        let payout = self.find(id).await?;
        if payout.status != PayoutStatus::Requested {
            return Err(PayoutServiceError::Conflict(format!("Payout is already {}", payout.status)));
        }

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if !self.payouts.close(id, to, admin.id, note).await? {
            return Err(PayoutServiceError::Conflict("Payout was closed concurrently".to_string()));
        }

        tracing::info!(payout_id = id, admin_id = admin.id, status = %to, "payout closed");
        self.find(id).await
    }

    async fn find(&self, id: i64) -> Result<Payout, PayoutServiceError> {
        self.payouts
            .get_by_id(id)
            .await
            .context("Failed to get payout")?
            .ok_or(PayoutServiceError::NotFound)
    }
}
