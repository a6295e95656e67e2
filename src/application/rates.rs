use crate::domain::account::UserId;
use crate::domain::audit::{AuditAction, AuditEvent, RateChangeMetadata};
use crate::domain::interest::{Frequency, InterestRate, InterestRateId};
use crate::domain::ports::{AuditSinkRef, RateStore, RateStoreRef, ReschedulerRef};
use crate::error::{LedgerError, Result, Violation};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

/// The single configured rate, or `NotInitialized` if none has been created.
pub async fn load_current_rate(rates: &dyn RateStore) -> Result<InterestRate> {
    rates.current_rate().await?.ok_or_else(|| {
        LedgerError::NotInitialized("interest rate has not been initialized".to_string())
    })
}

/// Administers the system-wide interest rate.
///
/// Only a frequency change alters the accrual schedule. The accrual job reads
/// the rate on every run, so a new rate value takes effect on the next tick
/// without reinstalling anything.
#[derive(Clone)]
pub struct RateAdministration {
    rates: RateStoreRef,
    audit: AuditSinkRef,
    scheduler: ReschedulerRef,
}

impl RateAdministration {
    pub fn new(rates: RateStoreRef, audit: AuditSinkRef, scheduler: ReschedulerRef) -> Self {
        Self {
            rates,
            audit,
            scheduler,
        }
    }

    pub async fn current_rate(&self) -> Result<InterestRate> {
        load_current_rate(self.rates.as_ref()).await
    }

    /// Creates the rate. If one already exists its id is returned and nothing
    /// changes.
    #[instrument(skip(self))]
    pub async fn create_rate(
        &self,
        percent: Decimal,
        frequency: Frequency,
        user_id: UserId,
    ) -> Result<InterestRateId> {
        if let Some(existing) = self.rates.current_rate().await? {
            return Ok(existing.id);
        }
        let rate = InterestRate::scaled_from_percent(percent)?;
        if rate <= 0 {
            return Err(Violation::InvalidRate(percent).into());
        }

        let candidate = InterestRate::new(rate, frequency);
        let candidate_id = candidate.id;
        // A concurrent create may have won; the store then hands back its rate.
        let saved = self.rates.insert_rate(candidate).await?;
        if saved.id == candidate_id {
            self.record(
                user_id,
                RateChangeMetadata {
                    new_rate: Some(rate),
                    new_calculation_frequency: Some(frequency.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await;
            self.reschedule().await;
        }
        info!(interest_rate_id = %saved.id, rate = saved.rate, "interest rate created");
        Ok(saved.id)
    }

    #[instrument(skip(self))]
    pub async fn update_rate(&self, percent: Decimal, user_id: UserId) -> Result<InterestRateId> {
        let mut current = self.current_rate().await?;
        let rate = InterestRate::scaled_from_percent(percent)?;
        if rate < 0 {
            return Err(Violation::InvalidRate(percent).into());
        }

        let old_rate = current.rate;
        current.rate = rate;
        current.updated_at = Utc::now();
        self.rates.update_rate(current.clone()).await?;

        self.record(
            user_id,
            RateChangeMetadata {
                old_rate: Some(old_rate),
                new_rate: Some(rate),
                ..Default::default()
            },
        )
        .await;
        info!(interest_rate_id = %current.id, old_rate, new_rate = rate, "interest rate updated");
        Ok(current.id)
    }

    /// Changes how often interest accrues and reinstalls the accrual job.
    /// Setting the current frequency again is a no-op.
    #[instrument(skip(self))]
    pub async fn update_frequency(
        &self,
        frequency: Frequency,
        user_id: UserId,
    ) -> Result<InterestRateId> {
        let mut current = self.current_rate().await?;
        if current.calculation_frequency == frequency.as_str() {
            return Ok(current.id);
        }

        let old_frequency = std::mem::replace(
            &mut current.calculation_frequency,
            frequency.as_str().to_string(),
        );
        current.updated_at = Utc::now();
        self.rates.update_rate(current.clone()).await?;

        self.record(
            user_id,
            RateChangeMetadata {
                old_calculation_frequency: Some(old_frequency),
                new_calculation_frequency: Some(frequency.as_str().to_string()),
                ..Default::default()
            },
        )
        .await;
        self.reschedule().await;
        info!(interest_rate_id = %current.id, %frequency, "calculation frequency updated");
        Ok(current.id)
    }

    async fn record(&self, user_id: UserId, metadata: RateChangeMetadata) {
        let event = match AuditEvent::new(AuditAction::InterestRateChange, user_id, None)
            .with_metadata(&metadata)
        {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "failed to build audit event");
                return;
            }
        };
        if let Err(e) = self.audit.submit(event).await {
            warn!(error = %e, "failed to submit audit log");
        }
    }

    /// The change is already persisted; a failed reinstall is picked up by the
    /// next process start.
    async fn reschedule(&self) {
        if let Err(e) = self.scheduler.reschedule().await {
            warn!(error = %e, "failed to reschedule interest accrual");
        }
    }
}
