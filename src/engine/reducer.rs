use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_PROVIDER_ID_LEN;
use crate::model::*;
use crate::observability::{ANOMALIES_TOTAL, PAYMENT_OUTCOMES_TOTAL};
use crate::store::StoreError;
use crate::webhook::PaymentOutcome;

use super::{Engine, EngineError};

const DEFAULT_FAILURE_REASON: &str = "unknown payment error";
const PAYMENT_FAILURE: &str = "payment failure";

/// What a payment outcome did. Every variant is an acknowledgement to the
/// provider; only store unavailability surfaces as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentDisposition {
    Confirmed(Reservation),
    Cancelled(Reservation),
    /// No payment with that provider id (replay or foreign event).
    Unknown,
    /// The payment had already settled the other way.
    Ignored,
    Anomaly(ReconciliationAnomaly),
}

impl PaymentDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentDisposition::Confirmed(_) => "confirmed",
            PaymentDisposition::Cancelled(_) => "cancelled",
            PaymentDisposition::Unknown => "unknown",
            PaymentDisposition::Ignored => "ignored",
            PaymentDisposition::Anomaly(_) => "anomaly",
        }
    }
}

impl Engine {
    /// Attach a pending payment to a Pending reservation.
    pub async fn open_payment(
        &self,
        reservation_id: Ulid,
        provider_payment_id: &str,
    ) -> Result<Payment, EngineError> {
        if provider_payment_id.is_empty() {
            return Err(EngineError::InvalidPayment("provider payment id is required"));
        }
        if provider_payment_id.len() > MAX_PROVIDER_ID_LEN {
            return Err(EngineError::LimitExceeded("provider payment id too long"));
        }

        let reservation = self.require_reservation(reservation_id).await?;
        if let Some(existing) = self
            .bounded(self.payments.find_by_reservation(reservation_id))
            .await?
        {
            if existing.provider_payment_id == provider_payment_id {
                return Ok(existing);
            }
            return Err(EngineError::Conflict(format!(
                "reservation {reservation_id} already has payment {}",
                existing.id
            )));
        }
        if reservation.status != ReservationStatus::Pending {
            return Err(EngineError::Conflict(format!(
                "reservation {reservation_id} is {}",
                reservation.status
            )));
        }

        let payment = Payment {
            id: Ulid::new(),
            reservation_id,
            amount_cents: reservation.total_price_cents,
            currency: "EUR".into(),
            provider_payment_id: provider_payment_id.to_string(),
            status: PaymentStatus::Pending,
            created_at: self.clock.now(),
            completed_at: None,
            failed_at: None,
            failure_reason: None,
            refunded_at: None,
        };
        match self.timed(self.payments.insert_payment(payment)).await? {
            Ok(p) => {
                info!(payment = %p.id, reservation = %reservation_id, amount_cents = p.amount_cents, "payment opened");
                Ok(p)
            }
            Err(StoreError::AlreadyExists(_)) => {
                // Raced with an identical open, or the provider id is taken.
                match self
                    .bounded(self.payments.find_by_provider_id(provider_payment_id))
                    .await?
                {
                    Some(p) if p.reservation_id == reservation_id => Ok(p),
                    _ => Err(EngineError::Conflict(format!(
                        "provider payment {provider_payment_id} is already in use"
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn payment_for_reservation(&self, reservation_id: Ulid) -> Result<Payment, EngineError> {
        self.bounded(self.payments.find_by_reservation(reservation_id))
            .await?
            .ok_or_else(|| EngineError::PaymentNotFound(reservation_id.to_string()))
    }

    /// Reduce a decoded provider event onto the payment and its reservation.
    pub async fn on_payment_outcome(
        &self,
        outcome: PaymentOutcome,
    ) -> Result<PaymentDisposition, EngineError> {
        let label = outcome.label();
        let disposition = match outcome {
            PaymentOutcome::Succeeded { provider_payment_id } => {
                self.payment_succeeded(&provider_payment_id).await?
            }
            PaymentOutcome::Failed {
                provider_payment_id,
                failure_reason,
            } => {
                self.payment_failed(&provider_payment_id, failure_reason)
                    .await?
            }
        };
        metrics::counter!(
            PAYMENT_OUTCOMES_TOTAL,
            "outcome" => label,
            "disposition" => disposition.label()
        )
        .increment(1);
        Ok(disposition)
    }

    async fn payment_succeeded(&self, provider_payment_id: &str) -> Result<PaymentDisposition, EngineError> {
        let Some(payment) = self
            .bounded(self.payments.find_by_provider_id(provider_payment_id))
            .await?
        else {
            warn!(provider_id = provider_payment_id, "success for unknown payment, discarding");
            return Ok(PaymentDisposition::Unknown);
        };

        match payment.status {
            PaymentStatus::Pending => {
                let change = PaymentChange {
                    status: PaymentStatus::Completed,
                    at: self.clock.now(),
                    failure_reason: None,
                };
                match self
                    .timed(self.payments.update_payment(payment.id, PaymentStatus::Pending, change))
                    .await?
                {
                    Ok(_) | Err(StoreError::PaymentStatusMismatch { actual: PaymentStatus::Completed, .. }) => {}
                    Err(StoreError::PaymentStatusMismatch { actual, .. }) => {
                        warn!(payment = %payment.id, %actual, "success arrived after payment settled");
                        return Ok(PaymentDisposition::Ignored);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            // Redelivery: confirming again below is idempotent.
            PaymentStatus::Completed => {}
            PaymentStatus::Failed | PaymentStatus::Refunded => {
                warn!(payment = %payment.id, status = %payment.status, "success arrived after payment settled");
                return Ok(PaymentDisposition::Ignored);
            }
        }

        match self
            .apply_transition(payment.reservation_id, Transition::Confirm, None)
            .await
        {
            Ok((reservation, _)) => Ok(PaymentDisposition::Confirmed(reservation)),
            // Lost race with expiry or cancellation: money taken, slot released.
            Err(EngineError::InvalidStateTransition { from, .. }) => {
                let anomaly = self
                    .record_anomaly(
                        AnomalyKind::PaymentAfterRelease { status: from },
                        payment.reservation_id,
                        Some(payment.id),
                        &format!(
                            "payment {} succeeded but reservation is {from}",
                            payment.provider_payment_id
                        ),
                    )
                    .await?;
                Ok(PaymentDisposition::Anomaly(anomaly))
            }
            Err(EngineError::ReservationNotFound(id)) => {
                warn!(reservation = %id, payment = %payment.id, "reservation gone for successful payment");
                Ok(PaymentDisposition::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    async fn payment_failed(
        &self,
        provider_payment_id: &str,
        failure_reason: Option<String>,
    ) -> Result<PaymentDisposition, EngineError> {
        let Some(payment) = self
            .bounded(self.payments.find_by_provider_id(provider_payment_id))
            .await?
        else {
            warn!(provider_id = provider_payment_id, "failure for unknown payment, discarding");
            return Ok(PaymentDisposition::Unknown);
        };

        match payment.status {
            PaymentStatus::Pending => {
                let change = PaymentChange {
                    status: PaymentStatus::Failed,
                    at: self.clock.now(),
                    failure_reason: Some(
                        failure_reason.unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string()),
                    ),
                };
                match self
                    .timed(self.payments.update_payment(payment.id, PaymentStatus::Pending, change))
                    .await?
                {
                    Ok(_) | Err(StoreError::PaymentStatusMismatch { actual: PaymentStatus::Failed, .. }) => {}
                    Err(StoreError::PaymentStatusMismatch { actual, .. }) => {
                        warn!(payment = %payment.id, %actual, "failure arrived after payment settled");
                        return Ok(PaymentDisposition::Ignored);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            PaymentStatus::Failed => {}
            PaymentStatus::Completed | PaymentStatus::Refunded => {
                warn!(payment = %payment.id, status = %payment.status, "failure arrived after payment settled");
                return Ok(PaymentDisposition::Ignored);
            }
        }

        match self
            .apply_transition(
                payment.reservation_id,
                Transition::Cancel,
                Some(PAYMENT_FAILURE.to_string()),
            )
            .await
        {
            Ok((reservation, _)) => Ok(PaymentDisposition::Cancelled(reservation)),
            Err(e @ (EngineError::InvalidStateTransition { .. } | EngineError::ReservationNotFound(_))) => {
                warn!(payment = %payment.id, "payment failure not applied: {e}");
                Ok(PaymentDisposition::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    pub(super) async fn record_anomaly(
        &self,
        kind: AnomalyKind,
        reservation_id: Ulid,
        payment_id: Option<Ulid>,
        detail: &str,
    ) -> Result<ReconciliationAnomaly, EngineError> {
        let label = kind.label();
        let anomaly = ReconciliationAnomaly {
            id: Ulid::new(),
            kind,
            reservation_id,
            payment_id,
            detail: detail.to_string(),
            recorded_at: self.clock.now(),
        };
        let stored = self.bounded(self.payments.record_anomaly(anomaly)).await?;
        metrics::counter!(ANOMALIES_TOTAL, "kind" => label).increment(1);
        warn!(
            anomaly = %stored.id,
            kind = label,
            reservation = %reservation_id,
            "reconciliation anomaly recorded: {}",
            stored.detail
        );
        Ok(stored)
    }

    pub async fn anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, EngineError> {
        self.bounded(self.payments.list_anomalies()).await
    }
}
