use std::time::Instant;

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability::{EXPIRATIONS_TOTAL, SWEEP_DURATION_SECONDS, TRANSITIONS_TOTAL};
use crate::store::StoreError;

use super::{Engine, EngineError};

/// Outcome of one expiry pass. Failures are per reservation; the pass
/// always runs to the end of the batch.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired: usize,
    pub skipped: usize,
    pub failed: Vec<(Ulid, EngineError)>,
}

fn notification_for(status: ReservationStatus) -> Option<NotificationKind> {
    match status {
        ReservationStatus::Confirmed => Some(NotificationKind::Confirmed),
        ReservationStatus::Cancelled => Some(NotificationKind::Cancelled),
        ReservationStatus::Expired => Some(NotificationKind::Expired),
        ReservationStatus::Pending => None,
    }
}

impl Engine {
    pub async fn confirm(&self, id: Ulid) -> Result<Reservation, EngineError> {
        Ok(self.apply_transition(id, Transition::Confirm, None).await?.0)
    }

    /// Cancel a Pending or Confirmed reservation. A completed payment is
    /// refunded before this returns.
    ///
    /// Safe to retry after any error: a retry that finds the reservation
    /// already cancelled still settles an outstanding refund.
    pub async fn cancel(&self, id: Ulid, reason: &str) -> Result<Reservation, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let (reservation, _) = self
            .apply_transition(id, Transition::Cancel, Some(reason.to_string()))
            .await?;
        // Refunds for one tour run one at a time, so concurrent cancels
        // cannot both see the payment as Completed.
        let section = self.enter_tour(reservation.tour_id).await?;
        self.refund_if_paid(&reservation).await;
        drop(section);
        Ok(reservation)
    }

    /// Release a Pending reservation whose hold has run out.
    pub async fn expire(&self, id: Ulid) -> Result<Reservation, EngineError> {
        Ok(self.apply_transition(id, Transition::Expire, None).await?.0)
    }

    /// Drive one state-machine step. Returns the reservation and whether this
    /// call changed it; a reservation already in the target state is an
    /// accepted replay.
    pub(super) async fn apply_transition(
        &self,
        id: Ulid,
        transition: Transition,
        reason: Option<String>,
    ) -> Result<(Reservation, bool), EngineError> {
        let tour_id = self.require_reservation(id).await?.tour_id;
        let section = self.enter_tour(tour_id).await?;
        let current = self.require_reservation(id).await?;

        let target = transition.target();
        if current.status == target {
            warn!(reservation = %id, transition = %transition, "transition already applied, ignoring");
            return Ok((current, false));
        }
        let Some(next) = current.status.next(transition) else {
            warn!(reservation = %id, from = %current.status, transition = %transition, "illegal transition");
            return Err(EngineError::InvalidStateTransition {
                id,
                from: current.status,
                transition,
            });
        };

        let now = self.clock.now();
        if transition == Transition::Expire && now < current.expires_at {
            return Err(EngineError::HoldActive {
                id,
                expires_at: current.expires_at,
            });
        }

        let change = StatusChange {
            status: next,
            at: now,
            reason,
        };
        let updated = match self
            .timed(self.reservations.update_status(id, current.status, change))
            .await?
        {
            Ok(r) => r,
            Err(StoreError::StatusMismatch { actual, .. }) if actual == target => {
                warn!(reservation = %id, transition = %transition, "lost race to identical transition");
                return Ok((self.require_reservation(id).await?, false));
            }
            Err(StoreError::NotFound(_)) => return Err(EngineError::ReservationNotFound(id)),
            Err(e) => return Err(e.into()),
        };
        drop(section);

        if !next.is_active() {
            self.cache.invalidate(tour_id);
        }
        metrics::counter!(TRANSITIONS_TOTAL, "transition" => transition.label()).increment(1);
        info!(reservation = %id, tour = %tour_id, from = %current.status, to = %next, "reservation transitioned");
        if let Some(kind) = notification_for(next) {
            self.emit(kind, &updated);
        }
        Ok((updated, true))
    }

    pub(super) async fn require_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.bounded(self.reservations.get_reservation(id))
            .await?
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Refund a completed payment after cancellation. Failures never undo the
    /// cancellation; they are recorded as anomalies. A payment that is no
    /// longer Completed has been settled already and is left alone.
    async fn refund_if_paid(&self, reservation: &Reservation) {
        let payment = match self
            .bounded(self.payments.find_by_reservation(reservation.id))
            .await
        {
            Ok(Some(p)) if p.status == PaymentStatus::Completed => p,
            Ok(_) => return,
            Err(e) => {
                error!(reservation = %reservation.id, "could not look up payment for refund: {e}");
                self.note_refund_failure(reservation, None, &e.to_string()).await;
                return;
            }
        };

        let refund = tokio::time::timeout(
            self.settings.store_timeout,
            self.gateway.request_refund(&payment),
        )
        .await;
        let failure = match refund {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("refund request timed out".to_string()),
        };
        if let Some(detail) = failure {
            error!(reservation = %reservation.id, payment = %payment.id, "refund failed: {detail}");
            self.note_refund_failure(reservation, Some(payment.id), &detail).await;
            return;
        }

        let change = PaymentChange {
            status: PaymentStatus::Refunded,
            at: self.clock.now(),
            failure_reason: None,
        };
        match self
            .bounded(self.payments.update_payment(payment.id, PaymentStatus::Completed, change))
            .await
        {
            Ok(_) => info!(reservation = %reservation.id, payment = %payment.id, "payment refunded"),
            Err(e) => {
                error!(payment = %payment.id, "refund sent but not recorded: {e}");
                self.note_refund_failure(reservation, Some(payment.id), &e.to_string())
                    .await;
            }
        }
    }

    async fn note_refund_failure(&self, reservation: &Reservation, payment_id: Option<Ulid>, detail: &str) {
        if let Err(e) = self
            .record_anomaly(AnomalyKind::RefundFailed, reservation.id, payment_id, detail)
            .await
        {
            error!(reservation = %reservation.id, "could not record refund anomaly: {e}");
        }
    }

    /// Expire every Pending reservation whose hold ended before now.
    pub async fn sweep_expired(&self) -> Result<SweepReport, EngineError> {
        let started = Instant::now();
        let now = self.clock.now();
        let due = self
            .bounded(self.reservations.list_expired_pending(now))
            .await?;

        let mut report = SweepReport::default();
        for reservation in due {
            match self
                .apply_transition(reservation.id, Transition::Expire, None)
                .await
            {
                Ok((_, true)) => {
                    report.expired += 1;
                    metrics::counter!(EXPIRATIONS_TOTAL).increment(1);
                }
                Ok((_, false)) => report.skipped += 1,
                // Resolved or removed since the listing.
                Err(e @ (EngineError::InvalidStateTransition { .. } | EngineError::ReservationNotFound(_))) => {
                    debug!(reservation = %reservation.id, "sweeper skip: {e}");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(reservation = %reservation.id, "sweeper failed to expire: {e}");
                    report.failed.push((reservation.id, e));
                }
            }
        }

        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if report.expired > 0 || !report.failed.is_empty() {
            info!(
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed.len(),
                "expiry sweep finished"
            );
        }
        Ok(report)
    }
}
