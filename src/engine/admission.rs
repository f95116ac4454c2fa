use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability::{ADMISSIONS_TOTAL, ADMIT_DURATION_SECONDS};
use crate::store::StoreError;

use super::conflict::{admitting_rule, check_blackouts, check_reservations, validate_customer, validate_span};
use super::{Engine, EngineError, SlotRejection};

impl Engine {
    /// Turn a requested start into a `Pending` reservation, or reject it.
    ///
    /// Everything the decision depends on is re-read inside the tour's
    /// critical section, and the store's exclusion constraint backs the
    /// check up. Nothing is written unless every check passes.
    pub async fn admit(
        &self,
        tour_id: Ulid,
        start: Ms,
        participants: u32,
        customer: CustomerInfo,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.admit_inner(tour_id, start, participants, customer).await;
        let outcome = match &result {
            Ok(_) => "admitted",
            Err(e) => e.label(),
        };
        metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(ADMIT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(tour = %tour_id, start, "admission rejected: {e}");
        }
        result
    }

    async fn admit_inner(
        &self,
        tour_id: Ulid,
        start: Ms,
        participants: u32,
        customer: CustomerInfo,
    ) -> Result<Reservation, EngineError> {
        validate_customer(&customer)?;
        if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&start) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        let reject = |reason: SlotRejection| EngineError::SlotNotAvailable {
            tour_id,
            start,
            reason,
        };

        let section = self.enter_tour(tour_id).await?;
        let tour = self.require_tour(tour_id).await?;
        if participants == 0 {
            return Err(EngineError::InvalidParticipants {
                requested: 0,
                capacity: tour.max_capacity,
            });
        }
        if !tour.active {
            return Err(reject(SlotRejection::TourInactive));
        }
        let span = Span::new(start, start + tour.duration_ms());
        validate_span(&span)?;

        let now = self.clock.now();
        let rules = self.bounded(self.rules.list_active_rules(tour_id)).await?;
        let rule = admitting_rule(&rules, start, now).map_err(reject)?;
        let capacity = tour.max_capacity.min(rule.max_capacity);
        if participants > capacity {
            return Err(EngineError::InvalidParticipants {
                requested: participants,
                capacity,
            });
        }

        let mut exceptions = self
            .bounded(self.rules.list_exceptions_overlapping(tour_id, span))
            .await?;
        exceptions.sort_by_key(|e| e.span.start);
        check_blackouts(&span, &exceptions).map_err(reject)?;

        let mut existing = self
            .bounded(
                self.reservations
                    .find_overlapping(tour_id, span, &ReservationStatus::ACTIVE),
            )
            .await?;
        existing.sort_by_key(|r| r.span.start);
        check_reservations(&span, &existing).map_err(reject)?;

        let total_price_cents = tour
            .price_cents
            .checked_mul(u64::from(participants))
            .ok_or(EngineError::LimitExceeded("total price overflows"))?;

        let reservation = Reservation {
            id: Ulid::new(),
            tour_id,
            span,
            participants,
            total_price_cents,
            customer,
            status: ReservationStatus::Pending,
            created_at: now,
            expires_at: now + self.settings.hold_window_ms,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };
        let reservation = match self.timed(self.reservations.insert_pending(reservation)).await? {
            Ok(r) => r,
            Err(StoreError::Overlap(other)) => return Err(reject(SlotRejection::Conflict(other))),
            Err(e) => return Err(e.into()),
        };
        drop(section);

        self.cache.invalidate(tour_id);
        info!(
            reservation = %reservation.id,
            tour = %tour_id,
            start,
            participants,
            expires_at = reservation.expires_at,
            "reservation admitted"
        );
        self.emit(NotificationKind::PendingCreated, &reservation);
        Ok(reservation)
    }
}
