use ulid::Ulid;

use crate::limits::MAX_EMAIL_LEN;
use crate::model::*;
use crate::observability::{SLOT_CACHE_HITS_TOTAL, SLOT_CACHE_MISSES_TOTAL};

use super::conflict::validate_window;
use super::{compute_slots, Engine, EngineError};

impl Engine {
    /// Bookable starts in `[from, to)`. Advisory: served from the read cache
    /// when fresh, and never consulted by admission.
    pub async fn available_slots(&self, tour_id: Ulid, from: Ms, to: Ms) -> Result<Vec<Ms>, EngineError> {
        let window = validate_window(from, to)?;
        let now = self.clock.now();
        if let Some(slots) = self.cache.get(tour_id, window, now) {
            metrics::counter!(SLOT_CACHE_HITS_TOTAL).increment(1);
            return Ok(slots);
        }
        metrics::counter!(SLOT_CACHE_MISSES_TOTAL).increment(1);

        let tour = self.require_tour(tour_id).await?;
        // Candidates may run past the window end by up to one tour length.
        let reach = Span::new(window.start, window.end + tour.duration_ms());
        let rules = self.bounded(self.rules.list_active_rules(tour_id)).await?;
        let exceptions = self
            .bounded(self.rules.list_exceptions_overlapping(tour_id, reach))
            .await?;
        let reservations = self
            .bounded(
                self.reservations
                    .find_overlapping(tour_id, reach, &ReservationStatus::ACTIVE),
            )
            .await?;

        let slots = compute_slots(&tour, &rules, &exceptions, &reservations, window, now);
        self.cache.put(tour_id, window, now, slots.clone());
        Ok(slots)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.require_reservation(id).await
    }

    pub async fn reservations_for_tour(&self, tour_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        self.require_tour(tour_id).await?;
        self.bounded(self.reservations.list_for_tour(tour_id)).await
    }

    /// A customer's own bookings across all tours, newest first.
    pub async fn reservations_for_customer(&self, email: &str) -> Result<Vec<Reservation>, EngineError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(EngineError::InvalidCustomer("email is required"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        self.bounded(self.reservations.list_for_customer(email)).await
    }
}
