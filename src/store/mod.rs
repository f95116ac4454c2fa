//! Storage collaborators the engine talks to.
//!
//! The engine holds these as trait objects and never caches what they return
//! for correctness decisions. `InMemoryStore` is the reference implementation,
//! optionally journaled to a write-ahead log.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("overlaps active reservation {0}")]
    Overlap(Ulid),
    #[error("reservation {id} is {actual}")]
    StatusMismatch { id: Ulid, actual: ReservationStatus },
    #[error("payment {id} is {actual}")]
    PaymentStatusMismatch { id: Ulid, actual: PaymentStatus },
    #[error("journal error: {0}")]
    Journal(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Guide-authored catalog: tours, rules, blackouts.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_tour(&self, tour_id: Ulid) -> Result<Option<Tour>, StoreError>;
    async fn put_tour(&self, tour: Tour) -> Result<(), StoreError>;
    /// Deletes the tour and everything it owns.
    async fn delete_tour(&self, tour_id: Ulid) -> Result<(), StoreError>;

    async fn list_rules(&self, tour_id: Ulid) -> Result<Vec<AvailabilityRule>, StoreError>;
    async fn list_active_rules(&self, tour_id: Ulid) -> Result<Vec<AvailabilityRule>, StoreError>;
    async fn get_rule(&self, rule_id: Ulid) -> Result<Option<AvailabilityRule>, StoreError>;
    async fn put_rule(&self, rule: AvailabilityRule) -> Result<(), StoreError>;

    async fn list_exceptions(&self, tour_id: Ulid) -> Result<Vec<AvailabilityException>, StoreError>;
    async fn list_exceptions_overlapping(
        &self,
        tour_id: Ulid,
        window: Span,
    ) -> Result<Vec<AvailabilityException>, StoreError>;
    async fn get_exception(&self, exception_id: Ulid) -> Result<Option<AvailabilityException>, StoreError>;
    /// Inserts or replaces by id.
    async fn put_exception(&self, exception: AvailabilityException) -> Result<(), StoreError>;
    /// Returns the owning tour of the removed exception.
    async fn remove_exception(&self, exception_id: Ulid) -> Result<Ulid, StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    async fn find_overlapping(
        &self,
        tour_id: Ulid,
        window: Span,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn list_for_tour(&self, tour_id: Ulid) -> Result<Vec<Reservation>, StoreError>;

    /// Every reservation booked under `email` (ASCII case-insensitive), newest first.
    async fn list_for_customer(&self, email: &str) -> Result<Vec<Reservation>, StoreError>;

    /// `Pending` reservations whose hold ended strictly before `now`.
    async fn list_expired_pending(&self, now: Ms) -> Result<Vec<Reservation>, StoreError>;

    /// Fails with `Overlap` if an active reservation on the tour intersects.
    async fn insert_pending(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    /// Compare-and-swap on the current status.
    async fn update_status(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        change: StatusChange,
    ) -> Result<Reservation, StoreError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError>;
    async fn find_by_provider_id(&self, provider_payment_id: &str) -> Result<Option<Payment>, StoreError>;
    async fn find_by_reservation(&self, reservation_id: Ulid) -> Result<Option<Payment>, StoreError>;

    /// Compare-and-swap on the current payment status.
    async fn update_payment(
        &self,
        id: Ulid,
        expected: PaymentStatus,
        change: PaymentChange,
    ) -> Result<Payment, StoreError>;

    /// Idempotent per `(payment_id, kind)`: a repeat returns the first record.
    async fn record_anomaly(
        &self,
        anomaly: ReconciliationAnomaly,
    ) -> Result<ReconciliationAnomaly, StoreError>;
    async fn list_anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, StoreError>;
}
