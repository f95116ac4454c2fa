use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{Ms, ReservationStatus, Transition};
use crate::store::StoreError;

/// Why a candidate slot cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRejection {
    TourInactive,
    NoMatchingRule,
    LeadTime,
    Blackout(Ulid),
    Conflict(Ulid),
}

impl fmt::Display for SlotRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRejection::TourInactive => f.write_str("tour is not active"),
            SlotRejection::NoMatchingRule => f.write_str("no availability rule offers this start"),
            SlotRejection::LeadTime => f.write_str("too close to start"),
            SlotRejection::Blackout(id) => write!(f, "blacked out by exception {id}"),
            SlotRejection::Conflict(id) => write!(f, "taken by reservation {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tour not found: {0}")]
    TourNotFound(Ulid),
    #[error("reservation not found: {0}")]
    ReservationNotFound(Ulid),
    #[error("rule not found: {0}")]
    RuleNotFound(Ulid),
    #[error("exception not found: {0}")]
    ExceptionNotFound(Ulid),
    #[error("payment not found: {0}")]
    PaymentNotFound(String),
    #[error("slot at {start} on tour {tour_id} not available: {reason}")]
    SlotNotAvailable {
        tour_id: Ulid,
        start: Ms,
        reason: SlotRejection,
    },
    #[error("invalid participants: {requested} (capacity {capacity})")]
    InvalidParticipants { requested: u32, capacity: u32 },
    #[error("invalid interval: {0}")]
    InvalidInterval(&'static str),
    #[error("invalid customer: {0}")]
    InvalidCustomer(&'static str),
    #[error("invalid catalog entry: {0}")]
    InvalidCatalog(&'static str),
    #[error("invalid payment: {0}")]
    InvalidPayment(&'static str),
    #[error("cannot {transition} reservation {id}: it is {from}")]
    InvalidStateTransition {
        id: Ulid,
        from: ReservationStatus,
        transition: Transition,
    },
    #[error("hold on reservation {id} runs until {expires_at}")]
    HoldActive { id: Ulid, expires_at: Ms },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::TourNotFound(_) => "tour_not_found",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::RuleNotFound(_) => "rule_not_found",
            EngineError::ExceptionNotFound(_) => "exception_not_found",
            EngineError::PaymentNotFound(_) => "payment_not_found",
            EngineError::SlotNotAvailable { .. } => "slot_not_available",
            EngineError::InvalidParticipants { .. } => "invalid_participants",
            EngineError::InvalidInterval(_) => "invalid_interval",
            EngineError::InvalidCustomer(_) => "invalid_customer",
            EngineError::InvalidCatalog(_) => "invalid_catalog",
            EngineError::InvalidPayment(_) => "invalid_payment",
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::HoldActive { .. } => "hold_active",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict(_) => "conflict",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }

    /// Transient failures the caller may retry as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_) | EngineError::Conflict(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            // Callers resolve the entity first; a miss here means it vanished underneath us.
            StoreError::NotFound(id) => EngineError::Conflict(format!("{id} was removed concurrently")),
            StoreError::AlreadyExists(key) => EngineError::AlreadyExists(key),
            StoreError::Overlap(id) => EngineError::Conflict(format!("overlaps reservation {id}")),
            StoreError::StatusMismatch { id, actual } => {
                EngineError::Conflict(format!("reservation {id} is now {actual}"))
            }
            StoreError::PaymentStatusMismatch { id, actual } => {
                EngineError::Conflict(format!("payment {id} is now {actual}"))
            }
            StoreError::Journal(msg) | StoreError::Unavailable(msg) => EngineError::Unavailable(msg),
        }
    }
}
