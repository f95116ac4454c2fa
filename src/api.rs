//! Transport-neutral request handlers for the public surface.
//!
//! Timestamps cross this boundary as ISO-8601 local date-times
//! (`2024-06-03T09:00:00`). Engine errors leave as [`ApiError`] with a stable
//! code and an HTTP-equivalent status; store internals never reach the caller.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, PaymentDisposition, SlotRejection};
use crate::model::*;
use crate::webhook::{self, WebhookError};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn new(status: u16, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(400, code, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)
    }
}

fn slot_message(reason: &SlotRejection) -> &'static str {
    match reason {
        SlotRejection::TourInactive => "this tour is not currently bookable",
        SlotRejection::NoMatchingRule => "the tour does not run at this time",
        SlotRejection::LeadTime => "this start is too soon to book",
        SlotRejection::Blackout(_) => "the tour is closed at this time",
        SlotRejection::Conflict(_) => "this slot has already been booked",
    }
}

impl From<&EngineError> for ApiError {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::TourNotFound(_) => Self::new(404, "tour_not_found", e.to_string()),
            EngineError::ReservationNotFound(_) => {
                Self::new(404, "reservation_not_found", e.to_string())
            }
            EngineError::RuleNotFound(_) => Self::new(404, "rule_not_found", e.to_string()),
            EngineError::ExceptionNotFound(_) => {
                Self::new(404, "exception_not_found", e.to_string())
            }
            EngineError::PaymentNotFound(_) => Self::new(404, "payment_not_found", "payment not found"),
            EngineError::SlotNotAvailable { reason, .. } => {
                Self::new(409, "slot_not_available", slot_message(reason))
            }
            EngineError::InvalidParticipants { .. } => {
                Self::bad_request("invalid_participants", e.to_string())
            }
            EngineError::InvalidInterval(_) => Self::bad_request("invalid_interval", e.to_string()),
            EngineError::InvalidCustomer(_) => Self::bad_request("invalid_customer", e.to_string()),
            EngineError::InvalidCatalog(_) => Self::bad_request("invalid_catalog", e.to_string()),
            EngineError::InvalidPayment(_) => Self::bad_request("invalid_payment", e.to_string()),
            EngineError::InvalidStateTransition { .. } | EngineError::HoldActive { .. } => {
                Self::new(409, "invalid_state_transition", e.to_string())
            }
            EngineError::AlreadyExists(_) | EngineError::Conflict(_) => Self::new(
                409,
                "conflict",
                "the request conflicted with a concurrent change, retry",
            ),
            EngineError::Unavailable(_) => Self::new(
                503,
                "unavailable",
                "service temporarily unavailable, retry later",
            ),
            EngineError::LimitExceeded(_) => Self::bad_request("limit_exceeded", e.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        if matches!(e, EngineError::Unavailable(_) | EngineError::Conflict(_)) {
            warn!(code = e.label(), "request failed: {e}");
        }
        Self::from(&e)
    }
}

pub fn format_instant(ms: Ms) -> String {
    match to_local(ms) {
        Some(dt) => dt.format(ISO_FORMAT).to_string(),
        None => ms.to_string(),
    }
}

/// Accepts a full local date-time, with optional fractional seconds, or a
/// bare date meaning midnight.
pub fn parse_instant(s: &str) -> Result<Ms, ApiError> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<NaiveDateTime>() {
        return Ok(from_local(dt));
    }
    if let Ok(date) = s.parse::<NaiveDate>() {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(from_local(dt));
        }
    }
    Err(ApiError::bad_request(
        "invalid_timestamp",
        format!("expected an ISO-8601 local date-time, got {s:?}"),
    ))
}

/// "List available slots for tour X between A and B."
pub async fn list_available_slots(
    engine: &Engine,
    tour_id: Ulid,
    from: &str,
    to: &str,
) -> Result<Vec<String>, ApiError> {
    let from = parse_instant(from)?;
    let to = parse_instant(to)?;
    let slots = engine.available_slots(tour_id, from, to).await?;
    Ok(slots.into_iter().map(format_instant).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReservationRequest {
    pub tour_id: Ulid,
    pub start: String,
    pub participants: u32,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub tour_id: Ulid,
    pub start: String,
    pub end: String,
    pub participants: u32,
    pub total_price_cents: u64,
    pub status: String,
    pub expires_at: String,
    pub customer_name: String,
    pub customer_email: String,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            tour_id: r.tour_id,
            start: format_instant(r.span.start),
            end: format_instant(r.span.end),
            participants: r.participants,
            total_price_cents: r.total_price_cents,
            status: r.status.to_string(),
            expires_at: format_instant(r.expires_at),
            customer_name: r.customer.name.clone(),
            customer_email: r.customer.email.clone(),
        }
    }
}

pub async fn create_reservation(
    engine: &Engine,
    req: CreateReservationRequest,
) -> Result<ReservationView, ApiError> {
    let start = parse_instant(&req.start)?;
    let customer = CustomerInfo {
        name: req.customer_name,
        email: req.customer_email,
        phone: req.customer_phone,
        special_requests: req.special_requests.filter(|s| !s.trim().is_empty()),
    };
    let reservation = engine
        .admit(req.tour_id, start, req.participants, customer)
        .await?;
    Ok(ReservationView::from(&reservation))
}

pub async fn get_reservation(engine: &Engine, id: Ulid) -> Result<ReservationView, ApiError> {
    let reservation = engine.get_reservation(id).await?;
    Ok(ReservationView::from(&reservation))
}

/// Handle a verified provider webhook body. Returns the disposition label on
/// acknowledgement. Only transient failures ask the provider to redeliver.
pub async fn receive_webhook(engine: &Engine, body: &[u8]) -> Result<&'static str, ApiError> {
    let outcome = match webhook::decode(body) {
        Ok(Some(outcome)) => outcome,
        Ok(None) => return Ok("ignored"),
        Err(e @ WebhookError::Malformed(_)) => {
            warn!("rejecting webhook: {e}");
            return Err(ApiError::bad_request("invalid_payload", "malformed webhook payload"));
        }
        Err(e) => return Err(ApiError::bad_request("invalid_payload", e.to_string())),
    };
    match engine.on_payment_outcome(outcome).await {
        Ok(disposition) => {
            if let PaymentDisposition::Anomaly(a) = &disposition {
                error!(anomaly = %a.id, reservation = %a.reservation_id, "payment needs manual reconciliation");
            }
            Ok(disposition.label())
        }
        Err(e) => Err(e.into()),
    }
}
