use std::fmt;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Milliseconds on the tour's local wall clock since `1970-01-01T00:00:00`.
/// Rule times carry no timezone, so neither does this.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Naive local date-time for a wall-clock instant.
pub fn to_local(ms: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

pub fn from_local(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Anything that occupies a span on a tour's timeline.
pub trait Spanned {
    fn span(&self) -> Span;
}

/// Items of `sorted` (ordered by `span().start`) that overlap `query`.
/// Binary search skips everything starting at or after `query.end`.
pub fn overlapping<'a, T: Spanned>(sorted: &'a [T], query: &Span) -> impl Iterator<Item = &'a T> {
    let right_bound = sorted.partition_point(|i| i.span().start < query.end);
    let query = *query;
    sorted[..right_bound]
        .iter()
        .filter(move |i| i.span().end > query.start)
}

/// Insert keeping `sorted` ordered by span start.
pub fn insert_sorted<T: Spanned>(sorted: &mut Vec<T>, item: T) {
    let start = item.span().start;
    let pos = sorted.partition_point(|i| i.span().start <= start);
    sorted.insert(pos, item);
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tour {
    pub id: Ulid,
    pub title: String,
    pub duration_minutes: u32,
    pub price_cents: u64,
    pub max_capacity: u32,
    pub active: bool,
}

impl Tour {
    pub fn duration_ms(&self) -> Ms {
        Ms::from(self.duration_minutes) * MINUTE_MS
    }
}

/// Weekly recurrence: every listed weekday, at every listed start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub tour_id: Ulid,
    pub active: bool,
    pub days_of_week: Vec<Weekday>,
    pub start_times: Vec<NaiveTime>,
    pub min_booking_lead_hours: u32,
    pub max_capacity: u32,
}

impl AvailabilityRule {
    /// An inactive rule, or one with no days or no times, yields no slots.
    pub fn is_vacuous(&self) -> bool {
        !self.active || self.days_of_week.is_empty() || self.start_times.is_empty()
    }

    pub fn applies_on(&self, day: Weekday) -> bool {
        self.days_of_week.contains(&day)
    }

    pub fn lead_ms(&self) -> Ms {
        Ms::from(self.min_booking_lead_hours) * HOUR_MS
    }
}

/// Blackout on a tour's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Ulid,
    pub tour_id: Ulid,
    pub span: Span,
    pub reason: String,
}

impl Spanned for AvailabilityException {
    fn span(&self) -> Span {
        self.span
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    /// Pending and Confirmed reservations occupy their slot.
    pub const ACTIVE: [ReservationStatus; 2] = [ReservationStatus::Pending, ReservationStatus::Confirmed];

    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    /// The transition table. `None` means the move is illegal.
    pub fn next(self, transition: Transition) -> Option<ReservationStatus> {
        use ReservationStatus::*;
        match (self, transition) {
            (Pending, Transition::Confirm) => Some(Confirmed),
            (Pending, Transition::Cancel) => Some(Cancelled),
            (Pending, Transition::Expire) => Some(Expired),
            (Confirmed, Transition::Cancel) => Some(Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Confirm,
    Cancel,
    Expire,
}

impl Transition {
    pub fn target(self) -> ReservationStatus {
        match self {
            Transition::Confirm => ReservationStatus::Confirmed,
            Transition::Cancel => ReservationStatus::Cancelled,
            Transition::Expire => ReservationStatus::Expired,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Cancel => "cancel",
            Transition::Expire => "expire",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub tour_id: Ulid,
    pub span: Span,
    pub participants: u32,
    pub total_price_cents: u64,
    pub customer: CustomerInfo,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub expires_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
}

impl Spanned for Reservation {
    fn span(&self) -> Span {
        self.span
    }
}

/// New status plus the timestamp (and reason, for cancellations) that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: ReservationStatus,
    pub at: Ms,
    pub reason: Option<String>,
}

impl Reservation {
    pub fn apply_change(&mut self, change: &StatusChange) {
        self.status = change.status;
        match change.status {
            ReservationStatus::Confirmed => self.confirmed_at = Some(change.at),
            ReservationStatus::Cancelled => {
                self.cancelled_at = Some(change.at);
                self.cancellation_reason = change.reason.clone();
            }
            ReservationStatus::Pending | ReservationStatus::Expired => {}
        }
    }
}

// ── Payments ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub amount_cents: u64,
    pub currency: String,
    pub provider_payment_id: String,
    pub status: PaymentStatus,
    pub created_at: Ms,
    pub completed_at: Option<Ms>,
    pub failed_at: Option<Ms>,
    pub failure_reason: Option<String>,
    pub refunded_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChange {
    pub status: PaymentStatus,
    pub at: Ms,
    pub failure_reason: Option<String>,
}

impl Payment {
    pub fn apply_change(&mut self, change: &PaymentChange) {
        self.status = change.status;
        match change.status {
            PaymentStatus::Completed => self.completed_at = Some(change.at),
            PaymentStatus::Failed => {
                self.failed_at = Some(change.at);
                self.failure_reason = change.failure_reason.clone();
            }
            PaymentStatus::Refunded => self.refunded_at = Some(change.at),
            PaymentStatus::Pending => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// Payment succeeded after the reservation had already left `Pending`.
    PaymentAfterRelease { status: ReservationStatus },
    RefundFailed,
}

impl AnomalyKind {
    pub fn label(&self) -> &'static str {
        match self {
            AnomalyKind::PaymentAfterRelease { .. } => "payment_after_release",
            AnomalyKind::RefundFailed => "refund_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationAnomaly {
    pub id: Ulid,
    pub kind: AnomalyKind,
    pub reservation_id: Ulid,
    pub payment_id: Option<Ulid>,
    pub detail: String,
    pub recorded_at: Ms,
}

/// Journal record: one per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    TourSaved(Tour),
    TourDeleted { id: Ulid },
    RuleSaved(AvailabilityRule),
    ExceptionSaved(AvailabilityException),
    ExceptionRemoved { id: Ulid, tour_id: Ulid },
    ReservationSaved(Reservation),
    PaymentSaved(Payment),
    AnomalyRecorded(ReconciliationAnomaly),
}
