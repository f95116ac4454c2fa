use crate::limits::*;
use crate::model::*;

use super::{EngineError, SlotRejection};

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Bounds for a slot query window `[start, end)`.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidInterval("window end must be after start"));
    }
    let window = Span::new(start, end);
    validate_span(&window)?;
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

pub(crate) fn validate_customer(customer: &CustomerInfo) -> Result<(), EngineError> {
    if customer.name.trim().is_empty() {
        return Err(EngineError::InvalidCustomer("name is required"));
    }
    if customer.email.trim().is_empty() || !customer.email.contains('@') {
        return Err(EngineError::InvalidCustomer("a valid email is required"));
    }
    if customer.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if customer.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if customer.phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone too long"));
    }
    if customer
        .special_requests
        .as_ref()
        .is_some_and(|s| s.len() > MAX_REASON_LEN)
    {
        return Err(EngineError::LimitExceeded("special requests too long"));
    }
    Ok(())
}

pub(crate) fn validate_tour(tour: &Tour) -> Result<(), EngineError> {
    if tour.title.trim().is_empty() {
        return Err(EngineError::InvalidCatalog("tour title is required"));
    }
    if tour.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("tour title too long"));
    }
    if tour.duration_minutes == 0 {
        return Err(EngineError::InvalidCatalog("tour duration must be positive"));
    }
    if tour.duration_minutes > MAX_TOUR_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("tour too long"));
    }
    if tour.max_capacity == 0 {
        return Err(EngineError::InvalidCatalog("tour capacity must be positive"));
    }
    if tour.price_cents > MAX_PRICE_CENTS {
        return Err(EngineError::LimitExceeded("tour price too high"));
    }
    Ok(())
}

/// Empty days or times are allowed (the rule is just vacuous).
pub(crate) fn validate_rule(rule: &AvailabilityRule) -> Result<(), EngineError> {
    if rule.max_capacity == 0 {
        return Err(EngineError::InvalidCatalog("rule capacity must be positive"));
    }
    if rule.start_times.len() > MAX_START_TIMES_PER_RULE {
        return Err(EngineError::LimitExceeded("too many start times"));
    }
    Ok(())
}

pub(crate) fn validate_exception(exception: &AvailabilityException) -> Result<(), EngineError> {
    if exception.span.end <= exception.span.start {
        return Err(EngineError::InvalidInterval("blackout end must be after start"));
    }
    validate_span(&exception.span)?;
    if exception.reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    Ok(())
}

pub(crate) fn check_lead(start: Ms, rule: &AvailabilityRule, now: Ms) -> Result<(), SlotRejection> {
    if start < now + rule.lead_ms() {
        return Err(SlotRejection::LeadTime);
    }
    Ok(())
}

/// `exceptions` must be sorted by start.
pub(crate) fn check_blackouts(
    span: &Span,
    exceptions: &[AvailabilityException],
) -> Result<(), SlotRejection> {
    match overlapping(exceptions, span).next() {
        Some(e) => Err(SlotRejection::Blackout(e.id)),
        None => Ok(()),
    }
}

/// `reservations` must be sorted by start. Only Pending and Confirmed block;
/// a Pending hold past its expiry still blocks until it is swept.
pub(crate) fn check_reservations(span: &Span, reservations: &[Reservation]) -> Result<(), SlotRejection> {
    match overlapping(reservations, span).find(|r| r.status.is_active()) {
        Some(r) => Err(SlotRejection::Conflict(r.id)),
        None => Ok(()),
    }
}

/// The rule under which a start is admitted: the first active rule offering
/// that weekday and time whose lead time has not passed.
pub(crate) fn admitting_rule<'a>(
    rules: &'a [AvailabilityRule],
    start: Ms,
    now: Ms,
) -> Result<&'a AvailabilityRule, SlotRejection> {
    let local = to_local(start).ok_or(SlotRejection::NoMatchingRule)?;
    let day = chrono::Datelike::weekday(&local);
    let time = local.time();

    let mut matching = rules
        .iter()
        .filter(|r| !r.is_vacuous() && r.applies_on(day) && r.start_times.contains(&time))
        .peekable();
    if matching.peek().is_none() {
        return Err(SlotRejection::NoMatchingRule);
    }
    matching
        .find(|r| check_lead(start, r, now).is_ok())
        .ok_or(SlotRejection::LeadTime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, Weekday};
    use ulid::Ulid;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Ms {
        from_local(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    fn rule(days: Vec<Weekday>, times: &[(u32, u32)], lead: u32) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            tour_id: Ulid::nil(),
            active: true,
            days_of_week: days,
            start_times: times
                .iter()
                .map(|(h, m)| NaiveTime::from_hms_opt(*h, *m, 0).unwrap())
                .collect(),
            min_booking_lead_hours: lead,
            max_capacity: 4,
        }
    }

    #[test]
    fn window_validation() {
        assert!(matches!(validate_window(10, 10), Err(EngineError::InvalidInterval(_))));
        assert!(matches!(
            validate_window(0, MAX_QUERY_WINDOW_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(validate_window(-5, 10), Err(EngineError::LimitExceeded(_))));
        assert_eq!(validate_window(0, DAY_MS).unwrap(), Span::new(0, DAY_MS));
    }

    #[test]
    fn customer_validation() {
        let ok = CustomerInfo {
            name: "Mira".into(),
            email: "mira@example.com".into(),
            phone: String::new(),
            special_requests: None,
        };
        assert!(validate_customer(&ok).is_ok());
        assert!(matches!(
            validate_customer(&CustomerInfo { name: " ".into(), ..ok.clone() }),
            Err(EngineError::InvalidCustomer(_))
        ));
        assert!(matches!(
            validate_customer(&CustomerInfo { email: "nope".into(), ..ok.clone() }),
            Err(EngineError::InvalidCustomer(_))
        ));
        assert!(matches!(
            validate_customer(&CustomerInfo { phone: "9".repeat(MAX_PHONE_LEN + 1), ..ok }),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn admitting_rule_matches_weekday_and_time() {
        // 2024-06-03 is a Monday.
        let now = at(2024, 6, 1, 0, 0);
        let rules = vec![rule(vec![Weekday::Mon], &[(9, 0)], 0)];
        assert!(admitting_rule(&rules, at(2024, 6, 3, 9, 0), now).is_ok());
        assert_eq!(
            admitting_rule(&rules, at(2024, 6, 3, 9, 30), now).unwrap_err(),
            SlotRejection::NoMatchingRule
        );
        assert_eq!(
            admitting_rule(&rules, at(2024, 6, 4, 9, 0), now).unwrap_err(),
            SlotRejection::NoMatchingRule
        );
    }

    #[test]
    fn admitting_rule_falls_through_to_shorter_lead() {
        let now = at(2024, 6, 3, 6, 0);
        let strict = rule(vec![Weekday::Mon], &[(9, 0)], 12);
        let lenient = rule(vec![Weekday::Mon], &[(9, 0)], 1);
        let rules = vec![strict, lenient.clone()];
        assert_eq!(admitting_rule(&rules, at(2024, 6, 3, 9, 0), now).unwrap().id, lenient.id);

        let only_strict = vec![rules[0].clone()];
        assert_eq!(
            admitting_rule(&only_strict, at(2024, 6, 3, 9, 0), now).unwrap_err(),
            SlotRejection::LeadTime
        );
    }

    #[test]
    fn inactive_rules_never_admit() {
        let mut r = rule(vec![Weekday::Mon], &[(9, 0)], 0);
        r.active = false;
        assert_eq!(
            admitting_rule(&[r], at(2024, 6, 3, 9, 0), 0).unwrap_err(),
            SlotRejection::NoMatchingRule
        );
    }

    #[test]
    fn expired_hold_still_blocks_until_swept() {
        let r = Reservation {
            id: Ulid::new(),
            tour_id: Ulid::nil(),
            span: Span::new(0, HOUR_MS),
            participants: 1,
            total_price_cents: 0,
            customer: CustomerInfo {
                name: "A".into(),
                email: "a@b".into(),
                phone: String::new(),
                special_requests: None,
            },
            status: ReservationStatus::Pending,
            created_at: 0,
            expires_at: -1,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };
        let id = r.id;
        let mut list = vec![r];
        assert_eq!(
            check_reservations(&Span::new(30 * MINUTE_MS, 2 * HOUR_MS), &list),
            Err(SlotRejection::Conflict(id))
        );
        list[0].status = ReservationStatus::Expired;
        assert_eq!(check_reservations(&Span::new(0, HOUR_MS), &list), Ok(()));
    }
}
