use chrono::Datelike;

use crate::model::*;

use super::conflict::{check_blackouts, check_lead, check_reservations};

/// Every bookable start for `tour` inside `window`, ascending and de-duplicated.
///
/// Advisory only: the result is a snapshot and admission re-checks each
/// candidate inside the tour's critical section. Inputs need not be sorted.
pub fn compute_slots(
    tour: &Tour,
    rules: &[AvailabilityRule],
    exceptions: &[AvailabilityException],
    reservations: &[Reservation],
    window: Span,
    now: Ms,
) -> Vec<Ms> {
    if !tour.active || window.end <= window.start {
        return Vec::new();
    }
    let (Some(first), Some(last)) = (to_local(window.start), to_local(window.end - 1)) else {
        return Vec::new();
    };

    let mut exceptions = exceptions.to_vec();
    exceptions.sort_by_key(|e| e.span.start);
    let mut reservations: Vec<Reservation> = reservations
        .iter()
        .filter(|r| r.status.is_active())
        .cloned()
        .collect();
    reservations.sort_by_key(|r| r.span.start);

    let duration = tour.duration_ms();
    let mut slots = Vec::new();
    let mut day = first.date();
    let last_day = last.date();
    while day <= last_day {
        let weekday = day.weekday();
        for rule in rules.iter().filter(|r| !r.is_vacuous() && r.applies_on(weekday)) {
            for time in &rule.start_times {
                let start = from_local(day.and_time(*time));
                let end = start + duration;
                if start >= window.end || end <= window.start {
                    continue;
                }
                let span = Span::new(start, end);
                let bookable = check_lead(start, rule, now)
                    .and_then(|()| check_blackouts(&span, &exceptions))
                    .and_then(|()| check_reservations(&span, &reservations));
                if bookable.is_ok() {
                    slots.push(start);
                }
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    slots.sort_unstable();
    slots.dedup();
    slots
}
