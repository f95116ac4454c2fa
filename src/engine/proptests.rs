use super::*;
use crate::clock::ManualClock;
use crate::gateway::InMemoryGateway;
use crate::notify::TracingNotifier;
use crate::store::InMemoryStore;
use chrono::{NaiveDate, NaiveTime, Weekday};
use proptest::prelude::*;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn monday() -> Ms {
    from_local(
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
    )
}

fn half_hour(i: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(i / 2, (i % 2) * 30, 0).unwrap()
}

fn customer() -> CustomerInfo {
    CustomerInfo {
        name: "Prop".into(),
        email: "prop@example.com".into(),
        phone: String::new(),
        special_requests: None,
    }
}

fn engine_at(now: Ms) -> Arc<Engine> {
    Arc::new(Engine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(TracingNotifier),
        Arc::new(InMemoryGateway::new()),
        Arc::new(ManualClock::new(now)),
        EngineSettings {
            slot_cache_ttl_ms: 0,
            ..EngineSettings::default()
        },
    ))
}

fn tour(minutes: u32) -> Tour {
    Tour {
        id: Ulid::new(),
        title: "Prop tour".into(),
        duration_minutes: minutes,
        price_cents: 1000,
        max_capacity: 4,
        active: true,
    }
}

prop_compose! {
    fn arb_rule()(
        days in prop::collection::vec(0..7usize, 0..4),
        times in prop::collection::vec(0..48u32, 0..5),
        lead in 0..48u32,
        active in prop::bool::weighted(0.85),
    ) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            tour_id: Ulid::nil(),
            active,
            days_of_week: days.into_iter().map(|d| WEEKDAYS[d]).collect(),
            start_times: times.into_iter().map(half_hour).collect(),
            min_booking_lead_hours: lead,
            max_capacity: 4,
        }
    }
}

prop_compose! {
    // Blackout within the first two weeks, 1 to 48 hours long.
    fn arb_blackout()(start_h in 0..(14 * 24i64), len_h in 1..48i64) -> AvailabilityException {
        let start = monday() + start_h * HOUR_MS;
        AvailabilityException {
            id: Ulid::new(),
            tour_id: Ulid::nil(),
            span: Span::new(start, start + len_h * HOUR_MS),
            reason: "prop".into(),
        }
    }
}

proptest! {
    #[test]
    fn slots_sorted_unique_and_clear(
        minutes in 15..240u32,
        rules in prop::collection::vec(arb_rule(), 0..4),
        blackouts in prop::collection::vec(arb_blackout(), 0..4),
        now_h in 0..72i64,
        window_start_h in 0..48i64,
        window_len_h in 1..(10 * 24i64),
    ) {
        let t = tour(minutes);
        let now = monday() + now_h * HOUR_MS;
        let ws = monday() + window_start_h * HOUR_MS;
        let window = Span::new(ws, ws + window_len_h * HOUR_MS);

        let slots = compute_slots(&t, &rules, &blackouts, &[], window, now);

        prop_assert!(slots.windows(2).all(|w| w[0] < w[1]));
        for &start in &slots {
            let span = Span::new(start, start + t.duration_ms());
            prop_assert!(start < window.end && span.end > window.start);
            prop_assert!(start >= now);
            prop_assert!(blackouts.iter().all(|b| !b.span.overlaps(&span)));
            prop_assert!(admitting_rule_exists(&rules, start, now));
        }
    }

    #[test]
    fn listed_slot_admits(
        minutes in 15..180u32,
        rules in prop::collection::vec(arb_rule(), 1..4),
        blackouts in prop::collection::vec(arb_blackout(), 0..3),
        pick in any::<prop::sample::Index>(),
    ) {
        let outcome = tokio_test::block_on(async {
            let engine = engine_at(monday());
            let t = engine.create_tour(tour(minutes)).await.unwrap();
            for rule in &rules {
                engine.add_rule(AvailabilityRule { id: Ulid::new(), tour_id: t.id, ..rule.clone() }).await.unwrap();
            }
            for b in &blackouts {
                engine.add_exception(AvailabilityException { id: Ulid::new(), tour_id: t.id, ..b.clone() }).await.unwrap();
            }
            let slots = engine.available_slots(t.id, monday(), monday() + 14 * DAY_MS).await.unwrap();
            if slots.is_empty() {
                return Ok(());
            }
            let start = slots[pick.index(slots.len())];
            engine.admit(t.id, start, 1, customer()).await.map(|_| ())
        });
        prop_assert!(outcome.is_ok(), "{:?}", outcome);
    }

    #[test]
    fn concurrent_admissions_never_overlap(
        minutes in prop::sample::select(vec![30u32, 60, 90, 150]),
        requests in prop::collection::vec((0..3i64, 16..40u32), 1..24),
    ) {
        let (admitted, rejected_ok) = tokio_test::block_on(async {
            let engine = engine_at(monday());
            let t = engine.create_tour(tour(minutes)).await.unwrap();
            engine.add_rule(AvailabilityRule {
                id: Ulid::new(),
                tour_id: t.id,
                active: true,
                days_of_week: WEEKDAYS.to_vec(),
                start_times: (16..40).map(half_hour).collect(),
                min_booking_lead_hours: 0,
                max_capacity: 4,
            }).await.unwrap();

            let tour_id = t.id;
            let attempts = requests.iter().map(|(day, slot)| {
                let engine = engine.clone();
                let start = monday() + (1 + day) * DAY_MS + Ms::from(*slot) * 30 * MINUTE_MS;
                async move { engine.admit(tour_id, start, 1, customer()).await }
            });
            let results = futures::future::join_all(attempts).await;

            let rejected_ok = results.iter().all(|r| match r {
                Ok(_) => true,
                Err(EngineError::SlotNotAvailable { reason: SlotRejection::Conflict(_), .. }) => true,
                Err(_) => false,
            });
            let admitted: Vec<Reservation> = results.into_iter().filter_map(Result::ok).collect();
            (admitted, rejected_ok)
        });

        prop_assert!(rejected_ok);
        prop_assert!(!admitted.is_empty());
        for (i, a) in admitted.iter().enumerate() {
            for b in &admitted[i + 1..] {
                prop_assert!(!a.span.overlaps(&b.span), "{:?} overlaps {:?}", a.span, b.span);
            }
        }
    }
}

fn admitting_rule_exists(rules: &[AvailabilityRule], start: Ms, now: Ms) -> bool {
    super::conflict::admitting_rule(rules, start, now).is_ok()
}
