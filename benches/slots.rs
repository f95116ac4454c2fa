use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime, Weekday};
use ulid::Ulid;

use tourhold::clock::ManualClock;
use tourhold::engine::{Engine, EngineSettings, compute_slots};
use tourhold::gateway::InMemoryGateway;
use tourhold::model::*;
use tourhold::notify::TracingNotifier;
use tourhold::store::InMemoryStore;

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn epoch() -> Ms {
    from_local(
        NaiveDate::from_ymd_opt(2025, 1, 6)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
    )
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn tour(minutes: u32) -> Tour {
    Tour {
        id: Ulid::new(),
        title: "Bench tour".into(),
        duration_minutes: minutes,
        price_cents: 1000,
        max_capacity: 8,
        active: true,
    }
}

/// Every day, on the hour from 08:00 to 19:00.
fn hourly_rule(tour_id: Ulid) -> AvailabilityRule {
    AvailabilityRule {
        id: Ulid::new(),
        tour_id,
        active: true,
        days_of_week: ALL_DAYS.to_vec(),
        start_times: (8..20).map(|h| NaiveTime::from_hms_opt(h, 0, 0).unwrap()).collect(),
        min_booking_lead_hours: 0,
        max_capacity: 8,
    }
}

fn customer(i: usize) -> CustomerInfo {
    CustomerInfo {
        name: format!("Guest {i}"),
        email: format!("guest{i}@example.com"),
        phone: String::new(),
        special_requests: None,
    }
}

async fn engine(settings: EngineSettings) -> (Arc<Engine>, Tour) {
    let engine = Arc::new(Engine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(TracingNotifier),
        Arc::new(InMemoryGateway::new()),
        Arc::new(ManualClock::new(epoch())),
        settings,
    ));
    let t = engine.create_tour(tour(60)).await.unwrap();
    engine.add_rule(hourly_rule(t.id)).await.unwrap();
    (engine, t)
}

fn phase1_compute(days: i64) {
    let t = tour(90);
    let rules = vec![hourly_rule(t.id)];
    let window = Span::new(epoch(), epoch() + days * DAY_MS);

    // Every other day blacked out in the afternoon, and a booking every 3 hours.
    let exceptions: Vec<AvailabilityException> = (0..days)
        .step_by(2)
        .map(|d| {
            let start = epoch() + d * DAY_MS + 13 * HOUR_MS;
            AvailabilityException {
                id: Ulid::new(),
                tour_id: t.id,
                span: Span::new(start, start + 3 * HOUR_MS),
                reason: "bench".into(),
            }
        })
        .collect();
    let reservations: Vec<Reservation> = (0..days * 8)
        .map(|i| {
            let start = epoch() + i * 3 * HOUR_MS;
            Reservation {
                id: Ulid::new(),
                tour_id: t.id,
                span: Span::new(start, start + t.duration_ms()),
                participants: 1,
                total_price_cents: 1000,
                customer: customer(i as usize),
                status: ReservationStatus::Confirmed,
                created_at: 0,
                expires_at: 0,
                confirmed_at: Some(0),
                cancelled_at: None,
                cancellation_reason: None,
            }
        })
        .collect();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let mut found = 0;
    for _ in 0..n {
        let t0 = Instant::now();
        found = compute_slots(&t, &rules, &exceptions, &reservations, window, epoch()).len();
        latencies.push(t0.elapsed());
    }
    println!(
        "  {days}-day window, {} exceptions, {} reservations -> {found} slots",
        exceptions.len(),
        reservations.len()
    );
    print_latency("compute latency", &mut latencies);
}

async fn phase2_sequential() {
    let (engine, t) = engine(EngineSettings::default()).await;
    let n = 12 * 90;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let day = (i / 12) as i64;
        let hour = 8 + (i % 12) as i64;
        let slot = epoch() + DAY_MS + day * DAY_MS + hour * HOUR_MS;
        let t0 = Instant::now();
        engine.admit(t.id, slot, 1, customer(i)).await.unwrap();
        latencies.push(t0.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} admissions in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admit latency", &mut latencies);
}

async fn phase3_contention() {
    let (engine, t) = engine(EngineSettings::default()).await;
    let n_tasks = 32;
    let n_slots = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let tour_id = t.id;
        handles.push(tokio::spawn(async move {
            let mut won = 0;
            for j in 0..n_slots {
                let day = (j / 12) as i64;
                let hour = 8 + (j % 12) as i64;
                let slot = epoch() + DAY_MS + day * DAY_MS + hour * HOUR_MS;
                if engine.admit(tour_id, slot, 1, customer(task)).await.is_ok() {
                    won += 1;
                }
            }
            won
        }));
    }

    let mut total_won = 0;
    for h in handles {
        total_won += h.await.unwrap();
    }
    let elapsed = start.elapsed();
    let attempts = n_tasks * n_slots;
    println!(
        "  {n_tasks} tasks x {n_slots} slots = {attempts} attempts in {:.2}s, {total_won} admitted",
        elapsed.as_secs_f64()
    );
    assert_eq!(total_won, n_slots, "each slot admits exactly one reservation");
}

async fn phase4_cached_reads() {
    for (label, ttl) in [("uncached", 0), ("cached", 30_000)] {
        let (engine, t) = engine(EngineSettings {
            slot_cache_ttl_ms: ttl,
            ..EngineSettings::default()
        })
        .await;
        let n = 2000;
        let mut latencies = Vec::with_capacity(n);
        for _ in 0..n {
            let t0 = Instant::now();
            engine
                .available_slots(t.id, epoch(), epoch() + 30 * DAY_MS)
                .await
                .unwrap();
            latencies.push(t0.elapsed());
        }
        print_latency(&format!("30-day query, {label}"), &mut latencies);
    }
}

#[tokio::main]
async fn main() {
    println!("=== tourhold slot benchmark ===");

    println!("\n[phase 1] slot computation");
    phase1_compute(7);
    phase1_compute(92);

    println!("\n[phase 2] sequential admission throughput");
    phase2_sequential().await;

    println!("\n[phase 3] concurrent admission on one tour");
    phase3_contention().await;

    println!("\n[phase 4] slot queries");
    phase4_cached_reads().await;

    println!("\n=== benchmark complete ===");
}
