use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{PaymentStore, ReservationStore, RuleStore, StoreError};

/// Everything owned by one tour. Exceptions and reservations are kept sorted
/// by span start so overlap queries can binary search.
#[derive(Debug, Clone)]
struct TourState {
    tour: Tour,
    rules: Vec<AvailabilityRule>,
    exceptions: Vec<AvailabilityException>,
    reservations: Vec<Reservation>,
    deleted: bool,
}

impl TourState {
    fn new(tour: Tour) -> Self {
        Self {
            tour,
            rules: Vec::new(),
            exceptions: Vec::new(),
            reservations: Vec::new(),
            deleted: false,
        }
    }
}

type SharedTourState = Arc<RwLock<TourState>>;

#[derive(Debug, Default)]
struct PaymentBook {
    by_id: HashMap<Ulid, Payment>,
    by_provider: HashMap<String, Ulid>,
    by_reservation: HashMap<Ulid, Ulid>,
    anomalies: Vec<ReconciliationAnomaly>,
}

impl PaymentBook {
    fn upsert(&mut self, payment: Payment) {
        self.by_provider
            .insert(payment.provider_payment_id.clone(), payment.id);
        self.by_reservation.insert(payment.reservation_id, payment.id);
        self.by_id.insert(payment.id, payment);
    }

    fn remove_for_reservation(&mut self, reservation_id: &Ulid) {
        if let Some(pid) = self.by_reservation.remove(reservation_id)
            && let Some(p) = self.by_id.remove(&pid)
        {
            self.by_provider.remove(&p.provider_payment_id);
        }
    }
}

/// Apply a tour-scoped record. Caller holds the tour write lock.
fn apply_to_tour(ts: &mut TourState, record: &Record, owners: &DashMap<Ulid, Ulid>) {
    match record {
        Record::TourSaved(tour) => ts.tour = tour.clone(),
        Record::RuleSaved(rule) => {
            match ts.rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule.clone(),
                None => ts.rules.push(rule.clone()),
            }
            owners.insert(rule.id, rule.tour_id);
        }
        Record::ExceptionSaved(exception) => {
            ts.exceptions.retain(|e| e.id != exception.id);
            insert_sorted(&mut ts.exceptions, exception.clone());
            owners.insert(exception.id, exception.tour_id);
        }
        Record::ExceptionRemoved { id, .. } => {
            ts.exceptions.retain(|e| e.id != *id);
            owners.remove(id);
        }
        Record::ReservationSaved(reservation) => {
            match ts.reservations.iter_mut().find(|r| r.id == reservation.id) {
                Some(existing) if existing.span == reservation.span => *existing = reservation.clone(),
                _ => {
                    ts.reservations.retain(|r| r.id != reservation.id);
                    insert_sorted(&mut ts.reservations, reservation.clone());
                }
            }
            owners.insert(reservation.id, reservation.tour_id);
        }
        // Handled at the map / payment book level.
        Record::TourDeleted { .. } | Record::PaymentSaved(_) | Record::AnomalyRecorded(_) => {}
    }
}

/// Drop index entries and payments owned by a deleted tour.
fn purge_owned(ts: &TourState, book: &mut PaymentBook, owners: &DashMap<Ulid, Ulid>) {
    for rule in &ts.rules {
        owners.remove(&rule.id);
    }
    for exception in &ts.exceptions {
        owners.remove(&exception.id);
    }
    for reservation in &ts.reservations {
        owners.remove(&reservation.id);
        book.remove_for_reservation(&reservation.id);
    }
}

fn record_tour_id(record: &Record) -> Option<Ulid> {
    match record {
        Record::TourSaved(tour) => Some(tour.id),
        Record::RuleSaved(rule) => Some(rule.tour_id),
        Record::ExceptionSaved(exception) => Some(exception.tour_id),
        Record::ExceptionRemoved { tour_id, .. } => Some(*tour_id),
        Record::ReservationSaved(reservation) => Some(reservation.tour_id),
        Record::TourDeleted { .. } | Record::PaymentSaved(_) | Record::AnomalyRecorded(_) => None,
    }
}

fn journal_err(e: io::Error) -> StoreError {
    StoreError::Journal(e.to_string())
}

/// Reference store: tours in a `DashMap`, each behind its own `RwLock`.
/// With a journal attached, every mutation is appended to the WAL before it
/// is applied.
pub struct InMemoryStore {
    tours: DashMap<Ulid, SharedTourState>,
    /// Reverse lookup: rule/exception/reservation id → tour id.
    owners: DashMap<Ulid, Ulid>,
    payments: Mutex<PaymentBook>,
    wal: Option<Mutex<Wal>>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot and the log swap see the same state.
    gate: RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store, nothing journaled.
    pub fn new() -> Self {
        Self {
            tours: DashMap::new(),
            owners: DashMap::new(),
            payments: Mutex::new(PaymentBook::default()),
            wal: None,
            gate: RwLock::new(()),
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let records = Wal::replay(path)?;
        let wal = Wal::open(path)?;

        let owners = DashMap::new();
        let mut tours: HashMap<Ulid, TourState> = HashMap::new();
        let mut book = PaymentBook::default();

        for record in &records {
            match record {
                Record::TourSaved(tour) if !tours.contains_key(&tour.id) => {
                    tours.insert(tour.id, TourState::new(tour.clone()));
                }
                Record::TourDeleted { id } => {
                    if let Some(ts) = tours.remove(id) {
                        purge_owned(&ts, &mut book, &owners);
                    }
                }
                Record::PaymentSaved(payment) => book.upsert(payment.clone()),
                Record::AnomalyRecorded(anomaly) => book.anomalies.push(anomaly.clone()),
                other => {
                    if let Some(tour_id) = record_tour_id(other)
                        && let Some(ts) = tours.get_mut(&tour_id)
                    {
                        apply_to_tour(ts, other, &owners);
                    }
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            tours = tours.len(),
            "journal replayed"
        );

        let store = Self {
            tours: DashMap::new(),
            owners,
            payments: Mutex::new(book),
            wal: Some(Mutex::new(wal)),
            gate: RwLock::new(()),
        };
        for (id, ts) in tours {
            store.tours.insert(id, Arc::new(RwLock::new(ts)));
        }
        Ok(store)
    }

    pub fn tour_count(&self) -> usize {
        self.tours.len()
    }

    async fn persist(&self, record: &Record) -> Result<(), StoreError> {
        if let Some(wal) = &self.wal {
            wal.lock().await.append(record).map_err(journal_err)?;
        }
        Ok(())
    }

    fn tour_state(&self, tour_id: &Ulid) -> Option<SharedTourState> {
        self.tours.get(tour_id).map(|e| e.value().clone())
    }

    fn owner_state(&self, entity_id: &Ulid) -> Result<(Ulid, SharedTourState), StoreError> {
        let tour_id = self
            .owners
            .get(entity_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(*entity_id))?;
        let ts = self
            .tour_state(&tour_id)
            .ok_or(StoreError::NotFound(tour_id))?;
        Ok((tour_id, ts))
    }

    /// Persist a tour-scoped record and apply it under the tour write lock.
    async fn write_tour_record(&self, tour_id: Ulid, record: Record) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let ts = self
            .tour_state(&tour_id)
            .ok_or(StoreError::NotFound(tour_id))?;
        let mut guard = ts.write().await;
        if guard.deleted {
            return Err(StoreError::NotFound(tour_id));
        }
        self.persist(&record).await?;
        apply_to_tour(&mut guard, &record, &self.owners);
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.lock().await.appends_since_compact(),
            None => 0,
        }
    }

    /// Rewrite the journal with the minimal record set for the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let _gate = self.gate.write().await;

        let shared: Vec<SharedTourState> = self.tours.iter().map(|e| e.value().clone()).collect();
        let mut records = Vec::new();
        for ts in shared {
            let guard = ts.read().await;
            if guard.deleted {
                continue;
            }
            records.push(Record::TourSaved(guard.tour.clone()));
            records.extend(guard.rules.iter().cloned().map(Record::RuleSaved));
            records.extend(guard.exceptions.iter().cloned().map(Record::ExceptionSaved));
            records.extend(guard.reservations.iter().cloned().map(Record::ReservationSaved));
        }
        {
            let book = self.payments.lock().await;
            records.extend(book.by_id.values().cloned().map(Record::PaymentSaved));
            records.extend(book.anomalies.iter().cloned().map(Record::AnomalyRecorded));
        }

        let count = records.len();
        wal.lock().await.compact(&records).map_err(journal_err)?;
        tracing::info!(records = count, "journal compacted");
        Ok(())
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn get_tour(&self, tour_id: Ulid) -> Result<Option<Tour>, StoreError> {
        let Some(ts) = self.tour_state(&tour_id) else {
            return Ok(None);
        };
        let guard = ts.read().await;
        Ok((!guard.deleted).then(|| guard.tour.clone()))
    }

    async fn put_tour(&self, tour: Tour) -> Result<(), StoreError> {
        if self.tours.contains_key(&tour.id) {
            return self.write_tour_record(tour.id, Record::TourSaved(tour)).await;
        }
        let _gate = self.gate.read().await;
        let record = Record::TourSaved(tour.clone());
        self.persist(&record).await?;
        self.tours
            .insert(tour.id, Arc::new(RwLock::new(TourState::new(tour))));
        Ok(())
    }

    async fn delete_tour(&self, tour_id: Ulid) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let ts = self
            .tour_state(&tour_id)
            .ok_or(StoreError::NotFound(tour_id))?;
        let mut guard = ts.write().await;
        if guard.deleted {
            return Err(StoreError::NotFound(tour_id));
        }
        self.persist(&Record::TourDeleted { id: tour_id }).await?;
        guard.deleted = true;
        self.tours.remove(&tour_id);
        let mut book = self.payments.lock().await;
        purge_owned(&guard, &mut book, &self.owners);
        Ok(())
    }

    async fn list_rules(&self, tour_id: Ulid) -> Result<Vec<AvailabilityRule>, StoreError> {
        match self.tour_state(&tour_id) {
            Some(ts) => Ok(ts.read().await.rules.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn list_active_rules(&self, tour_id: Ulid) -> Result<Vec<AvailabilityRule>, StoreError> {
        let mut rules = self.list_rules(tour_id).await?;
        rules.retain(|r| r.active);
        Ok(rules)
    }

    async fn get_rule(&self, rule_id: Ulid) -> Result<Option<AvailabilityRule>, StoreError> {
        let Ok((_, ts)) = self.owner_state(&rule_id) else {
            return Ok(None);
        };
        let guard = ts.read().await;
        Ok(guard.rules.iter().find(|r| r.id == rule_id).cloned())
    }

    async fn put_rule(&self, rule: AvailabilityRule) -> Result<(), StoreError> {
        self.write_tour_record(rule.tour_id, Record::RuleSaved(rule))
            .await
    }

    async fn list_exceptions(&self, tour_id: Ulid) -> Result<Vec<AvailabilityException>, StoreError> {
        match self.tour_state(&tour_id) {
            Some(ts) => Ok(ts.read().await.exceptions.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn list_exceptions_overlapping(
        &self,
        tour_id: Ulid,
        window: Span,
    ) -> Result<Vec<AvailabilityException>, StoreError> {
        let Some(ts) = self.tour_state(&tour_id) else {
            return Ok(Vec::new());
        };
        let guard = ts.read().await;
        Ok(overlapping(&guard.exceptions, &window).cloned().collect())
    }

    async fn get_exception(&self, exception_id: Ulid) -> Result<Option<AvailabilityException>, StoreError> {
        let Ok((_, ts)) = self.owner_state(&exception_id) else {
            return Ok(None);
        };
        let guard = ts.read().await;
        Ok(guard.exceptions.iter().find(|e| e.id == exception_id).cloned())
    }

    async fn put_exception(&self, exception: AvailabilityException) -> Result<(), StoreError> {
        self.write_tour_record(exception.tour_id, Record::ExceptionSaved(exception))
            .await
    }

    async fn remove_exception(&self, exception_id: Ulid) -> Result<Ulid, StoreError> {
        let (tour_id, _) = self.owner_state(&exception_id)?;
        self.write_tour_record(
            tour_id,
            Record::ExceptionRemoved {
                id: exception_id,
                tour_id,
            },
        )
        .await?;
        Ok(tour_id)
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Ok((_, ts)) = self.owner_state(&id) else {
            return Ok(None);
        };
        let guard = ts.read().await;
        Ok(guard.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn find_overlapping(
        &self,
        tour_id: Ulid,
        window: Span,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError> {
        let Some(ts) = self.tour_state(&tour_id) else {
            return Ok(Vec::new());
        };
        let guard = ts.read().await;
        Ok(overlapping(&guard.reservations, &window)
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    async fn list_for_tour(&self, tour_id: Ulid) -> Result<Vec<Reservation>, StoreError> {
        match self.tour_state(&tour_id) {
            Some(ts) => Ok(ts.read().await.reservations.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn list_for_customer(&self, email: &str) -> Result<Vec<Reservation>, StoreError> {
        let shared: Vec<SharedTourState> = self.tours.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for ts in shared {
            let guard = ts.read().await;
            found.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.customer.email.eq_ignore_ascii_case(email))
                    .cloned(),
            );
        }
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn list_expired_pending(&self, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        let shared: Vec<SharedTourState> = self.tours.iter().map(|e| e.value().clone()).collect();
        let mut expired = Vec::new();
        for ts in shared {
            let guard = ts.read().await;
            expired.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.status == ReservationStatus::Pending && r.expires_at < now)
                    .cloned(),
            );
        }
        expired.sort_by_key(|r| r.expires_at);
        Ok(expired)
    }

    async fn insert_pending(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _gate = self.gate.read().await;
        let ts = self
            .tour_state(&reservation.tour_id)
            .ok_or(StoreError::NotFound(reservation.tour_id))?;
        let mut guard = ts.write().await;
        if guard.deleted {
            return Err(StoreError::NotFound(reservation.tour_id));
        }
        if self.owners.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id.to_string()));
        }
        // Exclusion constraint: no two active reservations may intersect.
        if let Some(clash) = overlapping(&guard.reservations, &reservation.span).find(|r| r.status.is_active()) {
            return Err(StoreError::Overlap(clash.id));
        }

        let record = Record::ReservationSaved(reservation.clone());
        self.persist(&record).await?;
        apply_to_tour(&mut guard, &record, &self.owners);
        Ok(reservation)
    }

    async fn update_status(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        change: StatusChange,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.gate.read().await;
        let (_, ts) = self.owner_state(&id)?;
        let mut guard = ts.write().await;
        let current = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if current.status != expected {
            return Err(StoreError::StatusMismatch {
                id,
                actual: current.status,
            });
        }

        let mut updated = current.clone();
        updated.apply_change(&change);
        let record = Record::ReservationSaved(updated.clone());
        self.persist(&record).await?;
        apply_to_tour(&mut guard, &record, &self.owners);
        Ok(updated)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        let _gate = self.gate.read().await;
        let mut book = self.payments.lock().await;
        if book.by_id.contains_key(&payment.id) {
            return Err(StoreError::AlreadyExists(payment.id.to_string()));
        }
        if book.by_provider.contains_key(&payment.provider_payment_id) {
            return Err(StoreError::AlreadyExists(payment.provider_payment_id.clone()));
        }
        if book.by_reservation.contains_key(&payment.reservation_id) {
            return Err(StoreError::AlreadyExists(payment.reservation_id.to_string()));
        }
        self.persist(&Record::PaymentSaved(payment.clone())).await?;
        book.upsert(payment.clone());
        Ok(payment)
    }

    async fn find_by_provider_id(&self, provider_payment_id: &str) -> Result<Option<Payment>, StoreError> {
        let book = self.payments.lock().await;
        Ok(book
            .by_provider
            .get(provider_payment_id)
            .and_then(|id| book.by_id.get(id))
            .cloned())
    }

    async fn find_by_reservation(&self, reservation_id: Ulid) -> Result<Option<Payment>, StoreError> {
        let book = self.payments.lock().await;
        Ok(book
            .by_reservation
            .get(&reservation_id)
            .and_then(|id| book.by_id.get(id))
            .cloned())
    }

    async fn update_payment(
        &self,
        id: Ulid,
        expected: PaymentStatus,
        change: PaymentChange,
    ) -> Result<Payment, StoreError> {
        let _gate = self.gate.read().await;
        let mut book = self.payments.lock().await;
        let current = book.by_id.get(&id).ok_or(StoreError::NotFound(id))?;
        if current.status != expected {
            return Err(StoreError::PaymentStatusMismatch {
                id,
                actual: current.status,
            });
        }
        let mut updated = current.clone();
        updated.apply_change(&change);
        self.persist(&Record::PaymentSaved(updated.clone())).await?;
        book.upsert(updated.clone());
        Ok(updated)
    }

    async fn record_anomaly(
        &self,
        anomaly: ReconciliationAnomaly,
    ) -> Result<ReconciliationAnomaly, StoreError> {
        let _gate = self.gate.read().await;
        let mut book = self.payments.lock().await;
        if let Some(existing) = book.anomalies.iter().find(|a| {
            a.reservation_id == anomaly.reservation_id
                && a.payment_id == anomaly.payment_id
                && a.kind.label() == anomaly.kind.label()
        }) {
            return Ok(existing.clone());
        }
        self.persist(&Record::AnomalyRecorded(anomaly.clone())).await?;
        book.anomalies.push(anomaly.clone());
        Ok(anomaly)
    }

    async fn list_anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        Ok(self.payments.lock().await.anomalies.clone())
    }
}
