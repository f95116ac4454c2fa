mod admission;
mod cache;
mod catalog;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod reducer;
mod slots;
#[cfg(test)]
mod proptests;

pub use cache::SlotCache;
pub use error::{EngineError, SlotRejection};
pub use lifecycle::SweepReport;
pub use reducer::PaymentDisposition;
pub use slots::compute_slots;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::clock::Clock;
use crate::gateway::PaymentGateway;
use crate::model::*;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::store::{PaymentStore, ReservationStore, RuleStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// How long a Pending reservation holds its slot.
    pub hold_window_ms: Ms,
    /// Upper bound on any single store call or critical-section wait.
    pub store_timeout: Duration,
    pub slot_cache_ttl_ms: Ms,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hold_window_ms: 10 * MINUTE_MS,
            store_timeout: Duration::from_secs(5),
            slot_cache_ttl_ms: 30_000,
        }
    }
}

type TourLocks = DashMap<Ulid, Arc<Mutex<()>>>;

/// Held for the duration of a tour's read-check-write sequence. Dropping it,
/// on any exit path, ends the section.
pub(crate) struct TourSection {
    guard: Option<OwnedMutexGuard<()>>,
    tour_id: Ulid,
    locks: Arc<TourLocks>,
}

impl Drop for TourSection {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map holds the mutex now: nobody is inside or queued.
        // Cloning out of the map takes the same shard lock, so this cannot
        // race a new waiter.
        self.locks
            .remove_if(&self.tour_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct Engine {
    rules: Arc<dyn RuleStore>,
    reservations: Arc<dyn ReservationStore>,
    payments: Arc<dyn PaymentStore>,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    cache: SlotCache,
    tour_locks: Arc<TourLocks>,
}

impl Engine {
    pub fn new<S>(
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self
    where
        S: RuleStore + ReservationStore + PaymentStore + 'static,
    {
        Self {
            rules: store.clone(),
            reservations: store.clone(),
            payments: store,
            notifier,
            gateway,
            clock,
            cache: SlotCache::new(settings.slot_cache_ttl_ms),
            settings,
            tour_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Run a store call under the timeout, leaving store errors for the caller
    /// to inspect.
    async fn timed<T, F>(&self, call: F) -> Result<Result<T, StoreError>, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.settings.store_timeout, call)
            .await
            .map_err(|_| {
                metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL).increment(1);
                EngineError::Unavailable("store call timed out".into())
            })
    }

    /// `timed` with store errors converted.
    async fn bounded<T, F>(&self, call: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        Ok(self.timed(call).await??)
    }

    /// Enter the tour's critical section. Admissions, transitions and catalog
    /// writes for one tour are totally ordered by this lock.
    async fn enter_tour(&self, tour_id: Ulid) -> Result<TourSection, EngineError> {
        let lock = self.tour_locks.entry(tour_id).or_default().clone();
        let waited = tokio::time::timeout(self.settings.store_timeout, lock.lock_owned()).await;
        let section = TourSection {
            guard: waited.ok(),
            tour_id,
            locks: self.tour_locks.clone(),
        };
        if section.guard.is_none() {
            // Dropping the empty section still prunes the map entry.
            metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL).increment(1);
            return Err(EngineError::Unavailable(format!("tour {tour_id} is busy")));
        }
        Ok(section)
    }

    fn emit(&self, kind: NotificationKind, reservation: &Reservation) {
        self.notifier.notify(Notification {
            kind,
            reservation: reservation.clone(),
        });
    }
}
