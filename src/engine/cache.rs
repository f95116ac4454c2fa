use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Ms, Span};

struct CachedSlots {
    slots: Vec<Ms>,
    computed_at: Ms,
}

/// Read-through cache for slot queries. Never consulted on the write path.
/// Entries go stale after `ttl_ms` and are dropped explicitly whenever a
/// tour's rules, exceptions or reservations change. Stale entries are swept
/// at most once per TTL, so the map only holds what was computed in the last
/// two TTLs.
pub struct SlotCache {
    entries: DashMap<(Ulid, Ms, Ms), CachedSlots>,
    ttl_ms: Ms,
    last_prune: AtomicI64,
}

impl SlotCache {
    /// A zero TTL disables caching.
    pub fn new(ttl_ms: Ms) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
            last_prune: AtomicI64::new(Ms::MIN),
        }
    }

    fn fresh(&self, entry: &CachedSlots, now: Ms) -> bool {
        (0..self.ttl_ms).contains(&now.saturating_sub(entry.computed_at))
    }

    pub fn get(&self, tour_id: Ulid, window: Span, now: Ms) -> Option<Vec<Ms>> {
        let key = (tour_id, window.start, window.end);
        if let Some(entry) = self.entries.get(&key) {
            if self.fresh(&entry, now) {
                return Some(entry.slots.clone());
            }
        }
        self.entries.remove_if(&key, |_, entry| !self.fresh(entry, now));
        None
    }

    pub fn put(&self, tour_id: Ulid, window: Span, now: Ms, slots: Vec<Ms>) {
        if self.ttl_ms <= 0 {
            return;
        }
        let last = self.last_prune.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= self.ttl_ms
            && self
                .last_prune
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.entries.retain(|_, entry| self.fresh(entry, now));
        }
        self.entries.insert(
            (tour_id, window.start, window.end),
            CachedSlots {
                slots,
                computed_at: now,
            },
        );
    }

    pub fn invalidate(&self, tour_id: Ulid) {
        self.entries.retain(|(t, _, _), _| *t != tour_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
