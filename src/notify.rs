use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Reservation;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PendingCreated,
    Confirmed,
    Cancelled,
    Expired,
}

impl NotificationKind {
    pub fn label(self) -> &'static str {
        match self {
            NotificationKind::PendingCreated => "pending_created",
            NotificationKind::Confirmed => "confirmed",
            NotificationKind::Cancelled => "cancelled",
            NotificationKind::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub reservation: Reservation,
}

/// Outbound sink for reservation lifecycle events. Fire-and-forget: a
/// delivery problem is the sink's to log, never the caller's to handle.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Broadcast hub with one channel per tour.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a tour. Creates the channel if needed.
    pub fn subscribe(&self, tour_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(tour_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Drop a tour's channel (e.g. when the tour is deleted).
    pub fn remove(&self, tour_id: &Ulid) {
        self.channels.remove(tour_id);
    }
}

impl Notifier for NotifyHub {
    /// No-op if nobody is listening.
    fn notify(&self, notification: Notification) {
        if let Some(sender) = self.channels.get(&notification.reservation.tour_id) {
            let _ = sender.send(notification);
        }
    }
}

/// Writes each notification to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let r = &notification.reservation;
        tracing::info!(
            kind = notification.kind.label(),
            reservation = %r.id,
            tour = %r.tour_id,
            email = %r.customer.email,
            "reservation notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn reservation(tour_id: Ulid) -> Reservation {
        Reservation {
            id: Ulid::new(),
            tour_id,
            span: Span::new(0, HOUR_MS),
            participants: 1,
            total_price_cents: 1000,
            customer: CustomerInfo {
                name: "Bo".into(),
                email: "bo@example.com".into(),
                phone: String::new(),
                special_requests: None,
            },
            status: ReservationStatus::Pending,
            created_at: 0,
            expires_at: 10 * MINUTE_MS,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let tour_id = Ulid::new();
        let mut rx = hub.subscribe(tour_id);

        let n = Notification {
            kind: NotificationKind::PendingCreated,
            reservation: reservation(tour_id),
        };
        hub.notify(n.clone());

        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn other_tours_are_not_delivered() {
        let hub = NotifyHub::new();
        let mine = Ulid::new();
        let mut rx = hub.subscribe(mine);

        hub.notify(Notification {
            kind: NotificationKind::Expired,
            reservation: reservation(Ulid::new()),
        });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let tour_id = Ulid::new();
        hub.notify(Notification {
            kind: NotificationKind::Cancelled,
            reservation: reservation(tour_id),
        });
        hub.remove(&tour_id);
    }
}
