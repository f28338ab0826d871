//! Best-effort fan-out of room events to live subscribers.

use std::sync::Arc;

use ama_core::RoomEvent;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::registry::ConnectionRegistry;

/// What one broadcast did. Only used for logging and tests; callers never
/// act on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
}

impl Notifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Write `event` to every current subscriber of its room.
    ///
    /// The registry lock is held for the whole delivery, so concurrent
    /// broadcasts to a room reach each subscriber in the same order. A failed
    /// write cancels that subscriber's session and delivery carries on; the
    /// session removes itself from the registry once it wakes up.
    pub async fn notify(&self, event: &RoomEvent) -> DeliveryReport {
        let payload = match event.to_wire() {
            Ok(payload) => payload,
            Err(e) => {
                error!(room_id = %event.room_id(), kind = event.kind(), error = %e, "failed to serialize event");
                return DeliveryReport::default();
            }
        };

        let snapshot = self.registry.snapshot_for_broadcast(*event.room_id()).await;
        let mut report = DeliveryReport::default();

        for (connection_id, subscriber) in snapshot.iter() {
            // Already tearing down, the session will deregister shortly.
            if subscriber.cancel_token().is_cancelled() {
                continue;
            }

            report.attempted += 1;
            if let Err(e) = subscriber.sink().send_text(&payload).await {
                report.failed += 1;
                warn!(
                    room_id = %event.room_id(),
                    connection_id = %connection_id,
                    kind = event.kind(),
                    error = %e,
                    "failed to send event to client"
                );
                subscriber.cancel_token().cancel();
            }
        }
        drop(snapshot);

        debug!(
            room_id = %event.room_id(),
            kind = event.kind(),
            attempted = report.attempted,
            failed = report.failed,
            "broadcast event"
        );
        report
    }

    /// Run `notify` on a detached task. The returned handle may be dropped;
    /// nothing about the broadcast flows back to the caller.
    pub fn dispatch(&self, event: RoomEvent) -> JoinHandle<DeliveryReport> {
        let notifier = self.clone();
        tokio::spawn(async move { notifier.notify(&event).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ama_core::{ConnectionId, MessageId, RoomId};
    use tokio_util::sync::CancellationToken;

    use crate::registry::{EventSink, Subscriber};
    use crate::test_support::{FailingSink, RecordingSink, YieldingSink};

    async fn add(
        registry: &ConnectionRegistry,
        room: RoomId,
        sink: Arc<dyn EventSink>,
    ) -> (ConnectionId, CancellationToken) {
        let conn = ConnectionId::new();
        let cancel = CancellationToken::new();
        registry
            .register(room, conn, Subscriber::new(sink, cancel.clone()))
            .await;
        (conn, cancel)
    }

    fn created(room: RoomId) -> RoomEvent {
        RoomEvent::message_created(room, MessageId::new(), "What is the capital of France?")
    }

    #[tokio::test]
    async fn empty_room_does_nothing() {
        let notifier = Notifier::new(Arc::new(ConnectionRegistry::new()));
        let report = notifier.notify(&created(RoomId::new())).await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn delivers_wire_payload_to_room_subscribers() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomId::new();
        let sink = Arc::new(RecordingSink::default());
        add(&registry, room, sink.clone()).await;

        let event = created(room);
        let report = Notifier::new(registry).notify(&event).await;

        assert_eq!(report, DeliveryReport { attempted: 1, failed: 0 });
        assert_eq!(sink.received(), vec![event.to_wire().unwrap()]);
    }

    #[tokio::test]
    async fn other_rooms_are_not_delivered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room_a = RoomId::new();
        let room_b = RoomId::new();
        let in_a = Arc::new(RecordingSink::default());
        let in_b = Arc::new(RecordingSink::default());
        add(&registry, room_a, in_a.clone()).await;
        add(&registry, room_b, in_b.clone()).await;

        Notifier::new(registry).notify(&created(room_b)).await;

        assert!(in_a.received().is_empty());
        assert_eq!(in_b.received().len(), 1);
    }

    #[tokio::test]
    async fn deregistered_connection_is_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomId::new();
        let sink = Arc::new(RecordingSink::default());
        let (conn, _) = add(&registry, room, sink.clone()).await;

        registry.deregister(&room, &conn).await;
        registry.deregister(&room, &conn).await;
        let report = Notifier::new(registry).notify(&created(room)).await;

        assert_eq!(report.attempted, 0);
        assert!(sink.received().is_empty());
    }

    #[tokio::test]
    async fn failure_cancels_only_the_failing_subscriber() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomId::new();
        let good = Arc::new(RecordingSink::default());
        let bad = Arc::new(FailingSink::default());
        let other = Arc::new(RecordingSink::default());
        let (_, good_cancel) = add(&registry, room, good.clone()).await;
        let (_, bad_cancel) = add(&registry, room, bad.clone()).await;
        let (_, other_cancel) = add(&registry, room, other.clone()).await;

        let report = Notifier::new(Arc::clone(&registry)).notify(&created(room)).await;

        assert_eq!(report, DeliveryReport { attempted: 3, failed: 1 });
        assert_eq!(bad.attempts(), 1);
        assert!(bad_cancel.is_cancelled());
        assert!(!good_cancel.is_cancelled());
        assert!(!other_cancel.is_cancelled());
        assert_eq!(good.received().len(), 1);
        assert_eq!(other.received().len(), 1);
        // The notifier never edits the registry itself.
        assert_eq!(registry.subscriber_count(&room).await, 3);
    }

    #[tokio::test]
    async fn cancelled_subscriber_is_not_written_again() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomId::new();
        let bad = Arc::new(FailingSink::default());
        add(&registry, room, bad.clone()).await;
        let notifier = Notifier::new(registry);

        notifier.notify(&created(room)).await;
        let second = notifier.notify(&created(room)).await;

        assert_eq!(bad.attempts(), 1);
        assert_eq!(second.attempted, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribers_each_get_exactly_one_write() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomId::new();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let sink = Arc::new(RecordingSink::default());
                    add(&registry, room, sink.clone()).await;
                    sink
                })
            })
            .collect();
        let mut sinks = Vec::new();
        for task in tasks {
            sinks.push(task.await.unwrap());
        }

        let report = Notifier::new(registry).notify(&created(room)).await;

        assert_eq!(report.attempted, 50);
        assert!(sinks.iter().all(|s| s.received().len() == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_broadcasts_arrive_in_one_order_for_everyone() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomId::new();
        let sinks: Vec<Arc<YieldingSink>> = (0..3).map(|_| Arc::new(YieldingSink::default())).collect();
        for sink in &sinks {
            add(&registry, room, sink.clone()).await;
        }
        let notifier = Notifier::new(registry);

        let handles: Vec<_> = (0..20)
            .map(|i| notifier.dispatch(RoomEvent::message_created(room, MessageId::new(), format!("q{i}"))))
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().attempted, 3);
        }

        let first = sinks[0].received();
        assert_eq!(first.len(), 20);
        for sink in &sinks[1..] {
            assert_eq!(sink.received(), first);
        }
    }

    #[tokio::test]
    async fn dispatch_runs_in_background() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomId::new();
        let sink = Arc::new(RecordingSink::default());
        add(&registry, room, sink.clone()).await;

        let handle = Notifier::new(registry).dispatch(RoomEvent::reaction_increased(room, MessageId::new(), 1));
        let report = handle.await.unwrap();

        assert_eq!(report.attempted, 1);
        let received: serde_json::Value = serde_json::from_str(&sink.received()[0]).unwrap();
        assert_eq!(received["kind"], "message_reaction_increased");
        assert_eq!(received["value"]["count"], 1);
    }
}
