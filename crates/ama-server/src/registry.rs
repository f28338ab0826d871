//! Room → live subscriber bookkeeping.
//!
//! One async mutex guards the whole nested map. Register, deregister and
//! broadcast snapshots all serialize on it, across every room. The total
//! connection count is mirrored in an atomic so it can be read while a
//! broadcast holds the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ama_core::{ConnectionId, RoomId};
use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A write to one subscriber's connection failed.
#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct DeliveryError(pub String);

/// Write half of a live connection.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError>;
}

/// One registry entry: where to write, and how to tell the owning session to stop.
#[derive(Clone)]
pub struct Subscriber {
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl Subscriber {
    pub fn new(sink: Arc<dyn EventSink>, cancel: CancellationToken) -> Self {
        Self { sink, cancel }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

type RoomSubscribers = HashMap<ConnectionId, Subscriber>;
type Rooms = HashMap<RoomId, RoomSubscribers>;

#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: Mutex<Rooms>,
    /// Written only under `rooms`.
    connections: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room's set on first use.
    pub async fn register(&self, room_id: RoomId, connection: ConnectionId, subscriber: Subscriber) {
        let mut rooms = self.rooms.lock().await;
        let subscribers = rooms.entry(room_id).or_default();
        if subscribers.insert(connection, subscriber).is_none() {
            self.connections.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            room_id = %room_id,
            connection_id = %connection,
            subscribers = subscribers.len(),
            "subscriber registered"
        );
    }

    /// Remove a connection. Returns whether it was present; removing twice is fine.
    pub async fn deregister(&self, room_id: &RoomId, connection: &ConnectionId) -> bool {
        let mut rooms = self.rooms.lock().await;
        let removed = rooms
            .get_mut(room_id)
            .and_then(|subscribers| subscribers.remove(connection))
            .is_some();
        if removed {
            self.connections.fetch_sub(1, Ordering::Relaxed);
        }
        debug!(room_id = %room_id, connection_id = %connection, removed, "subscriber deregistered");
        removed
    }

    /// Lock the registry and expose one room's subscribers. The lock is held
    /// until the snapshot is dropped, so no entry can be added or removed
    /// while a broadcast walks it.
    pub async fn snapshot_for_broadcast(&self, room_id: RoomId) -> BroadcastSnapshot<'_> {
        BroadcastSnapshot {
            guard: self.rooms.lock().await,
            room_id,
        }
    }

    pub async fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms.lock().await.get(room_id).map_or(0, HashMap::len)
    }

    /// Live connections across all rooms. Does not wait for the lock.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// A room's subscriber set, borrowed under the registry lock.
pub struct BroadcastSnapshot<'a> {
    guard: MutexGuard<'a, Rooms>,
    room_id: RoomId,
}

impl BroadcastSnapshot<'_> {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn len(&self) -> usize {
        self.guard.get(&self.room_id).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &Subscriber)> {
        self.guard.get(&self.room_id).into_iter().flat_map(|subscribers| subscribers.iter())
    }
}
