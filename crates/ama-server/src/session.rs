//! One live subscription: a WebSocket bound to a room until cancelled.

use std::sync::Arc;

use ama_core::{ConnectionId, RoomId};
use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::{ConnectionRegistry, DeliveryError, EventSink, Subscriber};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Subscribed,
    Closed,
}

/// Owns one subscription from handshake to teardown.
///
/// Created in `Connecting` before the upgrade. `run` registers it
/// (`Subscribed`), parks until its token is cancelled, then deregisters it
/// (`Closed`). The token is a child of the server's shutdown token, and the
/// notifier cancels it after a failed write.
pub struct SubscriptionSession {
    connection_id: ConnectionId,
    room_id: RoomId,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    state: SessionState,
}

impl SubscriptionSession {
    pub fn new(room_id: RoomId, registry: Arc<ConnectionRegistry>, parent: &CancellationToken) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            room_id,
            registry,
            cancel: parent.child_token(),
            state: SessionState::Connecting,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe `sink` and hold the subscription until cancelled.
    pub async fn run(mut self, sink: Arc<dyn EventSink>) -> SessionState {
        self.registry
            .register(
                self.room_id,
                self.connection_id,
                Subscriber::new(sink, self.cancel.clone()),
            )
            .await;
        self.state = SessionState::Subscribed;
        info!(room_id = %self.room_id, connection_id = %self.connection_id, "client subscribed");

        self.cancel.cancelled().await;

        self.registry.deregister(&self.room_id, &self.connection_id).await;
        self.state = SessionState::Closed;
        info!(room_id = %self.room_id, connection_id = %self.connection_id, "client unsubscribed");
        self.state
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        // Only reachable when the `run` future is dropped mid-subscription.
        if self.state != SessionState::Subscribed {
            return;
        }
        self.cancel.cancel();
        let registry = Arc::clone(&self.registry);
        let room_id = self.room_id;
        let connection_id = self.connection_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.deregister(&room_id, &connection_id).await;
            });
        }
    }
}

/// Write half of an upgraded socket.
pub struct WsSink {
    tx: Mutex<SplitSink<WebSocket, WsMessage>>,
}

impl WsSink {
    pub fn new(tx: SplitSink<WebSocket, WsMessage>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    pub async fn close(&self) {
        let _ = self.tx.lock().await.close().await;
    }
}

#[async_trait]
impl EventSink for WsSink {
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError> {
        self.tx
            .lock()
            .await
            .send(WsMessage::Text(payload.to_owned().into()))
            .await
            .map_err(|e| DeliveryError(e.to_string()))
    }
}

/// Drive an upgraded socket through `session`.
///
/// Inbound frames are drained only to notice the peer going away; a close
/// frame or read error cancels the session. The socket is closed on the way out.
pub async fn serve_socket(socket: WebSocket, session: SubscriptionSession) {
    let (ws_tx, mut ws_rx) = socket.split();
    let sink = Arc::new(WsSink::new(ws_tx));
    let connection_id = session.connection_id();

    let peer_cancel = session.cancel_token();
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            if let WsMessage::Close(_) = frame {
                break;
            }
        }
        debug!(connection_id = %connection_id, "peer closed connection");
        peer_cancel.cancel();
    });

    session.run(sink.clone()).await;

    reader.abort();
    sink.close().await;
}
