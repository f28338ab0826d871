use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId};

/// What subscribers of a room see on the wire: `{"kind": ..., "value": {...}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EventPayload {
    MessageCreated { id: MessageId, message: String },
    MessageReactionIncreased { id: MessageId, count: i64 },
    MessageReactionDecreased { id: MessageId, count: i64 },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::MessageReactionIncreased { .. } => "message_reaction_increased",
            Self::MessageReactionDecreased { .. } => "message_reaction_decreased",
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            Self::MessageCreated { id, .. }
            | Self::MessageReactionIncreased { id, .. }
            | Self::MessageReactionDecreased { id, .. } => *id,
        }
    }
}

/// A room-scoped state change. The room id only routes the event and is
/// never part of the serialized payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomEvent {
    room_id: RoomId,
    payload: EventPayload,
}

impl RoomEvent {
    pub fn new(room_id: RoomId, payload: EventPayload) -> Self {
        Self { room_id, payload }
    }

    pub fn message_created(room_id: RoomId, id: MessageId, message: impl Into<String>) -> Self {
        Self::new(
            room_id,
            EventPayload::MessageCreated {
                id,
                message: message.into(),
            },
        )
    }

    pub fn reaction_increased(room_id: RoomId, id: MessageId, count: i64) -> Self {
        Self::new(room_id, EventPayload::MessageReactionIncreased { id, count })
    }

    pub fn reaction_decreased(room_id: RoomId, id: MessageId, count: i64) -> Self {
        Self::new(room_id, EventPayload::MessageReactionDecreased { id, count })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Serialize the wire form sent to subscribers.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}
