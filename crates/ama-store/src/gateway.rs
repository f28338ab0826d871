//! The persistence surface the HTTP layer depends on.

use ama_core::{MessageId, RoomId};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::{MessageRepo, MessageRow};
use crate::rooms::{RoomRepo, RoomRow};

/// Room and message persistence. `StoreError::NotFound` is the only error
/// callers are expected to distinguish; everything else is an outage.
pub trait RoomStore: Send + Sync {
    fn insert_room(&self, theme: &str) -> Result<RoomId, StoreError>;
    fn get_room(&self, id: &RoomId) -> Result<RoomRow, StoreError>;
    fn list_rooms(&self) -> Result<Vec<RoomRow>, StoreError>;

    fn insert_message(&self, room_id: &RoomId, message: &str) -> Result<MessageId, StoreError>;
    fn get_message(&self, id: &MessageId) -> Result<MessageRow, StoreError>;
    fn list_room_messages(&self, room_id: &RoomId) -> Result<Vec<MessageRow>, StoreError>;

    /// Returns the new reaction count.
    fn react_to_message(&self, id: &MessageId) -> Result<i64, StoreError>;
    /// Returns the new reaction count.
    fn remove_reaction_from_message(&self, id: &MessageId) -> Result<i64, StoreError>;
    fn mark_message_as_answered(&self, id: &MessageId) -> Result<(), StoreError>;
}

/// SQLite-backed `RoomStore`.
#[derive(Clone)]
pub struct SqliteRoomStore {
    rooms: RoomRepo,
    messages: MessageRepo,
}

impl SqliteRoomStore {
    pub fn new(db: Database) -> Self {
        Self {
            rooms: RoomRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }
}

impl RoomStore for SqliteRoomStore {
    fn insert_room(&self, theme: &str) -> Result<RoomId, StoreError> {
        self.rooms.insert(theme)
    }

    fn get_room(&self, id: &RoomId) -> Result<RoomRow, StoreError> {
        self.rooms.get(id)
    }

    fn list_rooms(&self) -> Result<Vec<RoomRow>, StoreError> {
        self.rooms.list()
    }

    fn insert_message(&self, room_id: &RoomId, message: &str) -> Result<MessageId, StoreError> {
        self.messages.insert(room_id, message)
    }

    fn get_message(&self, id: &MessageId) -> Result<MessageRow, StoreError> {
        self.messages.get(id)
    }

    fn list_room_messages(&self, room_id: &RoomId) -> Result<Vec<MessageRow>, StoreError> {
        self.messages.list_for_room(room_id)
    }

    fn react_to_message(&self, id: &MessageId) -> Result<i64, StoreError> {
        self.messages.react(id)
    }

    fn remove_reaction_from_message(&self, id: &MessageId) -> Result<i64, StoreError> {
        self.messages.remove_reaction(id)
    }

    fn mark_message_as_answered(&self, id: &MessageId) -> Result<(), StoreError> {
        self.messages.mark_answered(id)
    }
}
