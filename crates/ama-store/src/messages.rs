use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ama_core::{MessageId, RoomId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub room_id: RoomId,
    pub message: String,
    pub reaction_count: i64,
    pub answered: bool,
    pub created_at: String,
}

type RawMessage = (String, String, String, i64, bool, String);

const SELECT_COLUMNS: &str = "SELECT id, room_id, message, reaction_count, answered, created_at FROM messages";

impl MessageRow {
    fn from_raw(raw: RawMessage) -> Result<Self, StoreError> {
        let (id, room_id, message, reaction_count, answered, created_at) = raw;
        Ok(Self {
            id: row_helpers::parse_id(&id, "messages", "id")?,
            room_id: row_helpers::parse_id(&room_id, "messages", "room_id")?,
            message,
            reaction_count,
            answered,
            created_at,
        })
    }
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, message), fields(room_id = %room_id))]
    pub fn insert(&self, room_id: &RoomId, message: &str) -> Result<MessageId, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.to_string(), room_id.to_string(), message, now],
            )?;
            Ok(id)
        })
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<MessageRow, StoreError> {
        let raw = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id.to_string()], raw_row)
                .optional()?)
        })?;

        match raw {
            Some(raw) => MessageRow::from_raw(raw),
            None => Err(StoreError::NotFound(format!("message {id}"))),
        }
    }

    /// Messages of one room, oldest first.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn list_for_room(&self, room_id: &RoomId) -> Result<Vec<MessageRow>, StoreError> {
        let raw: Vec<RawMessage> = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_COLUMNS} WHERE room_id = ?1 ORDER BY created_at, id"))?;
            let rows = stmt
                .query_map([room_id.to_string()], raw_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        raw.into_iter().map(MessageRow::from_raw).collect()
    }

    /// Increment the reaction count and return the new value.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn react(&self, id: &MessageId) -> Result<i64, StoreError> {
        self.update_count(
            id,
            "UPDATE messages SET reaction_count = reaction_count + 1 WHERE id = ?1 RETURNING reaction_count",
        )
    }

    /// Decrement the reaction count (never below zero) and return the new value.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn remove_reaction(&self, id: &MessageId) -> Result<i64, StoreError> {
        self.update_count(
            id,
            "UPDATE messages SET reaction_count = MAX(reaction_count - 1, 0) WHERE id = ?1 RETURNING reaction_count",
        )
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn mark_answered(&self, id: &MessageId) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET answered = 1 WHERE id = ?1",
                [id.to_string()],
            )?)
        })?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    fn update_count(&self, id: &MessageId, sql: &str) -> Result<i64, StoreError> {
        let count = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(sql, [id.to_string()], |row| row.get::<_, i64>(0))
                .optional()?)
        })?;
        count.ok_or_else(|| StoreError::NotFound(format!("message {id}")))
    }
}
