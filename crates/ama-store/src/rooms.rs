use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ama_core::RoomId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRow {
    pub id: RoomId,
    pub theme: String,
    pub created_at: String,
}

impl RoomRow {
    fn from_raw((id, theme, created_at): (String, String, String)) -> Result<Self, StoreError> {
        Ok(Self {
            id: row_helpers::parse_id(&id, "rooms", "id")?,
            theme,
            created_at,
        })
    }
}

#[derive(Clone)]
pub struct RoomRepo {
    db: Database,
}

impl RoomRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn insert(&self, theme: &str) -> Result<RoomId, StoreError> {
        let id = RoomId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, theme, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), theme, now],
            )?;
            Ok(id)
        })
    }

    #[instrument(skip(self), fields(room_id = %id))]
    pub fn get(&self, id: &RoomId) -> Result<RoomRow, StoreError> {
        let raw = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, theme, created_at FROM rooms WHERE id = ?1",
                    [id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?)
        })?;

        match raw {
            Some(raw) => RoomRow::from_raw(raw),
            None => Err(StoreError::NotFound(format!("room {id}"))),
        }
    }

    /// All rooms, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<RoomRow>, StoreError> {
        let raw: Vec<(String, String, String)> = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, theme, created_at FROM rooms ORDER BY created_at, id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        raw.into_iter().map(RoomRow::from_raw).collect()
    }
}
