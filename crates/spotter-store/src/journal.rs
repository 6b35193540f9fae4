use chrono::{DateTime, Utc};
use rusqlite::params;

use spotter_shared::MessageId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{Message, OfflineQueueEntry};

impl Database {
    /// Upsert a queue entry.  A re-saved entry keeps its original sequence.
    pub fn save_entry(&self, entry: &OfflineQueueEntry) -> Result<()> {
        let snapshot = serde_json::to_string(&entry.message)?;
        self.conn().execute(
            "INSERT INTO offline_queue (message_id, conversation_id, seq, snapshot, enqueued_at, attempts)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM offline_queue), ?3, ?4, ?5)
             ON CONFLICT(message_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                attempts = excluded.attempts",
            params![
                entry.id().as_str(),
                entry.conversation_id().as_str(),
                snapshot,
                entry.enqueued_at.to_rfc3339(),
                entry.attempts,
            ],
        )?;
        Ok(())
    }

    pub fn remove_entry(&self, id: &MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM offline_queue WHERE message_id = ?1",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// All journaled entries in enqueue order.
    pub fn load_queue(&self) -> Result<Vec<OfflineQueueEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT snapshot, enqueued_at, attempts FROM offline_queue ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let snapshot: String = row.get(0)?;
            let enqueued_at: String = row.get(1)?;
            let attempts: u32 = row.get(2)?;
            Ok((snapshot, enqueued_at, attempts))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (snapshot, enqueued_at, attempts) = row?;
            let message: Message = serde_json::from_str(&snapshot)?;
            let enqueued_at: DateTime<Utc> =
                DateTime::parse_from_rfc3339(&enqueued_at)?.with_timezone(&Utc);
            entries.push(OfflineQueueEntry {
                message,
                enqueued_at,
                attempts,
            });
        }
        Ok(entries)
    }

    pub fn queue_len(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
