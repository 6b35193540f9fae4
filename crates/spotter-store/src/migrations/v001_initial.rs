//! v001 -- Offline queue journal.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS offline_queue (
    message_id      TEXT PRIMARY KEY NOT NULL,   -- provisional id
    conversation_id TEXT NOT NULL,
    seq             INTEGER NOT NULL,            -- enqueue order, never rewritten
    snapshot        TEXT NOT NULL,               -- JSON-encoded message
    enqueued_at     TEXT NOT NULL,               -- RFC-3339
    attempts        INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_seq ON offline_queue(seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
