//! Queue store: one SQLite row per candidate, keyed by its stable id, with export status.

mod connection;
mod store;

pub use connection::{open_store_connection, open_store_connection_in_memory};
pub use store::QueueStore;

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Schema for the queue table. `updated_ms` is stamped on every status change (stale IN_PROGRESS recovery).
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    id TEXT PRIMARY KEY,
    version_id TEXT NOT NULL,
    modified_ms INTEGER NOT NULL,
    status TEXT NOT NULL,
    updated_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_items_status ON queue_items(status);
"#;

pub(crate) const SELECT_ITEM_SQL: &str =
    "SELECT id, version_id, modified_ms, status FROM queue_items WHERE id = ?1";

pub(crate) const INSERT_ITEM_SQL: &str = "INSERT INTO queue_items (id, version_id, modified_ms, status, updated_ms) VALUES (?1, ?2, ?3, ?4, ?5)";

pub(crate) const REARM_ITEM_SQL: &str = "UPDATE queue_items SET version_id = ?2, modified_ms = ?3, status = ?4, updated_ms = ?5 WHERE id = ?1";

pub(crate) const SET_STATUS_SQL: &str =
    "UPDATE queue_items SET status = ?2, updated_ms = ?3 WHERE id = ?1";
