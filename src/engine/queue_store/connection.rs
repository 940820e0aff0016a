//! Open the queue store database.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use super::{SCHEMA, WAL_PRAGMAS};

/// Other processes may share the store file; wait this long on a locked database before failing a call.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// Open or create the queue DB and ensure schema + WAL.
pub fn open_store_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create queue store directory {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("open queue store {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("set busy timeout")?;
    apply_wal_and_schema(&conn)?;
    Ok(conn)
}

/// Open an in-memory DB with the same schema (tests and dry runs; no WAL pragmas needed).
pub fn open_store_connection_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory queue store")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(conn)
}
