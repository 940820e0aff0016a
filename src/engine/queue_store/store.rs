//! Queue store operations. One connection behind a mutex so workers can share the store through an `Arc`.

use anyhow::{Context, Result};
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::engine::tools::now_ms;
use crate::{Candidate, ItemStatus, QueueItem, UpsertOutcome};

use super::{
    INSERT_ITEM_SQL, REARM_ITEM_SQL, SELECT_ITEM_SQL, SET_STATUS_SQL, open_store_connection,
    open_store_connection_in_memory,
};

pub struct QueueStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<(String, String, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn to_item((id, version_id, modified_ms, status): (String, String, i64, String)) -> Result<QueueItem> {
    Ok(QueueItem {
        id,
        version_id,
        modified_ms,
        status: status.parse()?,
    })
}

impl QueueStore {
    /// Open (or create) the store file. When `reset` is set, every record is removed first.
    /// Errors here are fatal for a run.
    pub fn open(path: &Path, reset: bool) -> Result<Self> {
        let conn = open_store_connection(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        if reset {
            let removed = store.reset()?;
            debug!("Reset queue store {} ({} records removed)", path.display(), removed);
        }
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_store_connection_in_memory()?),
            path: None,
        })
    }

    /// Path of the backing file (None for in-memory stores).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new candidate as READY, or re-arm it to READY when its version or modification time changed.
    /// Same revision as stored is a no-op, whatever the current status.
    pub fn upsert(&self, candidate: &Candidate) -> Result<UpsertOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("begin upsert")?;
        let existing = tx
            .query_row(SELECT_ITEM_SQL, [candidate.id.as_str()], row_to_item)
            .optional()
            .with_context(|| format!("read queue item {}", candidate.id))?;
        let now = now_ms();
        let outcome = match existing {
            None => {
                tx.execute(
                    INSERT_ITEM_SQL,
                    (
                        candidate.id.as_str(),
                        candidate.version_id.as_str(),
                        candidate.modified_ms,
                        ItemStatus::Ready.as_str(),
                        now,
                    ),
                )
                .with_context(|| format!("insert queue item {}", candidate.id))?;
                UpsertOutcome::Inserted
            }
            Some((_, version_id, modified_ms, _))
                if version_id != candidate.version_id || modified_ms != candidate.modified_ms =>
            {
                debug!(
                    "Re-arming {} (version {} -> {}, modified {} -> {})",
                    candidate.id, version_id, candidate.version_id, modified_ms, candidate.modified_ms
                );
                tx.execute(
                    REARM_ITEM_SQL,
                    (
                        candidate.id.as_str(),
                        candidate.version_id.as_str(),
                        candidate.modified_ms,
                        ItemStatus::Ready.as_str(),
                        now,
                    ),
                )
                .with_context(|| format!("re-arm queue item {}", candidate.id))?;
                UpsertOutcome::Rearmed
            }
            Some(_) => UpsertOutcome::Unchanged,
        };
        tx.commit().context("commit upsert")?;
        Ok(outcome)
    }

    /// All READY items, ordered by id.
    pub fn list_ready(&self) -> Result<Vec<QueueItem>> {
        self.list_by_status(ItemStatus::Ready)
    }

    pub fn list_by_status(&self, status: ItemStatus) -> Result<Vec<QueueItem>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, version_id, modified_ms, status FROM queue_items WHERE status = ?1 ORDER BY id",
            )
            .context("prepare list by status")?;
        let rows = stmt
            .query_map([status.as_str()], row_to_item)
            .context("query list by status")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(to_item(row?)?);
        }
        Ok(items)
    }

    pub fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        let conn = self.conn();
        let row = conn
            .query_row(SELECT_ITEM_SQL, [id], row_to_item)
            .optional()
            .with_context(|| format!("read queue item {}", id))?;
        row.map(to_item).transpose()
    }

    /// Set status for `id`. Returns false (and logs) when `id` is unknown.
    fn set_status(&self, id: &str, status: ItemStatus) -> Result<bool> {
        let changed = self
            .conn()
            .execute(SET_STATUS_SQL, (id, status.as_str(), now_ms()))
            .with_context(|| format!("mark {} {}", id, status))?;
        if changed == 0 {
            warn!("Cannot mark unknown queue item {} as {}", id, status);
        }
        Ok(changed > 0)
    }

    pub fn mark_in_progress(&self, id: &str) -> Result<bool> {
        self.set_status(id, ItemStatus::InProgress)
    }

    pub fn mark_complete(&self, id: &str) -> Result<bool> {
        self.set_status(id, ItemStatus::Complete)
    }

    /// Put an item back to READY (failed or interrupted processing).
    pub fn mark_ready(&self, id: &str) -> Result<bool> {
        self.set_status(id, ItemStatus::Ready)
    }

    /// Re-arm IN_PROGRESS items whose last status change is older than `older_than`. Returns how many moved.
    pub fn rearm_stale_in_progress(&self, older_than: Duration) -> Result<usize> {
        let now = now_ms();
        let age = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(age);
        let n = self
            .conn()
            .execute(
                "UPDATE queue_items SET status = ?1, updated_ms = ?2 WHERE status = ?3 AND updated_ms <= ?4",
                (
                    ItemStatus::Ready.as_str(),
                    now,
                    ItemStatus::InProgress.as_str(),
                    cutoff,
                ),
            )
            .context("re-arm stale in-progress items")?;
        Ok(n)
    }

    /// Row count per status, in READY, IN_PROGRESS, COMPLETE order.
    pub fn status_counts(&self) -> Result<Vec<(ItemStatus, usize)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM queue_items WHERE status = ?1")
            .context("prepare status count")?;
        let mut counts = Vec::with_capacity(3);
        for status in ItemStatus::all() {
            let n: i64 = stmt
                .query_row([status.as_str()], |row| row.get(0))
                .with_context(|| format!("count {}", status))?;
            counts.push((status, n.max(0) as usize));
        }
        Ok(counts)
    }

    /// Remove every record. Returns how many were removed.
    pub fn reset(&self) -> Result<usize> {
        self.conn()
            .execute("DELETE FROM queue_items", [])
            .context("reset queue store")
    }

    /// Fold the WAL back into the main file.
    pub fn checkpoint(&self) -> Result<()> {
        if self.path.is_none() {
            return Ok(());
        }
        self.conn()
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("WAL checkpoint")
    }

    /// Checkpoint and close the underlying connection.
    pub fn close(self) -> Result<()> {
        self.checkpoint()?;
        let conn = self.conn.into_inner().unwrap_or_else(|e| e.into_inner());
        conn.close()
            .map_err(|(_, e)| e)
            .context("close queue store")
    }
}
