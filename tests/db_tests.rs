//! Queue store tests: upsert semantics, READY filtering, persistence across reopen, stale recovery.

use docexport::engine::QueueStore;
use docexport::{Candidate, ItemStatus, UpsertOutcome};
use std::time::Duration;

const AGE_ROW_SQL: &str = "UPDATE queue_items SET updated_ms = ?2 WHERE id = ?1";

fn ids(items: &[docexport::QueueItem]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

#[test]
fn test_upsert_same_revision_is_idempotent() {
    let store = QueueStore::open_in_memory().unwrap();
    let c = Candidate::new("a", "a1", 100);
    assert_eq!(store.upsert(&c).unwrap(), UpsertOutcome::Inserted);
    store.mark_complete("a").unwrap();
    assert_eq!(store.upsert(&c).unwrap(), UpsertOutcome::Unchanged);
    assert_eq!(store.get("a").unwrap().unwrap().status, ItemStatus::Complete);
}

#[test]
fn test_upsert_rearms_on_new_version_or_mtime() {
    let store = QueueStore::open_in_memory().unwrap();
    store.upsert(&Candidate::new("a", "a1", 100)).unwrap();
    store.upsert(&Candidate::new("b", "b1", 100)).unwrap();
    store.mark_complete("a").unwrap();
    store.mark_complete("b").unwrap();

    assert_eq!(
        store.upsert(&Candidate::new("a", "a2", 100)).unwrap(),
        UpsertOutcome::Rearmed
    );
    assert_eq!(
        store.upsert(&Candidate::new("b", "b1", 200)).unwrap(),
        UpsertOutcome::Rearmed
    );
    let a = store.get("a").unwrap().unwrap();
    assert_eq!((a.version_id.as_str(), a.status), ("a2", ItemStatus::Ready));
    let b = store.get("b").unwrap().unwrap();
    assert_eq!((b.modified_ms, b.status), (200, ItemStatus::Ready));
}

#[test]
fn test_list_ready_excludes_other_statuses() {
    let store = QueueStore::open_in_memory().unwrap();
    for id in ["a", "b", "c"] {
        store.upsert(&Candidate::new(id, format!("{id}1"), 1)).unwrap();
    }
    store.mark_in_progress("a").unwrap();
    store.mark_complete("b").unwrap();
    assert_eq!(ids(&store.list_ready().unwrap()), vec!["c"]);
    assert_eq!(
        ids(&store.list_by_status(ItemStatus::InProgress).unwrap()),
        vec!["a"]
    );
}

#[test]
fn test_mark_unknown_id_is_not_an_error() {
    let store = QueueStore::open_in_memory().unwrap();
    assert!(!store.mark_in_progress("missing").unwrap());
    assert!(!store.mark_complete("missing").unwrap());
    assert!(store.get("missing").unwrap().is_none());
}

#[test]
fn test_store_survives_reopen_and_reset_clears_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("docexport.db");
    {
        let store = QueueStore::open(&path, false).unwrap();
        store.upsert(&Candidate::new("a", "a1", 1)).unwrap();
        store.upsert(&Candidate::new("b", "b1", 1)).unwrap();
        store.mark_complete("a").unwrap();
        store.close().unwrap();
    }
    {
        let store = QueueStore::open(&path, false).unwrap();
        assert_eq!(
            store.status_counts().unwrap(),
            vec![
                (ItemStatus::Ready, 1),
                (ItemStatus::InProgress, 0),
                (ItemStatus::Complete, 1)
            ]
        );
        store.close().unwrap();
    }
    let store = QueueStore::open(&path, true).unwrap();
    assert!(store.list_ready().unwrap().is_empty());
    assert!(store.get("a").unwrap().is_none());
}

#[test]
fn test_stale_in_progress_is_rearmed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docexport.db");
    let store = QueueStore::open(&path, false).unwrap();
    store.upsert(&Candidate::new("old", "o1", 1)).unwrap();
    store.upsert(&Candidate::new("fresh", "f1", 1)).unwrap();
    store.mark_in_progress("old").unwrap();
    store.mark_in_progress("fresh").unwrap();
    store.close().unwrap();

    // age one row as if a crashed run claimed it an hour ago
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(AGE_ROW_SQL, rusqlite::params!["old", 0_i64])
        .unwrap();
    drop(conn);

    let store = QueueStore::open(&path, false).unwrap();
    assert_eq!(
        store
            .rearm_stale_in_progress(Duration::from_secs(900))
            .unwrap(),
        1
    );
    assert_eq!(ids(&store.list_ready().unwrap()), vec!["old"]);
    assert_eq!(
        store.get("fresh").unwrap().unwrap().status,
        ItemStatus::InProgress
    );
}

#[test]
fn test_huge_stale_threshold_rearms_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docexport.db");
    let store = QueueStore::open(&path, false).unwrap();
    store.upsert(&Candidate::new("old", "o1", 1)).unwrap();
    store.mark_in_progress("old").unwrap();
    store.close().unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(AGE_ROW_SQL, rusqlite::params!["old", 0_i64])
        .unwrap();
    drop(conn);

    let store = QueueStore::open(&path, false).unwrap();
    assert_eq!(
        store
            .rearm_stale_in_progress(Duration::from_secs(u64::MAX))
            .unwrap(),
        0
    );
    assert_eq!(
        store.get("old").unwrap().unwrap().status,
        ItemStatus::InProgress
    );
}

#[test]
fn test_status_column_uses_wire_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docexport.db");
    let store = QueueStore::open(&path, false).unwrap();
    store.upsert(&Candidate::new("a", "a1", 1)).unwrap();
    store.mark_in_progress("a").unwrap();
    store.close().unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    let status: String = conn
        .query_row(
            "SELECT status FROM queue_items WHERE id = ?1",
            ["a"],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(status, "IN_PROGRESS");
}
