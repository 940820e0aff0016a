//! Candidate enumerator: drain the repository cursor into the queue store.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::UpsertOutcome;
use crate::engine::QueueStore;
use crate::repository::Repository;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub enumerated: usize,
    pub inserted: usize,
    pub rearmed: usize,
    pub unchanged: usize,
    /// Upserts that failed; those rows keep their previous state until the next run.
    pub store_errors: usize,
}

/// Upsert every candidate matching `query`. A cursor error aborts the build (rows already upserted stay);
/// a failed upsert is logged and skipped. The cursor is dropped on every exit path.
pub fn build_queue(
    repo: &dyn Repository,
    store: &QueueStore,
    query: &str,
    cancel: &AtomicBool,
) -> Result<BuildStats> {
    let mut stats = BuildStats::default();
    let cursor = repo
        .list_candidates(query)
        .context("query repository for candidates")?;
    for row in cursor {
        if cancel.load(Ordering::Relaxed) {
            warn!(
                "Candidate enumeration cancelled after {} rows",
                stats.enumerated
            );
            break;
        }
        let candidate = row.with_context(|| {
            format!(
                "enumerate candidates (after {} rows)",
                stats.enumerated
            )
        })?;
        stats.enumerated += 1;
        match store.upsert(&candidate) {
            Ok(UpsertOutcome::Inserted) => stats.inserted += 1,
            Ok(UpsertOutcome::Rearmed) => stats.rearmed += 1,
            Ok(UpsertOutcome::Unchanged) => stats.unchanged += 1,
            Err(e) => {
                warn!("Could not queue candidate {}: {:#}", candidate.id, e);
                stats.store_errors += 1;
            }
        }
    }
    debug!("{:?}", stats);
    info!(
        "Queued {} candidates ({} new, {} changed, {} unchanged)",
        stats.enumerated, stats.inserted, stats.rearmed, stats.unchanged
    );
    Ok(stats)
}
