//! In-memory repository with failure injection.

use anyhow::{Result, anyhow, bail};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CandidateCursor, Query, RepoObject, Repository};
use crate::Candidate;

type FetchHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct State {
    objects: Vec<RepoObject>,
    failing_fetches: HashSet<String>,
    fail_listing_after: Option<usize>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
    open_cursors: Arc<AtomicUsize>,
    fetches: AtomicUsize,
    on_fetch: Mutex<Option<FetchHook>>,
}

/// Cursor that tracks how many are open, so callers can check it was released.
struct MemoryCursor {
    items: std::vec::IntoIter<Candidate>,
    fail_after: Option<usize>,
    yielded: usize,
    failed: bool,
    open_cursors: Arc<AtomicUsize>,
}

impl Iterator for MemoryCursor {
    type Item = Result<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.fail_after.is_some_and(|n| self.yielded >= n) {
            self.failed = true;
            return Some(Err(anyhow!(
                "cursor transport error after {} rows",
                self.yielded
            )));
        }
        let next = self.items.next()?;
        self.yielded += 1;
        Some(Ok(next))
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.open_cursors.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace (by `id`) an object revision.
    pub fn insert(&self, obj: RepoObject) {
        let mut state = self.state();
        state.objects.retain(|o| o.id != obj.id);
        state.objects.push(obj);
    }

    /// Make `fetch_object(version_id)` fail.
    pub fn fail_fetch(&self, version_id: &str) {
        self.state().failing_fetches.insert(version_id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_fetches.clear();
        state.fail_listing_after = None;
    }

    /// Make cursors error after yielding `n` rows.
    pub fn fail_listing_after(&self, n: usize) {
        self.state().fail_listing_after = Some(n);
    }

    /// Run `hook(version_id)` at the start of every fetch.
    pub fn on_fetch(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_fetch.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Cursors opened and not yet dropped.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Repository for MemoryRepository {
    fn list_candidates(&self, query: &str) -> Result<CandidateCursor<'_>> {
        let query = Query::parse(query)?;
        let state = self.state();
        let items: Vec<Candidate> = state
            .objects
            .iter()
            .filter(|o| query.matches(o))
            .map(RepoObject::candidate)
            .collect();
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            items: items.into_iter(),
            fail_after: state.fail_listing_after,
            yielded: 0,
            failed: false,
            open_cursors: Arc::clone(&self.open_cursors),
        }))
    }

    fn fetch_object(&self, version_id: &str) -> Result<RepoObject> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self
            .on_fetch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            hook(version_id);
        }
        let state = self.state();
        if state.failing_fetches.contains(version_id) {
            bail!("fetch of {} failed", version_id);
        }
        state
            .objects
            .iter()
            .find(|o| o.version_id == version_id)
            .cloned()
            .ok_or_else(|| anyhow!("object {} not found", version_id))
    }
}
