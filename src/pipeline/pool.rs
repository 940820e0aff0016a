//! Fixed-size worker pool. Items go in on a job channel; one [`ItemReport`] comes back per item.

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, error, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::QueueItem;
use crate::utils::config::{FORCED_STOP_SECS, POOL_POLL_MS};

use super::context::ExportContext;
use super::processor::{ItemOutcome, process_item, worker_owner_id};

/// Job channel capacity. Dispatch blocks when workers fall this far behind.
pub const JOB_CHANNEL_CAP: usize = 1024;

#[derive(Clone, Debug)]
pub struct ItemReport {
    pub id: String,
    pub worker: usize,
    pub outcome: ItemOutcome,
}

/// How the pool stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    /// Workers still busy after forced cancellation; their threads were left to finish on their own.
    pub detached: usize,
    pub forced: bool,
}

pub struct WorkerPool {
    job_tx: Option<Sender<QueueItem>>,
    report_rx: Receiver<ItemReport>,
    handles: Vec<JoinHandle<()>>,
    ctx: Arc<ExportContext>,
}

fn worker_loop(
    worker: usize,
    ctx: Arc<ExportContext>,
    job_rx: Receiver<QueueItem>,
    report_tx: Sender<ItemReport>,
) {
    let owner_id = worker_owner_id(worker);
    while let Ok(item) = job_rx.recv() {
        let outcome = catch_unwind(AssertUnwindSafe(|| process_item(&ctx, &owner_id, &item)))
            .unwrap_or_else(|_| {
                error!("Worker {} panicked on {}", worker, item.id);
                ctx.warnings
                    .error(&format!("Worker panicked while processing {}", item.id));
                // The output lock guard released during unwind; put the item back.
                if let Err(e) = ctx.store.mark_ready(&item.id) {
                    warn!("Could not re-arm {}: {:#}", item.id, e);
                }
                ItemOutcome::Failed {
                    message: "worker panicked".to_string(),
                }
            });
        let report = ItemReport {
            id: item.id,
            worker,
            outcome,
        };
        if report_tx.send(report).is_err() {
            break;
        }
    }
    debug!("worker {} exiting", worker);
}

impl WorkerPool {
    /// Spawn `num_workers` threads (at least one) sharing `ctx`.
    pub fn start(ctx: Arc<ExportContext>, num_workers: usize) -> Self {
        let (job_tx, job_rx) = bounded::<QueueItem>(JOB_CHANNEL_CAP);
        let (report_tx, report_rx) = unbounded::<ItemReport>();
        let handles = (0..num_workers.max(1))
            .map(|worker| {
                let ctx = Arc::clone(&ctx);
                let job_rx = job_rx.clone();
                let report_tx = report_tx.clone();
                thread::Builder::new()
                    .name(format!("export-worker-{worker}"))
                    .spawn(move || worker_loop(worker, ctx, job_rx, report_tx))
            })
            .filter_map(|h| {
                h.map_err(|e| error!("Could not spawn export worker: {}", e))
                    .ok()
            })
            .collect();
        // Dropping the last sender closes the report channel once every worker exits.
        drop(report_tx);
        Self {
            job_tx: Some(job_tx),
            report_rx,
            handles,
            ctx,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue an item for the next free worker.
    pub fn dispatch(&self, item: QueueItem) -> Result<()> {
        let tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| anyhow!("worker pool is shut down"))?;
        tx.send(item)
            .map_err(|e| anyhow!("no worker left to take item {}", e.0.id))
    }

    /// Wait for the next report. None once every worker has exited.
    pub fn recv_report(&self) -> Option<ItemReport> {
        self.report_rx.recv().ok()
    }

    /// Stop accepting work, give in-flight items `grace` to finish, then cancel and wait briefly once more.
    /// Workers still running after that are detached.
    pub fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        drop(self.job_tx.take());
        let mut report = ShutdownReport::default();

        if !wait_for(&self.handles, grace) {
            warn!(
                "Workers still busy after {:?} grace period; cancelling remaining work",
                grace
            );
            report.forced = true;
            self.ctx.cancel();
            wait_for(&self.handles, Duration::from_secs(FORCED_STOP_SECS));
        }

        for handle in self.handles.drain(..) {
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("export worker thread panicked");
                }
                report.joined += 1;
            } else {
                report.detached += 1;
            }
        }
        if report.detached > 0 {
            warn!(
                "{} worker(s) did not stop; their items stay IN_PROGRESS until re-armed",
                report.detached
            );
        }
        report
    }
}

/// Poll until all handles are finished or `timeout` elapses. True if all finished.
/// A timeout too large to represent as an `Instant` waits without a deadline.
fn wait_for(handles: &[JoinHandle<()>], timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    let poll = Duration::from_millis(POOL_POLL_MS);
    loop {
        if handles.iter().all(|h| h.is_finished()) {
            return true;
        }
        let nap = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                poll.min(deadline - now)
            }
            None => poll,
        };
        thread::sleep(nap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryRepository, RepoObject};
    use crate::{Candidate, ExportOpts, ItemStatus};
    use std::sync::atomic::AtomicBool;

    fn setup(dir: &std::path::Path, repo: Arc<MemoryRepository>) -> Arc<ExportContext> {
        let opts = ExportOpts {
            db_path: dir.join("docexport.db"),
            output_dir: dir.join("out"),
            warnings_path: Some(dir.join("warnings.txt")),
            ..Default::default()
        };
        let ctx = ExportContext::open(opts, repo, Arc::new(AtomicBool::new(false))).unwrap();
        ctx.store.upsert(&Candidate::new("a", "a1", 1)).unwrap();
        Arc::new(ctx)
    }

    fn item_a() -> RepoObject {
        RepoObject {
            id: "a".into(),
            version_id: "a1".into(),
            modified_ms: 1,
            name: "a".into(),
            content: Some(b"a".to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn panic_in_worker_is_reported_and_item_rearmed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(item_a());
        repo.on_fetch(|_| panic!("boom"));
        let ctx = setup(dir.path(), Arc::clone(&repo));

        let pool = WorkerPool::start(Arc::clone(&ctx), 2);
        for item in ctx.store.list_ready().unwrap() {
            pool.dispatch(item).unwrap();
        }
        let report = pool.recv_report().unwrap();
        assert_eq!(report.id, "a");
        assert!(matches!(report.outcome, ItemOutcome::Failed { .. }));
        let stopped = pool.shutdown(Duration::from_secs(5));
        assert_eq!(stopped.joined, 2);
        assert!(!stopped.forced);
        assert_eq!(ctx.store.get("a").unwrap().unwrap().status, ItemStatus::Ready);
    }

    #[test]
    fn shutdown_past_grace_cancels_and_still_joins() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(item_a());
        repo.on_fetch(|_| thread::sleep(Duration::from_millis(300)));
        let ctx = setup(dir.path(), Arc::clone(&repo));

        let pool = WorkerPool::start(Arc::clone(&ctx), 1);
        for item in ctx.store.list_ready().unwrap() {
            pool.dispatch(item).unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        let stopped = pool.shutdown(Duration::ZERO);
        assert!(stopped.forced);
        assert_eq!((stopped.joined, stopped.detached), (1, 0));
        assert!(ctx.is_cancelled());
        // the in-flight item still finished
        assert_eq!(
            ctx.store.get("a").unwrap().unwrap().status,
            ItemStatus::Complete
        );
    }

    #[test]
    fn unbounded_grace_waits_for_workers() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(item_a());
        repo.on_fetch(|_| thread::sleep(Duration::from_millis(50)));
        let ctx = setup(dir.path(), Arc::clone(&repo));

        let pool = WorkerPool::start(Arc::clone(&ctx), 2);
        assert_eq!(pool.size(), 2);
        for item in ctx.store.list_ready().unwrap() {
            pool.dispatch(item).unwrap();
        }
        let stopped = pool.shutdown(Duration::from_secs(u64::MAX));
        assert_eq!(stopped, ShutdownReport { joined: 2, detached: 0, forced: false });
        assert!(!ctx.is_cancelled());
        assert_eq!(
            ctx.store.get("a").unwrap().unwrap().status,
            ItemStatus::Complete
        );
    }

    #[test]
    fn dispatch_after_cancel_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(item_a());
        let ctx = setup(dir.path(), Arc::clone(&repo));
        ctx.cancel();

        let pool = WorkerPool::start(Arc::clone(&ctx), 1);
        for item in ctx.store.list_ready().unwrap() {
            pool.dispatch(item).unwrap();
        }
        assert_eq!(pool.recv_report().unwrap().outcome, ItemOutcome::Cancelled);
        pool.shutdown(Duration::from_secs(1));
        assert_eq!(repo.fetch_count(), 0);
        assert_eq!(ctx.store.get("a").unwrap().unwrap().status, ItemStatus::Ready);
    }
}
