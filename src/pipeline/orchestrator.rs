use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::engine::progress::{export_bar, finish_bar, update_progress_bar};
use crate::repository::Repository;
use crate::utils::cap_workers;
use crate::{ExportOpts, RunSummary};

use super::context::ExportContext;
use super::enumerate::build_queue;
use super::pool::{ItemReport, WorkerPool};
use super::processor::ItemOutcome;

/// Run phases, entered strictly in order. SHUTDOWN runs even when an earlier phase fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Building,
    Processing,
    Shutdown,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPhase::Init => "INIT",
            RunPhase::Building => "BUILDING",
            RunPhase::Processing => "PROCESSING",
            RunPhase::Shutdown => "SHUTDOWN",
        })
    }
}

fn enter(phase: RunPhase) {
    debug!("phase: {}", phase);
}

/// Main orchestrator: build the queue from `repo`, export every READY item, shut down.
///
/// Returns Err for fatal failures (store open, enumeration); per-item failures are counted in the summary.
/// `cancel` may be set from another thread (Ctrl+C) to stop claiming new items.
pub fn run_export(
    opts: ExportOpts,
    repo: Arc<dyn Repository>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary> {
    enter(RunPhase::Init);
    let grace = Duration::from_secs(opts.grace_secs);
    let ctx = Arc::new(ExportContext::open(opts, repo, cancel)?);
    let mut summary = RunSummary::default();
    let mut pool: Option<WorkerPool> = None;

    let result = run_phases(&ctx, &mut pool, &mut summary);

    enter(RunPhase::Shutdown);
    if let Some(pool) = pool {
        let stopped = pool.shutdown(grace);
        debug!("pool stopped: {:?}", stopped);
    }
    let closed = match Arc::try_unwrap(ctx) {
        Ok(ctx) => ctx.close(),
        // A detached worker still holds the context; flush what we can and leave the rest to drop.
        Err(ctx) => ctx.flush(),
    };

    result?;
    closed.context("close export run")?;
    log_summary(&summary);
    Ok(summary)
}

fn run_phases(
    ctx: &Arc<ExportContext>,
    pool: &mut Option<WorkerPool>,
    summary: &mut RunSummary,
) -> Result<()> {
    recover_stale(ctx)?;
    enter(RunPhase::Building);
    build(ctx, summary)?;
    enter(RunPhase::Processing);
    process_ready(ctx, pool, summary)
}

fn recover_stale(ctx: &ExportContext) -> Result<()> {
    if let Some(age) = ctx.stale_after() {
        let n = ctx.store.rearm_stale_in_progress(age)?;
        if n > 0 {
            warn!(
                "Re-armed {} item(s) left IN_PROGRESS by an earlier run",
                n
            );
        }
    }
    Ok(())
}

fn build(ctx: &ExportContext, summary: &mut RunSummary) -> Result<()> {
    let stats = build_queue(
        ctx.repo.as_ref(),
        &ctx.store,
        &ctx.opts.query,
        &ctx.cancel,
    )?;
    summary.enumerated = stats.enumerated;
    summary.inserted = stats.inserted;
    summary.rearmed = stats.rearmed;
    Ok(())
}

/// Snapshot the READY set, dispatch it, and wait for one report per dispatched item.
fn process_ready(
    ctx: &Arc<ExportContext>,
    pool_slot: &mut Option<WorkerPool>,
    summary: &mut RunSummary,
) -> Result<()> {
    let ready = ctx.store.list_ready()?;
    if ready.is_empty() {
        info!("Nothing to export");
        return Ok(());
    }
    let workers = cap_workers(ctx.opts.num_threads).min(ready.len());
    let pool = pool_slot.insert(WorkerPool::start(Arc::clone(ctx), workers));
    info!("Exporting {} item(s) with {} worker(s)", ready.len(), pool.size());
    let bar = export_bar(ctx.opts.verbose, ready.len());

    for item in ready {
        if ctx.is_cancelled() {
            break;
        }
        pool.dispatch(item)?;
        summary.dispatched += 1;
    }

    for _ in 0..summary.dispatched {
        let Some(report) = pool.recv_report() else {
            warn!("All workers exited before reporting every item");
            break;
        };
        record(summary, report);
        if let Some(bar) = &bar {
            update_progress_bar(bar, 1);
        }
    }
    if let Some(bar) = &bar {
        finish_bar(bar);
    }
    Ok(())
}

fn record(summary: &mut RunSummary, report: ItemReport) {
    match report.outcome {
        ItemOutcome::Exported { .. } => summary.exported += 1,
        ItemOutcome::NoContent => summary.no_content += 1,
        ItemOutcome::Failed { message } => {
            summary.failed += 1;
            summary.failures.push((report.id, message));
        }
        ItemOutcome::Cancelled => summary.cancelled += 1,
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Completed {} item(s) ({} exported, {} without content), {} failed, {} not started",
        summary.completed(),
        summary.exported,
        summary.no_content,
        summary.failed,
        summary.cancelled
    );
    for (id, message) in &summary.failures {
        debug!("failed: {}: {}", id, message);
    }
}
