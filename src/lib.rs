//! Docexport: incremental, restartable export of repository objects to a directory tree

pub mod engine;
pub mod pipeline;
pub mod repository;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::repository::Repository;

/// Result alias used by public docexport API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: queue every candidate `repo` lists for `opts.query`, export the READY ones
/// under `opts.output_dir`, and return the run's counts.
///
/// Safe to call again after a crash or cancellation: items already COMPLETE with an unchanged
/// revision are skipped. Set `cancel` from another thread to stop claiming new items.
///
/// ```ignore
/// let repo = Arc::new(docexport::repository::CatalogRepository::open(Path::new("catalog.json"))?);
/// let opts = ExportOpts { output_dir: "out".into(), ..Default::default() };
/// let summary = docexport::export(opts, repo, Arc::new(AtomicBool::new(false)))?;
/// ```
pub fn export(
    opts: ExportOpts,
    repo: Arc<dyn Repository>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary> {
    pipeline::run_export(opts, repo, cancel)
}
