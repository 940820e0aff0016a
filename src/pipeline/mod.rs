//! Export pipeline: context, enumeration, item processing, worker pool, orchestration.

pub mod context;
pub mod enumerate;
pub mod orchestrator;
pub mod pool;
pub mod processor;
pub mod sinks;

pub use context::{ExportContext, lock_policy};
pub use enumerate::{BuildStats, build_queue};
pub use orchestrator::{RunPhase, run_export};
pub use pool::{ItemReport, ShutdownReport, WorkerPool};
pub use processor::{ItemOutcome, process_item, worker_owner_id};
pub use sinks::{ManifestSink, WarnLevel, WarningSink, manifest_columns};
