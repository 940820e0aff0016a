//! Public and internal types for the docexport API and pipeline.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::utils::config::{Defaults, LockConsts};

/// Export status of one queued candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    Ready,
    InProgress,
    Complete,
}

impl ItemStatus {
    /// Value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Ready => "READY",
            ItemStatus::InProgress => "IN_PROGRESS",
            ItemStatus::Complete => "COMPLETE",
        }
    }

    pub fn all() -> [ItemStatus; 3] {
        [
            ItemStatus::Ready,
            ItemStatus::InProgress,
            ItemStatus::Complete,
        ]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READY" => Ok(ItemStatus::Ready),
            "IN_PROGRESS" => Ok(ItemStatus::InProgress),
            "COMPLETE" => Ok(ItemStatus::Complete),
            other => Err(anyhow::anyhow!("unknown item status {:?}", other)),
        }
    }
}

/// One row of the queue store: the latest known revision of a logical object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueItem {
    /// Stable identifier shared by every revision of the object.
    pub id: String,
    /// Revision currently queued for export.
    pub version_id: String,
    /// Modification time of that revision (milliseconds since epoch).
    pub modified_ms: i64,
    pub status: ItemStatus,
}

/// A candidate as produced by the repository cursor: `(id, version_id, modified_ms)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub version_id: String,
    pub modified_ms: i64,
}

impl Candidate {
    pub fn new(id: impl Into<String>, version_id: impl Into<String>, modified_ms: i64) -> Self {
        Self {
            id: id.into(),
            version_id: version_id.into(),
            modified_ms,
        }
    }
}

/// What [`QueueStore::upsert`](crate::engine::QueueStore::upsert) did with a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting; stored as READY.
    Inserted,
    /// Version or modification time changed; forced back to READY.
    Rearmed,
    /// Same revision as stored; status untouched.
    Unchanged,
}

/// Counts reported at the end of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub enumerated: usize,
    pub inserted: usize,
    pub rearmed: usize,
    pub dispatched: usize,
    pub exported: usize,
    pub no_content: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `(id, message)` for every item that failed.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    /// Items that reached COMPLETE in this run.
    pub fn completed(&self) -> usize {
        self.exported + self.no_content
    }
}

/// Options for one export run. Built once (defaults → `.docexport.toml` → CLI) and shared by every component.
#[derive(Clone, Debug)]
pub struct ExportOpts {
    /// Queue store file. The output lock file lives in the same directory.
    pub db_path: PathBuf,
    /// Root of the exported tree.
    pub output_dir: PathBuf,
    /// CSV manifest path. When None, no manifest is written.
    pub manifest_path: Option<PathBuf>,
    /// Warnings file. When None, warnings go to stderr.
    pub warnings_path: Option<PathBuf>,
    /// Candidate filter handed to the repository.
    pub query: String,
    /// Extra attributes written to the manifest after `id`, `version_id`, `path`.
    pub attributes: Vec<String>,
    /// Worker count.
    pub num_threads: usize,
    /// Clear the queue store before enumerating.
    pub reset: bool,
    /// Output lock retry budget.
    pub lock_attempts: u32,
    pub lock_delay_ms: u64,
    /// IN_PROGRESS items older than this are re-armed at startup. 0 disables recovery.
    pub stale_after_secs: u64,
    /// Grace period for in-flight items at shutdown before forced cancellation.
    pub grace_secs: u64,
    pub verbose: bool,
}

impl Default for ExportOpts {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(Defaults::DB_FILENAME),
            output_dir: PathBuf::from(Defaults::OUTPUT_DIR),
            manifest_path: None,
            warnings_path: None,
            query: String::new(),
            attributes: Vec::new(),
            num_threads: Defaults::THREADS,
            reset: false,
            lock_attempts: LockConsts::ATTEMPTS,
            lock_delay_ms: LockConsts::DELAY_MS,
            stale_after_secs: Defaults::STALE_AFTER_SECS,
            grace_secs: Defaults::GRACE_SECS,
            verbose: false,
        }
    }
}
