//! Per-run context: everything a worker needs, built once in INIT and shared through an `Arc`.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::ExportOpts;
use crate::engine::{LockPolicy, OutputLock, QueueStore};
use crate::repository::Repository;

use super::sinks::{ManifestSink, WarningSink};

pub struct ExportContext {
    pub opts: ExportOpts,
    pub store: QueueStore,
    pub lock: OutputLock,
    pub manifest: Option<ManifestSink>,
    pub warnings: WarningSink,
    pub repo: Arc<dyn Repository>,
    /// Set by Ctrl+C or forced shutdown; workers stop claiming items.
    pub cancel: Arc<AtomicBool>,
}

impl ExportContext {
    /// Open the store (fatal on error), the lock beside it, and the sinks named in `opts`.
    pub fn open(
        opts: ExportOpts,
        repo: Arc<dyn Repository>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let store = QueueStore::open(&opts.db_path, opts.reset)?;
        let lock = OutputLock::beside_store(&opts.db_path, lock_policy(&opts));
        let warnings = match &opts.warnings_path {
            Some(p) => WarningSink::create(p)?,
            None => WarningSink::stderr(),
        };
        let manifest = opts
            .manifest_path
            .as_deref()
            .map(|p| ManifestSink::open(p, &opts.attributes, opts.reset))
            .transpose()?;
        std::fs::create_dir_all(&opts.output_dir).with_context(|| {
            format!("create output directory {}", opts.output_dir.display())
        })?;
        Ok(Self {
            opts,
            store,
            lock,
            manifest,
            warnings,
            repo,
            cancel,
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.opts.stale_after_secs > 0).then(|| Duration::from_secs(self.opts.stale_after_secs))
    }

    /// Flush sinks and the store without consuming the context (workers may still hold it).
    pub fn flush(&self) -> Result<()> {
        let mut first_err = None;
        if let Some(m) = &self.manifest
            && let Err(e) = m.flush()
        {
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.warnings.flush() {
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.store.checkpoint() {
            first_err.get_or_insert(e);
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Flush sinks and close the store.
    pub fn close(self) -> Result<()> {
        if let Some(m) = &self.manifest {
            m.flush()?;
        }
        self.warnings.flush()?;
        self.store.close()
    }
}

pub fn lock_policy(opts: &ExportOpts) -> LockPolicy {
    LockPolicy {
        attempts: opts.lock_attempts,
        delay: Duration::from_millis(opts.lock_delay_ms),
    }
}
