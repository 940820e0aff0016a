//! Item processor: export one queued item end to end and record its outcome in the store.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::QueueItem;
use crate::engine::tools::{
    folder_to_output_dir, output_file_name, path_to_manifest_string, resolve_collision,
};

use super::context::ExportContext;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Content written to `path`.
    Exported { path: PathBuf },
    /// Nothing to write; still a terminal success.
    NoContent,
    /// Processing failed; the item was put back to READY.
    Failed { message: String },
    /// Not started because the run was cancelled; the item is still READY.
    Cancelled,
}

/// Lock owner id for a worker: unique across processes on one host.
pub fn worker_owner_id(worker: usize) -> String {
    format!("{}-worker-{}", std::process::id(), worker)
}

/// Claim, export and settle one item. Never returns an error: failures are logged, written to the
/// warnings sink, and the item is re-armed so the next run retries it.
pub fn process_item(ctx: &ExportContext, owner_id: &str, item: &QueueItem) -> ItemOutcome {
    if ctx.is_cancelled() {
        return ItemOutcome::Cancelled;
    }
    debug!("{} processing {} ({})", owner_id, item.id, item.version_id);
    if let Err(e) = ctx.store.mark_in_progress(&item.id) {
        warn!("Could not mark {} in progress: {:#}", item.id, e);
    }

    match export_item(ctx, owner_id, item) {
        Ok(outcome) => {
            if let Err(e) = ctx.store.mark_complete(&item.id) {
                warn!("Could not mark {} complete: {:#}", item.id, e);
            }
            outcome
        }
        Err(e) => {
            let message = format!("{:#}", e);
            warn!("Error processing candidate {}: {}", item.id, message);
            ctx.warnings.warn(&format!(
                "Error processing candidate {}: {}",
                item.id, message
            ));
            if let Err(e) = ctx.store.mark_ready(&item.id) {
                warn!("Could not re-arm {}: {:#}", item.id, e);
            }
            ItemOutcome::Failed { message }
        }
    }
}

fn export_item(ctx: &ExportContext, owner_id: &str, item: &QueueItem) -> Result<ItemOutcome> {
    let obj = ctx
        .repo
        .fetch_object(&item.version_id)
        .with_context(|| format!("fetch object {}", item.version_id))?;

    let Some(content) = obj.content.as_deref() else {
        debug!("No content for object {} - skipping", item.id);
        ctx.warnings
            .info(&format!("Object {} ({}) has no content", item.id, item.version_id));
        return Ok(ItemOutcome::NoContent);
    };

    let folder = match obj.folder_paths.as_slice() {
        [] => {
            ctx.warnings.warn(&format!(
                "Object {} has no folder path; exporting to the output root",
                item.id
            ));
            ""
        }
        [only] => only.as_str(),
        [first, ..] => {
            ctx.warnings.warn(&format!(
                "Object {} has more than one path; using {}",
                item.id, first
            ));
            first.as_str()
        }
    };

    let file_name = output_file_name(&obj.name, &obj.format);
    let dir = folder_to_output_dir(&ctx.opts.output_dir, folder);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create directory {}", dir.display()))?;

    let target = {
        let _guard = ctx.lock.lock_scope(owner_id)?;
        let target = resolve_collision(&dir, &file_name)?;
        write_new_file(&target, content)?;
        target
    };
    debug!("Saved {} to {}", item.id, target.display());

    if let Some(manifest) = &ctx.manifest {
        manifest.append(&obj, &path_to_manifest_string(&target))?;
    }
    Ok(ItemOutcome::Exported { path: target })
}

/// Write `content` to a file that must not exist yet.
fn write_new_file(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.write_all(content)
        .with_context(|| format!("write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryRepository, RepoObject};
    use crate::{Candidate, ExportOpts, ItemStatus};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn context(dir: &Path) -> (Arc<MemoryRepository>, ExportContext) {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(RepoObject {
            id: "a".into(),
            version_id: "a1".into(),
            name: "Plan: Q3".into(),
            format: "pdf".into(),
            folder_paths: vec!["/Ops".into()],
            content: Some(b"%PDF".to_vec()),
            ..Default::default()
        });
        let opts = ExportOpts {
            db_path: dir.join("docexport.db"),
            output_dir: dir.join("out"),
            warnings_path: Some(dir.join("warnings.txt")),
            lock_attempts: 2,
            lock_delay_ms: 1,
            ..Default::default()
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = ExportContext::open(opts, repo.clone(), cancel).unwrap();
        ctx.store.upsert(&Candidate::new("a", "a1", 0)).unwrap();
        (repo, ctx)
    }

    #[test]
    fn exports_under_sanitized_name_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, ctx) = context(dir.path());
        let item = ctx.store.get("a").unwrap().unwrap();
        let outcome = process_item(&ctx, &worker_owner_id(0), &item);
        let expected = dir.path().join("out").join("Ops").join("Plan_ Q3.pdf");
        assert_eq!(outcome, ItemOutcome::Exported { path: expected.clone() });
        assert_eq!(std::fs::read(expected).unwrap(), b"%PDF");
        assert_eq!(ctx.store.get("a").unwrap().unwrap().status, ItemStatus::Complete);
    }

    #[test]
    fn lock_timeout_fails_item_and_rearms_it() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, ctx) = context(dir.path());
        ctx.lock.acquire("someone-else").unwrap();
        let item = ctx.store.get("a").unwrap().unwrap();
        let outcome = process_item(&ctx, &worker_owner_id(0), &item);
        let ItemOutcome::Failed { message } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(message.contains("timed out waiting for output lock"));
        assert_eq!(ctx.store.get("a").unwrap().unwrap().status, ItemStatus::Ready);
        assert!(!dir.path().join("out/Ops/Plan_ Q3.pdf").exists());
    }
}
