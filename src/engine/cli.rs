//! CLI command handlers: export (default workflow), status, unlock.

use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::arg_parser::{Cli, Commands, ExportArgs, StoreArgs};
use crate::engine::{OutputLock, QueueStore};
use crate::pipeline::{lock_policy, run_export};
use crate::repository::CatalogRepository;
use crate::utils::{
    DocexportToml, PackagePaths, apply_file_to_opts, load_config_file, load_default_config,
    setup_logging,
};
use crate::{ExportOpts, RunSummary};

/// `--config` if given (must exist), else `.docexport.toml` in the working directory if present.
fn load_file_config(explicit: Option<&Path>) -> Result<Option<DocexportToml>> {
    match explicit {
        Some(path) => load_config_file(path).map(Some),
        None => load_default_config(Path::new(".")),
    }
}

/// Defaults, then the config file, then CLI flags.
pub fn build_export_opts(args: &ExportArgs, file: Option<&DocexportToml>) -> ExportOpts {
    let mut opts = ExportOpts::default();
    if let Some(file) = file {
        apply_file_to_opts(file, &mut opts);
    }
    if let Some(ref p) = args.database {
        opts.db_path = p.clone();
    }
    if let Some(ref p) = args.output {
        opts.output_dir = p.clone();
    }
    if args.manifest.is_some() {
        opts.manifest_path = args.manifest.clone();
    }
    if args.warnings.is_some() {
        opts.warnings_path = args.warnings.clone();
    }
    if let Some(ref q) = args.query {
        opts.query = q.clone();
    }
    if !args.attributes.is_empty() {
        opts.attributes = args.attributes.clone();
    }
    opts.num_threads = args.threads.unwrap_or(opts.num_threads);
    opts.reset = args.reset.unwrap_or(opts.reset);
    opts.lock_attempts = args.lock_attempts.unwrap_or(opts.lock_attempts);
    opts.lock_delay_ms = args.lock_delay_ms.unwrap_or(opts.lock_delay_ms);
    opts.stale_after_secs = args.stale_after_secs.unwrap_or(opts.stale_after_secs);
    opts.grace_secs = args.grace_secs.unwrap_or(opts.grace_secs);
    opts.verbose = args.verbose.unwrap_or(opts.verbose);
    opts
}

fn store_db_path(args: &StoreArgs, file: Option<&DocexportToml>) -> PathBuf {
    if let Some(ref p) = args.database {
        return p.clone();
    }
    let mut opts = ExportOpts::default();
    if let Some(file) = file {
        apply_file_to_opts(file, &mut opts);
    }
    opts.db_path
}

/// Dispatch the parsed command line.
pub fn handle_run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Export(args) => handle_export(args),
        Commands::Status(args) => handle_status(args),
        Commands::Unlock(args) => handle_unlock(args),
    }
}

fn handle_export(args: &ExportArgs) -> Result<()> {
    let file = load_file_config(args.config.as_deref())?;
    let opts = build_export_opts(args, file.as_ref());
    setup_logging(opts.verbose);
    debug!(
        "{} CONFIG:{:#?}",
        PackagePaths::get().pkg_name().to_uppercase(),
        opts
    );

    let catalog = args
        .catalog
        .clone()
        .or_else(|| file.as_ref().and_then(DocexportToml::catalog))
        .ok_or_else(|| {
            anyhow!("no catalog given: pass --catalog or set `catalog` under [export]")
        })?;
    let repo = Arc::new(CatalogRepository::open(&catalog)?);
    info!("Loaded {} object(s) from {}", repo.len(), catalog.display());

    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_requested_handler = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        cancel_requested_handler.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;

    let summary = run_export(opts, repo, Arc::clone(&cancel_requested))?;
    print_summary(&summary);

    if cancel_requested.load(Ordering::Relaxed) {
        bail!(
            "Export cancelled by user; {} item(s) stay READY for the next run",
            summary.cancelled
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    eprintln!(
        "{} {} | {} {} | {} {}",
        "Queued:".cyan(),
        summary.enumerated,
        "New:".cyan(),
        summary.inserted,
        "Changed:".cyan(),
        summary.rearmed,
    );
    let exported = format!("Exported: {}", summary.exported);
    let no_content = format!("No content: {}", summary.no_content);
    let failed = format!("Failed: {}", summary.failed);
    let failed = failed.as_str();
    eprintln!(
        "{} | {} | {}",
        exported.as_str().green(),
        no_content.as_str().dimmed(),
        if summary.failed > 0 {
            failed.red()
        } else {
            failed.normal()
        },
    );
    for (id, message) in &summary.failures {
        eprintln!("  failed: {}: {}", id, message);
    }
}

fn handle_status(args: &StoreArgs) -> Result<()> {
    setup_logging(args.verbose);
    let file = load_file_config(args.config.as_deref())?;
    let db_path = store_db_path(args, file.as_ref());
    if !db_path.is_file() {
        bail!("no queue store at {}", db_path.display());
    }
    let store = QueueStore::open(&db_path, false)?;
    for (status, count) in store.status_counts()? {
        println!("{:<12} {}", status.as_str(), count);
    }
    store.close()
}

fn handle_unlock(args: &StoreArgs) -> Result<()> {
    setup_logging(args.verbose);
    let file = load_file_config(args.config.as_deref())?;
    let db_path = store_db_path(args, file.as_ref());
    let lock = OutputLock::beside_store(&db_path, lock_policy(&ExportOpts::default()));
    match lock.clear_for_host()? {
        Some(owner) => info!(
            "Cleared output lock held by {} on {}",
            owner.owner_id, owner.host_name
        ),
        None => {
            let owner = lock.current_owner()?;
            if owner.is_empty() {
                info!("Output lock at {} is not held", lock.path().display());
            } else {
                warn!(
                    "Output lock is held by {} on {}; only that host can clear it",
                    owner.owner_id, owner.host_name
                );
            }
        }
    }
    Ok(())
}
