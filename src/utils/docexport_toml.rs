//! Load `.docexport.toml` (CLI only). Library callers build [`ExportOpts`] themselves.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ExportOpts;
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub struct DocexportToml {
    #[serde(default)]
    export: ExportSection,
}

#[derive(Debug, Default, Deserialize)]
struct ExportSection {
    catalog: Option<String>,
    database: Option<String>,
    output: Option<String>,
    manifest: Option<String>,
    warnings: Option<String>,
    query: Option<String>,
    attributes: Option<Vec<String>>,
    threads: Option<usize>,
    reset: Option<bool>,
    lock_attempts: Option<u32>,
    lock_delay_ms: Option<u64>,
    stale_after_secs: Option<u64>,
    grace_secs: Option<u64>,
    verbose: Option<bool>,
}

impl DocexportToml {
    /// Catalog path from the file, if any. Not part of [`ExportOpts`]: it selects the repository.
    pub fn catalog(&self) -> Option<PathBuf> {
        self.export.catalog.as_ref().map(PathBuf::from)
    }
}

/// Parse a config file. An explicitly named file must exist and parse.
pub fn load_config_file(path: &Path) -> Result<DocexportToml> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse config file {}", path.display()))
}

/// Load `.docexport.toml` from `dir` if present. Returns None if missing; a malformed file is an error.
pub fn load_default_config(dir: &Path) -> Result<Option<DocexportToml>> {
    let path = dir.join(PackagePaths::get().config_filename());
    if !path.is_file() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field.clone() {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_opts(file: &DocexportToml, opts: &mut ExportOpts) {
    let sec = &file.export;
    if let Some(ref p) = sec.database {
        opts.db_path = PathBuf::from(p);
    }
    if let Some(ref p) = sec.output {
        opts.output_dir = PathBuf::from(p);
    }
    if let Some(ref p) = sec.manifest {
        opts.manifest_path = Some(PathBuf::from(p));
    }
    if let Some(ref p) = sec.warnings {
        opts.warnings_path = Some(PathBuf::from(p));
    }
    apply_file_opt!(sec, opts, query => query);
    apply_file_opt!(sec, opts, attributes => attributes);
    apply_file_opt!(sec, opts, threads => num_threads);
    apply_file_opt!(sec, opts, reset => reset);
    apply_file_opt!(sec, opts, lock_attempts => lock_attempts);
    apply_file_opt!(sec, opts, lock_delay_ms => lock_delay_ms);
    apply_file_opt!(sec, opts, stale_after_secs => stale_after_secs);
    apply_file_opt!(sec, opts, grace_secs => grace_secs);
    apply_file_opt!(sec, opts, verbose => verbose);
}
