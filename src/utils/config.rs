//! Application configuration constants.
//! Defaults, lock tuning and thresholds in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived file names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    lock_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                lock_filename: "filesystem.lck".to_string(),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Config file looked up in the working directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Output lock file, created next to the queue store file.
    pub fn lock_filename(&self) -> &str {
        &self.lock_filename
    }
}

// ---- Run defaults ----

pub struct Defaults;

impl Defaults {
    pub const DB_FILENAME: &'static str = "docexport.db";
    pub const OUTPUT_DIR: &'static str = "export";
    pub const THREADS: usize = 3;
    /// IN_PROGRESS rows untouched for this long are treated as abandoned by a crashed run.
    pub const STALE_AFTER_SECS: u64 = 15 * 60;
    pub const GRACE_SECS: u64 = 60;
}

// ---- Output lock ----

/// Retry budget for the output lock: 250 attempts at 100ms is a ~25s ceiling.
pub struct LockConsts;

impl LockConsts {
    pub const ATTEMPTS: u32 = 250;
    pub const DELAY_MS: u64 = 100;
    /// Used when the host name cannot be read.
    pub const UNKNOWN_HOST: &'static str = "unknown-host";
}

// ---- Naming ----

/// Highest `name (n).ext` suffix tried before giving up on a directory.
pub const MAX_NAME_COLLISIONS: u32 = 10_000;

// ---- Pool ----

/// How often the coordinator wakes while waiting on workers (cancel checks, shutdown polling).
pub const POOL_POLL_MS: u64 = 200;

/// Second grace period after forced cancellation before remaining workers are detached.
pub const FORCED_STOP_SECS: u64 = 5;
