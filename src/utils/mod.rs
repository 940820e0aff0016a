pub mod config;
pub mod docexport_toml;
pub mod fd_limit;
pub mod logger;

pub use config::*;
pub use docexport_toml::{DocexportToml, apply_file_to_opts, load_config_file, load_default_config};
pub use fd_limit::{FDS_PER_WORKER, cap_workers, max_open_fds, max_workers_by_fd_limit};
pub use logger::setup_logging;
