//! Engine module: persistent queue, output lock, file naming and the CLI

pub mod arg_parser;
pub mod cli;
pub mod output_lock;
pub mod progress;
pub mod queue_store;
pub mod tools;

// Re-export commonly used items
pub use arg_parser::{Cli, Commands, ExportArgs, StoreArgs};
pub use cli::handle_run;
pub use output_lock::{
    LockOutcome, LockOwner, LockPolicy, OutputLock, OutputLockGuard, local_host_name,
};
pub use queue_store::QueueStore;
pub use tools::{output_file_name, resolve_collision, sanitize_file_name};
