//! Docexport CLI: `export` runs the pipeline; `status` and `unlock` inspect and repair its state.

use anyhow::Result;
use clap::Parser;
use docexport::engine::arg_parser::Cli;
use docexport::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
