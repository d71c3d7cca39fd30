//! Command-line entry point for kvforge.

use anyhow::Result;
use clap::Parser;
use kvforge_cli::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
