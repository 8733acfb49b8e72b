//! data-uploader - push plugin resources to a Loom server
//!
//! Validates a local resource against what the server expects, uploads it,
//! and optionally stages and syncs the new version.

use anyhow::Result;
use clap::Parser;

mod archive;
mod client;
mod commands;
mod error;
mod output;
mod resource;
mod target;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
