//! vmlabctl (vmlab) - VM lifecycle checks against a Proxmox VE cluster.
//!
//! Allocates a VM, provisions it, starts and stops it, and verifies the
//! observable state after every transition.

use anyhow::Result;
use clap::Parser;

mod commands;
mod error;
mod logging;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.log_json());

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
