// src/bin/fleetcfg.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use fleetcfg::cli::{Cli, Commands, handlers};

/// Sets up logging, parses arguments, dispatches to the handler and reports
/// any error in one place.
fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    match cli.command {
        Commands::Envs => handlers::envs::handle(&cli.global),
        Commands::Build(args) => handlers::build::handle(&cli.global, args),
        Commands::Resolve(args) => handlers::resolve::handle(&cli.global, args),
    }
}
