//! `fleetcfg envs`.

use anyhow::Result;
use colored::Colorize;

use crate::cli::{GlobalArgs, handlers::commons};

/// Lists every environment name, aliases included.
pub fn handle(global: &GlobalArgs) -> Result<()> {
    let builder = commons::open_builder(global)?;
    let names = builder.environments().environment_names()?;

    if names.is_empty() {
        println!(
            "{}",
            format!("No environments found under '{}'.", builder.root().display()).yellow()
        );
        return Ok(());
    }
    for name in names {
        println!("{}", name.cyan());
    }
    Ok(())
}
