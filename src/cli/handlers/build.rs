//! `fleetcfg build`.

use anyhow::{Result, anyhow};
use colored::Colorize;

use crate::{
    cli::{BuildArgs, GlobalArgs, handlers::commons},
    core::builder::ComponentConfig,
};

/// Builds an environment and prints each component's resolved configuration.
pub fn handle(global: &GlobalArgs, args: BuildArgs) -> Result<()> {
    let builder = commons::open_builder(global)?;
    let results = builder.build_environment(&args.env, &args.components)?;
    let total = results.len();

    let mut built = Vec::new();
    let mut failures = Vec::new();
    for (component, result) in results {
        match result {
            Ok(config) => built.push(config),
            Err(e) => failures.push((component, e)),
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&built)?);
    } else {
        built.iter().for_each(print_config);
    }

    if failures.is_empty() {
        return Ok(());
    }
    for (component, e) in &failures {
        eprintln!("{} {}: {}", "✖".red(), component.name.bold(), e);
    }
    Err(anyhow!(
        "{} of {} components of '{}' failed to build.",
        failures.len(),
        total,
        args.env
    ))
}

fn print_config(config: &ComponentConfig) {
    println!(
        "\n{} {}",
        format!("--- {}", config.component.name).bold().cyan(),
        format!("[{}] ---", config.environment).dimmed()
    );
    for (config_type, properties) in &config.config_types {
        if properties.is_empty() {
            continue;
        }
        println!("  {}", format!("[{}]", config_type).green());
        for (key, value) in properties {
            println!("    {} = {}", key.yellow(), value);
        }
    }
}
