//! `fleetcfg resolve`.

use anyhow::{Context, Result, anyhow};

use crate::cli::{GlobalArgs, ResolveArgs, handlers::commons};

/// Prints one value resolved in the context of a component.
pub fn handle(global: &GlobalArgs, args: ResolveArgs) -> Result<()> {
    let builder = commons::open_builder(global)?;

    if let Some(config_type) = args.config_type.as_deref()
        && builder.settings().config_type(config_type).is_none()
    {
        let configured: Vec<&str> = builder
            .settings()
            .config_types
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        return Err(anyhow!(
            "Unknown config type '{}'. Configured types: [{}]",
            config_type,
            configured.join(", ")
        ));
    }

    let value = builder
        .resolve_value(&args.value, &args.component, &args.env, args.config_type.as_deref())
        .with_context(|| {
            format!(
                "Could not resolve '{}' for '{}[{}]'",
                args.value, args.component, args.env
            )
        })?;
    println!("{}", value);
    Ok(())
}
