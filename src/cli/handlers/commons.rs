// src/cli/handlers/commons.rs

//! Shared setup used by every handler.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::{
    cli::GlobalArgs,
    constants::SYSTEM_COMPONENT,
    core::{builder::ConfigBuilder, paths},
    models::{Component, Property, PropertySource},
};

/// Parses the repeatable `-D key=value` flags into `system` overrides.
pub fn parse_defines(defines: &[String]) -> Result<BTreeMap<String, String>> {
    let source = PropertySource::special(Component::by_type(SYSTEM_COMPONENT), "command line");
    defines
        .iter()
        .map(|define| {
            let property = Property::parse(define, "", source.clone())
                .with_context(|| format!("Invalid -D flag '{}'", define))?;
            Ok((property.key, property.value))
        })
        .collect()
}

/// Opens the config root named by the global flags.
pub fn open_builder(global: &GlobalArgs) -> Result<ConfigBuilder> {
    let root = paths::expand(&global.root)?;
    let destination = global
        .destination
        .as_deref()
        .map(paths::expand)
        .transpose()?;
    let overrides = parse_defines(&global.defines)?;

    ConfigBuilder::open(&root, destination.as_deref(), overrides)
        .with_context(|| format!("Could not open config root '{}'", root.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defines_accepts_both_separators() {
        let defines = vec!["deploy.user=ops".to_string(), "region: eu-west".to_string()];
        let parsed = parse_defines(&defines).unwrap();
        assert_eq!(parsed.get("deploy.user").map(String::as_str), Some("ops"));
        assert_eq!(parsed.get("region").map(String::as_str), Some("eu-west"));
    }

    #[test]
    fn test_parse_defines_rejects_missing_separator() {
        let err = parse_defines(&["novalue".to_string()]).unwrap_err();
        assert!(err.to_string().contains("novalue"));
    }
}
