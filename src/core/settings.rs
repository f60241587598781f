// src/core/settings.rs

//! The optional `fleetcfg.toml` at the config root.

use crate::constants::SETTINGS_FILENAME;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing TOML in '{path}': {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid settings in '{path}': {message}")]
    Invalid { path: String, message: String },
}

type SettingsResult<T> = Result<T, SettingsError>;

/// A configuration namespace and the file prefix its component files use.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigType {
    pub name: String,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl ConfigType {
    /// A config type whose files start with `file_prefix`.
    pub fn new(name: &str, file_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            file_prefix: Some(file_prefix.to_string()),
        }
    }

    /// File prefix of component files for this type; defaults to the type name.
    pub fn prefix(&self) -> &str {
        self.file_prefix.as_deref().unwrap_or(&self.name)
    }
}

/// Contents of the optional settings file at the config root.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    /// Configured types; the first one is the default.
    pub config_types: Vec<ConfigType>,
    /// Keys never taken from an override chain, on top of the built-in ones.
    pub non_overridable_keys: Vec<String>,
    /// Extra entries for the `system` pseudo-component.
    pub system_properties: BTreeMap<String, String>,
    /// Escapes resolved system/env values for Windows consumers.
    pub windows_paths: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_types: vec![
                ConfigType::new("app", "application"),
                ConfigType::new("deploy", "deploy"),
            ],
            non_overridable_keys: Vec::new(),
            system_properties: BTreeMap::new(),
            windows_paths: cfg!(windows),
        }
    }
}

impl Settings {
    /// Loads `<root>/fleetcfg.toml`, or defaults if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read, parsed, or lists
    /// no config types.
    pub fn load(root: &Path) -> SettingsResult<Self> {
        let path = root.join(SETTINGS_FILENAME);
        if !path.is_file() {
            log::debug!("No settings file at '{}'; using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let settings: Self = toml::from_str(&content).map_err(|e| SettingsError::TomlParse {
            path: path.display().to_string(),
            source: e,
        })?;
        if settings.config_types.is_empty() {
            return Err(SettingsError::Invalid {
                path: path.display().to_string(),
                message: "'config_types' must list at least one type".to_string(),
            });
        }
        log::debug!("Loaded settings from '{}': {:?}", path.display(), settings);
        Ok(settings)
    }

    /// Name of the default config type.
    pub fn default_config_type(&self) -> &str {
        self.config_types
            .first()
            .map_or("app", |t| t.name.as_str())
    }

    /// The config type called `name`.
    pub fn config_type(&self, name: &str) -> Option<&ConfigType> {
        self.config_types.iter().find(|t| t.name == name)
    }
}
