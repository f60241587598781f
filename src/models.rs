// src/models.rs

//! Runtime values and on-disk environment definitions.

use crate::constants::{HOME_KEY, TEMP_PROPERTY_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// --- RUNTIME MODELS ---
// Values flowing through suppliers, strategies and the resolver.

/// A deployable unit. Components referenced only by category are "type-only":
/// their name equals their type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Component {
    pub name: String,
    pub component_type: String,
}

impl Component {
    /// A component with an explicit name and type.
    pub fn new(name: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component_type: component_type.into(),
        }
    }

    /// A synthetic component identified purely by its type.
    pub fn by_type(component_type: impl Into<String>) -> Self {
        let component_type = component_type.into();
        Self {
            name: component_type.clone(),
            component_type,
        }
    }

    /// Parses a group entry: `"name"` or `"name:type"`.
    pub fn parse_entry(entry: &str) -> Self {
        match entry.split_once(':') {
            Some((name, component_type)) if !component_type.trim().is_empty() => {
                Self::new(name.trim(), component_type.trim())
            }
            _ => Self::by_type(entry.trim_end_matches(':').trim()),
        }
    }

    /// `true` when the name is the type itself.
    pub fn is_type_only(&self) -> bool {
        self.name == self.component_type
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_type_only() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.name, self.component_type)
        }
    }
}

/// A component paired with the environment it is being built for.
/// Used as the "root" of a resolution call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvComponent {
    pub component: Component,
    pub environment: String,
}

impl EnvComponent {
    /// Pairs `component` with `environment`.
    pub fn new(component: Component, environment: impl Into<String>) -> Self {
        Self {
            component,
            environment: environment.into(),
        }
    }
}

impl fmt::Display for EnvComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.component.name, self.environment)
    }
}

/// Where a property came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertySource {
    /// Declared in a config file of `component`.
    File {
        component: Component,
        path: PathBuf,
        line: Option<usize>,
    },
    /// Synthesized by a strategy (system properties, env vars, identity keys...).
    Special { component: Component, origin: String },
}

impl PropertySource {
    /// A value computed by a strategy rather than read from a file.
    pub fn special(component: Component, origin: impl Into<String>) -> Self {
        Self::Special {
            component,
            origin: origin.into(),
        }
    }

    /// The component that declared the property.
    pub fn component(&self) -> &Component {
        match self {
            Self::File { component, .. } | Self::Special { component, .. } => component,
        }
    }
}

impl fmt::Display for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File {
                path,
                line: Some(line),
                ..
            } => write!(f, "{}:{}", path.display(), line),
            Self::File { path, .. } => write!(f, "{}", path.display()),
            Self::Special { component, origin } => write!(f, "<{}> of '{}'", origin, component),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Invalid property declaration '{line}': expected 'key=value' or 'key:value'.")]
    MissingSeparator { line: String },
    #[error("Invalid property declaration '{line}': key is empty.")]
    EmptyKey { line: String },
}

/// An immutable key/value pair plus provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub key: String,
    pub value: String,
    /// The environment context under which the property was read.
    pub environment: String,
    /// Transient properties are resolvable but excluded from final output.
    pub temp: bool,
    pub source: PropertySource,
}

impl Property {
    /// A regular (non-transient) property.
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        environment: impl Into<String>,
        source: PropertySource,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            environment: environment.into(),
            temp: false,
            source,
        }
    }

    /// A transient property; never written to output.
    pub fn temp(
        key: impl Into<String>,
        value: impl Into<String>,
        environment: impl Into<String>,
        source: PropertySource,
    ) -> Self {
        Self {
            temp: true,
            ..Self::new(key, value, environment, source)
        }
    }

    /// Parses a `key=value` or `key:value` declaration. The first separator wins.
    /// A leading `#var ` marks the property as transient.
    ///
    /// # Errors
    /// Returns `PropertyError` when no separator is present or the key is blank.
    pub fn parse(
        line: &str,
        environment: impl Into<String>,
        source: PropertySource,
    ) -> Result<Self, PropertyError> {
        let (temp, body) = match line.strip_prefix(TEMP_PROPERTY_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let separator = body
            .find(['=', ':'])
            .ok_or_else(|| PropertyError::MissingSeparator {
                line: line.to_string(),
            })?;
        let key = body.get(..separator).unwrap_or_default().trim();
        let value = body.get(separator + 1..).unwrap_or_default().trim();
        if key.is_empty() {
            return Err(PropertyError::EmptyKey {
                line: line.to_string(),
            });
        }

        let mut property = Self::new(key, value, environment, source);
        property.temp = temp;
        Ok(property)
    }

    /// Returns a copy with a new value, keeping key and provenance.
    pub fn with_value(&self, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..self.clone()
        }
    }

    /// Prepares a value for a Windows-targeted build: the home directory becomes a
    /// forward-slash path, every other backslash is doubled.
    pub fn escape_on_windows(&self) -> Self {
        if self.key == HOME_KEY {
            return self.with_value(self.value.replace('\\', "/"));
        }
        let escaped = self.value.replace("\\\\", "\\").replace('\\', "\\\\");
        self.with_value(escaped)
    }

    /// The component that declared this property.
    pub fn component(&self) -> &Component {
        self.source.component()
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.key, self.value, self.source)
    }
}

/// Key-ordered raw properties of one component.
pub type PropertyMap = BTreeMap<String, Property>;

/// A named subset of components in an environment. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentGroup {
    pub name: String,
    pub ip: Option<String>,
    pub components: Vec<Component>,
    pub properties: BTreeMap<String, String>,
}

/// A fully merged environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    pub port_offset: Option<i64>,
    pub groups: Vec<ComponentGroup>,
    pub properties: BTreeMap<String, String>,
}

impl Environment {
    /// Finds a component by exact name, with its group and zero-based position.
    pub fn locate(&self, name: &str) -> Option<(&ComponentGroup, usize, &Component)> {
        self.groups.iter().find_map(|group| {
            group
                .components
                .iter()
                .position(|c| c.name == name)
                .and_then(|index| group.components.get(index).map(|c| (group, index, c)))
        })
    }

    /// The component called `name`, in any group.
    pub fn component_by_name(&self, name: &str) -> Option<&Component> {
        self.locate(name).map(|(_, _, component)| component)
    }

    /// Every component, group by group, in declaration order.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.groups.iter().flat_map(|g| g.components.iter())
    }
}

// --- DEFINITION MODELS ---
// On-disk shape of environment files (TOML or JSON).

/// A scalar accepted where the file format allows any primitive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IncludeDefinition {
    pub env: String,
    #[serde(default)]
    pub exclude_groups: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub append: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, ScalarValue>,
}

impl GroupDefinition {
    /// Applies an overriding group of the same name: `ip` if set, `components` if
    /// non-empty, then removes `exclude` and adds `append`.
    pub fn override_by(&mut self, other: &Self) {
        if other.ip.is_some() {
            self.ip.clone_from(&other.ip);
        }
        if !other.components.is_empty() {
            self.components.clone_from(&other.components);
        }
        let excluded: Vec<&str> = other.exclude.iter().map(|e| entry_name(e)).collect();
        self.components
            .retain(|entry| !excluded.contains(&entry_name(entry)));
        for appended in &other.append {
            if !self.components.contains(appended) {
                self.components.push(appended.clone());
            }
        }
        self.properties
            .extend(other.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// The component-name part of a `"name:type"` group entry.
fn entry_name(entry: &str) -> &str {
    entry.split_once(':').map_or(entry, |(name, _)| name).trim()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDefinition {
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub include: Option<IncludeDefinition>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port_offset: Option<i64>,
    #[serde(default)]
    pub properties: BTreeMap<String, ScalarValue>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
}

impl EnvironmentDefinition {
    /// Layers `self` over `base`. Groups with matching names are overridden in
    /// place; new groups are appended.
    pub fn merged_over(&self, mut base: Self) -> Self {
        if let Some(include) = &self.include {
            base.groups
                .retain(|g| !include.exclude_groups.contains(&g.name));
        }
        for group in &self.groups {
            match base.groups.iter_mut().find(|g| g.name == group.name) {
                Some(existing) => existing.override_by(group),
                None => base.groups.push(group.clone()),
            }
        }
        if self.ip.is_some() {
            base.ip.clone_from(&self.ip);
        }
        if self.port_offset.is_some() {
            base.port_offset = self.port_offset;
        }
        base.properties
            .extend(self.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        base.aliases.clone_from(&self.aliases);
        base.include = None;
        base
    }

    /// Converts the merged definition into a runtime `Environment`.
    /// Groups without an ip inherit the environment-level one.
    pub fn into_environment(self, name: impl Into<String>) -> Environment {
        let default_ip = self.ip;
        let groups = self
            .groups
            .into_iter()
            .map(|g| ComponentGroup {
                name: g.name,
                ip: g.ip.or_else(|| default_ip.clone()),
                components: g
                    .components
                    .iter()
                    .map(|entry| Component::parse_entry(entry))
                    .collect(),
                properties: stringify(g.properties),
            })
            .collect();
        Environment {
            name: name.into(),
            port_offset: self.port_offset,
            groups,
            properties: stringify(self.properties),
        }
    }
}

fn stringify(map: BTreeMap<String, ScalarValue>) -> BTreeMap<String, String> {
    map.into_iter().map(|(k, v)| (k, v.to_string())).collect()
}
