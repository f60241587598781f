//! # Property Suppliers
//!
//! Raw (unresolved) properties of a component, merged from layered sources:
//! base → multi-environment → single-environment, with includes expanded
//! before the including layer's own keys. Later keys overwrite earlier ones.
//!
//! On disk, component `<type>` keeps its files under `components/**/<type>/`:
//!
//! ```text
//! application.toml            base
//! application.dev.qa.toml     applies to dev and qa
//! application.dev.toml        applies to dev only
//! ```

use crate::constants::{INCLUDE_KEY, VARS_TABLE};
use crate::core::cache::OnceCache;
use crate::core::settings::ConfigType;
use crate::models::{Component, Property, PropertyError, PropertyMap, PropertySource};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use walkdir::WalkDir;

lazy_static! {
    // <prefix>[.<env>]*.toml
    static ref CONFIG_FILE_RE: Regex =
        Regex::new(r"^([A-Za-z0-9_-]+)((?:\.[A-Za-z0-9_-]+)*)\.toml$")
            .expect("config file pattern is valid");
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupplierError {
    #[error("Failed to read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Error parsing TOML in '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("Invalid '{key}' entry in '{path}': {message}")]
    InvalidInclude {
        path: String,
        key: String,
        message: String,
    },
    #[error("Config type '{config_type}' is not configured.")]
    UnknownConfigType { config_type: String },
}

/// Result alias of this module.
pub type SupplierResult<T> = Result<T, SupplierError>;

/// Provides the raw property map of a component for one environment and config type.
pub trait PropertySupplier: Send + Sync + Debug {
    /// # Errors
    /// Returns an error if a source cannot be read or parsed.
    fn properties(
        &self,
        component: &Component,
        environment: &str,
        config_type: &str,
    ) -> SupplierResult<Arc<PropertyMap>>;
}

// --- Layer assembly ---

/// A component type referenced by `_include`, optionally pinned to an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IncludeRef {
    component_type: String,
    environment: Option<String>,
}

impl IncludeRef {
    /// Parses `"commons"` or `"kafka[prod]"`.
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        let (component_type, environment) = match entry.strip_suffix(']') {
            Some(head) => {
                let (component_type, environment) = head.split_once('[')?;
                (component_type, Some(environment.to_string()))
            }
            None => (entry, None),
        };
        if component_type.is_empty() || environment.as_deref() == Some("") {
            return None;
        }
        Some(Self {
            component_type: component_type.to_string(),
            environment,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
    temp: bool,
}

/// One source unit: a file, or a batch of in-memory declarations.
#[derive(Debug, Clone, Default)]
struct Layer {
    origin: Option<PathBuf>,
    includes: Vec<IncludeRef>,
    entries: Vec<Entry>,
}

fn assemble<F>(component: &Component, environment: &str, mut load: F) -> SupplierResult<PropertyMap>
where
    F: FnMut(&str, &str) -> SupplierResult<Vec<Layer>>,
{
    let mut map = PropertyMap::new();
    let mut processed = HashSet::new();
    collect(component, environment, &mut load, &mut processed, &mut map)?;
    Ok(map)
}

fn collect<F>(
    component: &Component,
    environment: &str,
    load: &mut F,
    processed: &mut HashSet<(String, String)>,
    map: &mut PropertyMap,
) -> SupplierResult<()>
where
    F: FnMut(&str, &str) -> SupplierResult<Vec<Layer>>,
{
    if !processed.insert((component.component_type.clone(), environment.to_string())) {
        log::trace!(
            "Skipping repeated include of '{}[{}]'",
            component.component_type,
            environment
        );
        return Ok(());
    }

    for layer in load(&component.component_type, environment)? {
        for include in &layer.includes {
            let include_env = include.environment.as_deref().unwrap_or(environment);
            let included = Component::by_type(include.component_type.as_str());
            collect(&included, include_env, load, processed, map)?;
        }
        for entry in layer.entries {
            let source = match &layer.origin {
                Some(path) => PropertySource::File {
                    component: component.clone(),
                    path: path.clone(),
                    line: None,
                },
                None => PropertySource::special(component.clone(), "memory"),
            };
            let property = if entry.temp {
                Property::temp(entry.key.clone(), entry.value, environment, source)
            } else {
                Property::new(entry.key.clone(), entry.value, environment, source)
            };
            map.insert(entry.key, property);
        }
    }
    Ok(())
}

// --- In-memory supplier ---

/// Properties declared programmatically, keyed by config type and component type.
#[derive(Debug, Default)]
pub struct InMemoryPropertySupplier {
    layers: BTreeMap<(String, String), Vec<(Option<String>, Layer)>>,
}

impl InMemoryPropertySupplier {
    /// An empty supplier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key=value` declarations (`#var ` marks transient ones) for a
    /// component type, either for every environment or for one.
    ///
    /// # Errors
    /// Returns `PropertyError` for a malformed declaration.
    pub fn declare(
        mut self,
        config_type: &str,
        component_type: &str,
        environment: Option<&str>,
        declarations: &[&str],
    ) -> Result<Self, PropertyError> {
        let source = PropertySource::special(Component::by_type(component_type), "memory");
        let entries = declarations
            .iter()
            .map(|line| {
                Property::parse(line, "", source.clone()).map(|p| Entry {
                    key: p.key,
                    value: p.value,
                    temp: p.temp,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.push(
            config_type,
            component_type,
            environment,
            Layer {
                entries,
                ..Layer::default()
            },
        );
        Ok(self)
    }

    /// Makes `component_type` include another type (`"commons"` or `"kafka[prod]"`).
    /// Includes always load before the type's own declarations.
    pub fn include(mut self, config_type: &str, component_type: &str, included: &str) -> Self {
        let layer = Layer {
            includes: IncludeRef::parse(included).into_iter().collect(),
            ..Layer::default()
        };
        self.layers_mut(config_type, component_type).insert(0, (None, layer));
        self
    }

    fn push(&mut self, config_type: &str, component_type: &str, environment: Option<&str>, layer: Layer) {
        self.layers_mut(config_type, component_type)
            .push((environment.map(str::to_string), layer));
    }

    fn layers_mut(&mut self, config_type: &str, component_type: &str) -> &mut Vec<(Option<String>, Layer)> {
        self.layers
            .entry((config_type.to_string(), component_type.to_string()))
            .or_default()
    }

    fn layers_for(&self, config_type: &str, component_type: &str, environment: &str) -> Vec<Layer> {
        let Some(layers) = self
            .layers
            .get(&(config_type.to_string(), component_type.to_string()))
        else {
            return Vec::new();
        };
        let shared = layers.iter().filter(|(env, _)| env.is_none());
        let specific = layers
            .iter()
            .filter(|(env, _)| env.as_deref() == Some(environment));
        shared.chain(specific).map(|(_, layer)| layer.clone()).collect()
    }
}

impl PropertySupplier for InMemoryPropertySupplier {
    fn properties(
        &self,
        component: &Component,
        environment: &str,
        config_type: &str,
    ) -> SupplierResult<Arc<PropertyMap>> {
        assemble(component, environment, |component_type, env| {
            Ok(self.layers_for(config_type, component_type, env))
        })
        .map(Arc::new)
    }
}

// --- Component tree ---

/// Index of component-type directories under `components/`.
#[derive(Debug)]
pub struct ComponentTree {
    root: PathBuf,
    index: OnceLock<BTreeMap<String, PathBuf>>,
}

impl ComponentTree {
    /// Indexes directories under `root` on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: OnceLock::new(),
        }
    }

    /// The directory holding files of `component_type`. Falls back to
    /// `<components>/<type>` when no such directory exists.
    pub fn config_dir(&self, component_type: &str) -> PathBuf {
        self.index()
            .get(component_type)
            .cloned()
            .unwrap_or_else(|| self.root.join(component_type))
    }

    fn index(&self) -> &BTreeMap<String, PathBuf> {
        self.index.get_or_init(|| {
            let mut index: BTreeMap<String, PathBuf> = BTreeMap::new();
            let mut dirs: Vec<PathBuf> = WalkDir::new(&self.root)
                .min_depth(1)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_dir())
                .map(|e| e.into_path())
                .collect();
            dirs.sort();
            for dir in dirs {
                let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                    continue;
                };
                if let Some(existing) = index.get(&name) {
                    log::warn!(
                        "Component directory '{}' shadows '{}'; keeping the first.",
                        dir.display(),
                        existing.display()
                    );
                    continue;
                }
                index.insert(name, dir);
            }
            log::debug!("Indexed {} component directories under '{}'", index.len(), self.root.display());
            index
        })
    }
}

// --- File supplier ---

type SupplyKey = (Component, String, String);

/// Reads TOML component files from a [`ComponentTree`].
#[derive(Debug)]
pub struct FilePropertySupplier {
    tree: Arc<ComponentTree>,
    config_types: Vec<ConfigType>,
    cache: OnceCache<SupplyKey, PropertyMap, SupplierError>,
}

impl FilePropertySupplier {
    /// Reads files for the given config types from `tree`.
    pub fn new(tree: Arc<ComponentTree>, config_types: Vec<ConfigType>) -> Self {
        Self {
            tree,
            config_types,
            cache: OnceCache::new("properties"),
        }
    }

    /// Files of `component_type` that apply to `environment`, in layering order.
    fn file_layers(&self, component_type: &str, environment: &str, prefix: &str) -> SupplierResult<Vec<Layer>> {
        let dir = self.tree.config_dir(component_type);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let read_dir = fs::read_dir(&dir).map_err(|e| SupplierError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        // (rank, file name, path): base = 0, multi-env = 1, single-env = 2
        let mut files: Vec<(u8, String, PathBuf)> = Vec::new();
        for entry in read_dir.filter_map(Result::ok) {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let Some(rank) = layer_rank(&file_name, prefix, environment) else {
                continue;
            };
            files.push((rank, file_name, path));
        }
        files.sort();

        files
            .into_iter()
            .map(|(_, _, path)| parse_layer(&path))
            .collect()
    }
}

/// Where a file sits in the layering order, or `None` if it does not apply.
fn layer_rank(file_name: &str, prefix: &str, environment: &str) -> Option<u8> {
    let captures = CONFIG_FILE_RE.captures(file_name)?;
    if captures.get(1)?.as_str() != prefix {
        return None;
    }
    let environments: Vec<&str> = captures
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split('.')
        .filter(|s| !s.is_empty())
        .collect();
    match environments.as_slice() {
        [] => Some(0),
        [single] if *single == environment => Some(2),
        [_] => None,
        many if many.contains(&environment) => Some(1),
        _ => None,
    }
}

fn parse_layer(path: &Path) -> SupplierResult<Layer> {
    let content = fs::read_to_string(path).map_err(|e| SupplierError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let table: toml::Table = toml::from_str(&content).map_err(|e| SupplierError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut layer = Layer {
        origin: Some(path.to_path_buf()),
        ..Layer::default()
    };
    for (key, value) in table {
        match (key.as_str(), value) {
            (INCLUDE_KEY, value) => layer.includes = parse_includes(path, value)?,
            (VARS_TABLE, toml::Value::Table(vars)) => {
                for (var, value) in vars {
                    flatten(&var, value, true, &mut layer.entries);
                }
            }
            (_, value) => flatten(&key, value, false, &mut layer.entries),
        }
    }
    log::trace!(
        "Parsed '{}': {} entries, {} includes",
        path.display(),
        layer.entries.len(),
        layer.includes.len()
    );
    Ok(layer)
}

fn parse_includes(path: &Path, value: toml::Value) -> SupplierResult<Vec<IncludeRef>> {
    let invalid = |message: &str| SupplierError::InvalidInclude {
        path: path.display().to_string(),
        key: INCLUDE_KEY.to_string(),
        message: message.to_string(),
    };
    let items = match value {
        toml::Value::String(s) => vec![s],
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s),
                _ => Err(invalid("expected a list of strings")),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(invalid("expected a string or a list of strings")),
    };
    items
        .iter()
        .map(|item| IncludeRef::parse(item).ok_or_else(|| invalid(&format!("malformed entry '{}'", item))))
        .collect()
}

/// Flattens nested tables into dotted keys; arrays of scalars become comma-joined.
fn flatten(key: &str, value: toml::Value, temp: bool, out: &mut Vec<Entry>) {
    match value {
        toml::Value::Table(table) => {
            for (child, value) in table {
                flatten(&format!("{}.{}", key, child), value, temp, out);
            }
        }
        toml::Value::Array(items) if items.iter().all(is_scalar) => {
            let joined = items.iter().map(scalar_to_string).collect::<Vec<_>>().join(",");
            out.push(Entry {
                key: key.to_string(),
                value: joined,
                temp,
            });
        }
        toml::Value::Array(items) => {
            for (index, item) in items.into_iter().enumerate() {
                flatten(&format!("{}.{}", key, index), item, temp, out);
            }
        }
        scalar => out.push(Entry {
            key: key.to_string(),
            value: scalar_to_string(&scalar),
            temp,
        }),
    }
}

fn is_scalar(value: &toml::Value) -> bool {
    !matches!(value, toml::Value::Table(_) | toml::Value::Array(_))
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Datetime(d) => d.to_string(),
        other => other.to_string(),
    }
}

impl PropertySupplier for FilePropertySupplier {
    fn properties(
        &self,
        component: &Component,
        environment: &str,
        config_type: &str,
    ) -> SupplierResult<Arc<PropertyMap>> {
        let key = (component.clone(), environment.to_string(), config_type.to_string());
        self.cache.get_or_load(&key, || {
            let prefix = self
                .config_types
                .iter()
                .find(|t| t.name == config_type)
                .map(|t| t.prefix().to_string())
                .ok_or_else(|| SupplierError::UnknownConfigType {
                    config_type: config_type.to_string(),
                })?;
            assemble(component, environment, |component_type, env| {
                self.file_layers(component_type, env, &prefix)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn app_types() -> Vec<ConfigType> {
        vec![ConfigType::new("app", "application")]
    }

    fn value<'a>(map: &'a PropertyMap, key: &str) -> &'a str {
        map.get(key).map(|p| p.value.as_str()).unwrap()
    }

    #[test]
    fn test_layer_rank() {
        assert_eq!(layer_rank("application.toml", "application", "dev"), Some(0));
        assert_eq!(layer_rank("application.dev.qa.toml", "application", "qa"), Some(1));
        assert_eq!(layer_rank("application.dev.toml", "application", "dev"), Some(2));
        assert_eq!(layer_rank("application.prod.toml", "application", "dev"), None);
        assert_eq!(layer_rank("application.prod.qa.toml", "application", "dev"), None);
        assert_eq!(layer_rank("deploy.toml", "application", "dev"), None);
        assert_eq!(layer_rank("application.yaml", "application", "dev"), None);
    }

    #[test]
    fn test_include_ref_parse() {
        assert_eq!(
            IncludeRef::parse("kafka[prod]"),
            Some(IncludeRef {
                component_type: "kafka".into(),
                environment: Some("prod".into())
            })
        );
        assert_eq!(IncludeRef::parse("commons").unwrap().environment, None);
        assert_eq!(IncludeRef::parse("kafka[]"), None);
        assert_eq!(IncludeRef::parse("[prod]"), None);
    }

    #[test]
    fn test_file_layering_and_includes() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let components = dir.path().join("components");
        let api = components.join("services").join("api");
        let commons = components.join("commons");
        fs::create_dir_all(&api).unwrap();
        fs::create_dir_all(&commons).unwrap();

        fs::write(
            commons.join("application.toml"),
            r#"
_include = ["api"]
log.level = "info"
shared = "from-commons"
"#,
        )
        .unwrap();
        fs::write(
            api.join("application.toml"),
            r#"
_include = "commons"
port = 8080
hosts = ["a", "b"]
shared = "from-api"

[db]
url = "jdbc:base"
pool = { size = 4 }

[_vars]
base = "/opt"
"#,
        )
        .unwrap();
        fs::write(api.join("application.dev.qa.toml"), "port = 9090\n").unwrap();
        fs::write(api.join("application.dev.toml"), "db.url = \"jdbc:dev\"\n").unwrap();
        fs::write(api.join("application.prod.toml"), "port = 1\n").unwrap();
        fs::write(api.join("deploy.toml"), "ignored = true\n").unwrap();

        let tree = Arc::new(ComponentTree::new(&components));
        let supplier = FilePropertySupplier::new(tree.clone(), app_types());
        let component = Component::new("api-1", "api");

        // --- Execute ---
        let map = supplier.properties(&component, "dev", "app").unwrap();

        // --- Assert ---
        assert_eq!(value(&map, "port"), "9090");
        assert_eq!(value(&map, "hosts"), "a,b");
        assert_eq!(value(&map, "db.url"), "jdbc:dev");
        assert_eq!(value(&map, "db.pool.size"), "4");
        assert_eq!(value(&map, "log.level"), "info");
        assert_eq!(value(&map, "shared"), "from-api");
        assert!(map.get("ignored").is_none());

        let base = map.get("base").unwrap();
        assert!(base.temp);
        assert_eq!(base.component(), &component);
        assert_eq!(map.get("log.level").unwrap().component(), &Component::by_type("commons"));
        assert_eq!(map.get("port").unwrap().environment, "dev");

        assert_eq!(tree.config_dir("api"), api);
        assert_eq!(tree.config_dir("unknown"), components.join("unknown"));
    }

    #[test]
    fn test_file_supplier_errors() {
        let dir = tempdir().unwrap();
        let api = dir.path().join("api");
        fs::create_dir_all(&api).unwrap();
        fs::write(api.join("application.toml"), "_include = [1]\n").unwrap();
        let supplier = FilePropertySupplier::new(Arc::new(ComponentTree::new(dir.path())), app_types());
        let component = Component::by_type("api");

        assert!(matches!(
            supplier.properties(&component, "dev", "app"),
            Err(SupplierError::InvalidInclude { .. })
        ));
        assert!(matches!(
            supplier.properties(&component, "dev", "other"),
            Err(SupplierError::UnknownConfigType { .. })
        ));
        // A type without a directory simply has no properties.
        let empty = supplier.properties(&Component::by_type("ghost"), "dev", "app").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_in_memory_layers_and_includes() {
        let supplier = InMemoryPropertySupplier::new()
            .declare("app", "commons", None, &["opts=${this@x} ${this@y}", "y=2"])
            .unwrap()
            .declare("app", "web", None, &["x=1", "#var tmp=t"])
            .unwrap()
            .declare("app", "web", Some("prod"), &["x=10"])
            .unwrap()
            .include("app", "web", "commons");

        let dev = supplier.properties(&Component::by_type("web"), "dev", "app").unwrap();
        assert_eq!(value(&dev, "x"), "1");
        assert_eq!(value(&dev, "y"), "2");
        assert!(dev.get("tmp").unwrap().temp);
        assert_eq!(dev.get("opts").unwrap().component().name, "commons");

        let prod = supplier.properties(&Component::by_type("web"), "prod", "app").unwrap();
        assert_eq!(value(&prod, "x"), "10");

        let other = supplier.properties(&Component::by_type("web"), "dev", "deploy").unwrap();
        assert!(other.is_empty());
    }
}
