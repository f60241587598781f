//! # Environment Repository
//!
//! Loads environment definitions, follows `include` chains, verifies component
//! uniqueness and answers "which component does this reference mean here".
//! Each environment is merged at most once per repository, even when several
//! threads ask for it at the same time.

use crate::core::cache::OnceCache;
use crate::models::{Component, Environment, EnvironmentDefinition};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("Environment '{name}' not found. Available environments: [{}]", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },
    #[error("Failed to read environment file '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Error parsing environment file '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("Environment '{name}' is defined twice: '{first}' and '{second}'.")]
    DuplicateDefinition {
        name: String,
        first: String,
        second: String,
    },
    #[error("Cyclic environment include detected: {}", .chain.join(" -> "))]
    IncludeCycle { chain: Vec<String> },
    #[error("Component '{component}' is declared more than once in environment '{environment}'.")]
    DuplicateComponent {
        environment: String,
        component: String,
    },
}

/// Result alias of this module.
pub type EnvironmentResult<T> = Result<T, EnvironmentError>;

/// Supplies raw (unmerged) environment definitions by name.
pub trait EnvironmentSource: Send + Sync + Debug {
    /// Every loadable name, aliases included, sorted.
    ///
    /// # Errors
    /// Returns an error if the underlying storage cannot be listed.
    fn names(&self) -> EnvironmentResult<Vec<String>>;

    /// The raw definition registered under `name`.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown names, or a read/parse error.
    fn definition(&self, name: &str) -> EnvironmentResult<EnvironmentDefinition>;
}

/// Name -> (origin, parsed definition). A file that fails to parse is kept
/// under its file stem so only lookups of that name report the failure.
type Index = BTreeMap<String, (String, EnvironmentResult<EnvironmentDefinition>)>;

/// Registers `definition` under its own name and every alias.
fn register(
    index: &mut Index,
    name: &str,
    origin: String,
    definition: EnvironmentResult<EnvironmentDefinition>,
) -> EnvironmentResult<()> {
    let aliases = definition
        .as_ref()
        .map(|d| d.aliases.clone())
        .unwrap_or_default();
    for registered in std::iter::once(name.to_string()).chain(aliases) {
        if let Some((first, _)) = index.get(&registered) {
            return Err(EnvironmentError::DuplicateDefinition {
                name: registered,
                first: first.clone(),
                second: origin,
            });
        }
        index.insert(registered, (origin.clone(), definition.clone()));
    }
    Ok(())
}

fn lookup(index: &Index, name: &str) -> EnvironmentResult<EnvironmentDefinition> {
    match index.get(name) {
        Some((_, definition)) => definition.clone(),
        None => Err(EnvironmentError::NotFound {
            name: name.to_string(),
            available: index.keys().cloned().collect(),
        }),
    }
}

// --- File-backed source ---

/// Reads `<dir>/**/<name>.toml` and `<dir>/**/<name>.json`.
///
/// The directory is indexed once, on first use.
#[derive(Debug)]
pub struct FileEnvironmentSource {
    dir: PathBuf,
    index: OnceLock<EnvironmentResult<Index>>,
}

impl FileEnvironmentSource {
    /// Creates a source over `dir`; nothing is read until the first lookup.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index: OnceLock::new(),
        }
    }

    fn index(&self) -> EnvironmentResult<&Index> {
        self.index
            .get_or_init(|| self.build_index())
            .as_ref()
            .map_err(Clone::clone)
    }

    fn build_index(&self) -> EnvironmentResult<Index> {
        let mut index = Index::new();
        if !self.dir.is_dir() {
            log::warn!(
                "Environment directory '{}' does not exist.",
                self.dir.display()
            );
            return Ok(index);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| matches!(extension(p), Some("toml" | "json")))
            .collect();
        files.sort();

        for path in files {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let definition = parse_definition(&path);
            if let Err(e) = &definition {
                log::warn!("Environment '{}' is unusable: {}", name, e);
            }
            log::trace!("Indexed environment '{}' from '{}'", name, path.display());
            register(&mut index, name, path.display().to_string(), definition)?;
        }
        Ok(index)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// Parses one environment file, choosing the format by extension.
fn parse_definition(path: &Path) -> EnvironmentResult<EnvironmentDefinition> {
    let content = fs::read_to_string(path).map_err(|e| EnvironmentError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let parsed = if extension(path) == Some("json") {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        toml::from_str(&content).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| EnvironmentError::Parse {
        path: path.display().to_string(),
        message,
    })
}

impl EnvironmentSource for FileEnvironmentSource {
    fn names(&self) -> EnvironmentResult<Vec<String>> {
        Ok(self.index()?.keys().cloned().collect())
    }

    fn definition(&self, name: &str) -> EnvironmentResult<EnvironmentDefinition> {
        lookup(self.index()?, name)
    }
}

// --- In-memory source ---

/// Definitions held in memory; used by tests and embedding callers.
#[derive(Debug, Default)]
pub struct InMemoryEnvironmentSource {
    index: Index,
}

impl InMemoryEnvironmentSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition under `name` (and its aliases).
    ///
    /// # Errors
    /// Returns `DuplicateDefinition` if a name or alias is already taken.
    pub fn with(mut self, name: &str, definition: EnvironmentDefinition) -> EnvironmentResult<Self> {
        register(&mut self.index, name, format!("<memory:{}>", name), Ok(definition))?;
        Ok(self)
    }
}

impl EnvironmentSource for InMemoryEnvironmentSource {
    fn names(&self) -> EnvironmentResult<Vec<String>> {
        Ok(self.index.keys().cloned().collect())
    }

    fn definition(&self, name: &str) -> EnvironmentResult<EnvironmentDefinition> {
        lookup(&self.index, name)
    }
}

// --- Repository ---

/// Merged, verified and cached environments.
#[derive(Debug)]
pub struct EnvironmentRepository {
    source: Box<dyn EnvironmentSource>,
    cache: OnceCache<String, Environment, EnvironmentError>,
}

impl EnvironmentRepository {
    /// Wraps `source` with an empty cache.
    pub fn new(source: impl EnvironmentSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cache: OnceCache::new("environment"),
        }
    }

    /// Returns the merged environment called `name`.
    ///
    /// # Errors
    /// `NotFound` (listing available names), include cycles, duplicate
    /// components, or read/parse failures.
    pub fn get_by_name(&self, name: &str) -> EnvironmentResult<Arc<Environment>> {
        self.cache
            .get_or_load(&name.to_string(), || self.load(name))
    }

    /// Every loadable environment name.
    ///
    /// # Errors
    /// Returns an error if the source cannot be listed.
    pub fn environment_names(&self) -> EnvironmentResult<Vec<String>> {
        self.source.names()
    }

    /// Resolves a placeholder's component reference within `environment`.
    ///
    /// An exact component name wins; otherwise (including when the environment
    /// does not exist) the reference is treated as a component type.
    ///
    /// # Errors
    /// Propagates environment failures other than `NotFound`.
    pub fn find_component(&self, name_or_type: &str, environment: &str) -> EnvironmentResult<Component> {
        match self.get_by_name(environment) {
            Ok(env) => Ok(env
                .component_by_name(name_or_type)
                .cloned()
                .unwrap_or_else(|| Component::by_type(name_or_type))),
            Err(EnvironmentError::NotFound { .. }) => {
                log::trace!(
                    "Environment '{}' not found; treating '{}' as a component type",
                    environment,
                    name_or_type
                );
                Ok(Component::by_type(name_or_type))
            }
            Err(e) => Err(e),
        }
    }

    fn load(&self, name: &str) -> EnvironmentResult<Environment> {
        let mut chain = Vec::new();
        let definition = self.merged_definition(name, &mut chain)?;
        let environment = definition.into_environment(name);
        verify_unique(&environment)?;
        log::debug!(
            "Loaded environment '{}' ({} groups, {} components)",
            name,
            environment.groups.len(),
            environment.components().count()
        );
        Ok(environment)
    }

    /// Follows the include chain of `name`, base first.
    fn merged_definition(
        &self,
        name: &str,
        chain: &mut Vec<String>,
    ) -> EnvironmentResult<EnvironmentDefinition> {
        if chain.iter().any(|n| n == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            return Err(EnvironmentError::IncludeCycle { chain: cycle });
        }
        chain.push(name.to_string());

        let definition = self.source.definition(name)?;
        match &definition.include {
            Some(include) => {
                let base = self.merged_definition(&include.env, chain)?;
                Ok(definition.merged_over(base))
            }
            None => Ok(definition),
        }
    }
}

fn verify_unique(environment: &Environment) -> EnvironmentResult<()> {
    let mut seen = HashSet::new();
    for component in environment.components() {
        if !seen.insert(component.name.as_str()) {
            return Err(EnvironmentError::DuplicateComponent {
                environment: environment.name.clone(),
                component: component.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupDefinition, IncludeDefinition};
    use std::fs;
    use tempfile::tempdir;

    fn group(name: &str, components: &[&str]) -> GroupDefinition {
        GroupDefinition {
            name: name.into(),
            components: components.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn include(env: &str) -> Option<IncludeDefinition> {
        Some(IncludeDefinition {
            env: env.into(),
            exclude_groups: vec![],
        })
    }

    #[test]
    fn test_include_merges_groups() {
        // --- Setup ---
        let base = EnvironmentDefinition {
            ip: Some("10.0.0.1".into()),
            groups: vec![group("backend", &["api", "worker"]), group("legacy", &["old"])],
            ..Default::default()
        };
        let dev = EnvironmentDefinition {
            include: Some(IncludeDefinition {
                env: "base".into(),
                exclude_groups: vec!["legacy".into()],
            }),
            groups: vec![
                GroupDefinition {
                    name: "backend".into(),
                    exclude: vec!["worker".into()],
                    append: vec!["cron".into()],
                    ..Default::default()
                },
                group("edge", &["proxy"]),
            ],
            ..Default::default()
        };
        let source = InMemoryEnvironmentSource::new()
            .with("base", base)
            .unwrap()
            .with("dev", dev)
            .unwrap();
        let repo = EnvironmentRepository::new(source);

        // --- Execute ---
        let env = repo.get_by_name("dev").unwrap();

        // --- Assert ---
        let names: Vec<_> = env.components().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api", "cron", "proxy"]);
        assert_eq!(env.groups.len(), 2);
        assert!(env.groups.iter().all(|g| g.ip.as_deref() == Some("10.0.0.1")));
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let source = InMemoryEnvironmentSource::new()
            .with("a", EnvironmentDefinition { include: include("b"), ..Default::default() })
            .unwrap()
            .with("b", EnvironmentDefinition { include: include("a"), ..Default::default() })
            .unwrap();
        let repo = EnvironmentRepository::new(source);

        let err = repo.get_by_name("a").unwrap_err();
        assert_eq!(
            err,
            EnvironmentError::IncludeCycle {
                chain: vec!["a".into(), "b".into(), "a".into()]
            }
        );
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_duplicate_component_is_rejected() {
        let source = InMemoryEnvironmentSource::new()
            .with(
                "dev",
                EnvironmentDefinition {
                    groups: vec![group("g1", &["api"]), group("g2", &["api:other"])],
                    ..Default::default()
                },
            )
            .unwrap();
        let repo = EnvironmentRepository::new(source);
        assert!(matches!(
            repo.get_by_name("dev"),
            Err(EnvironmentError::DuplicateComponent { component, .. }) if component == "api"
        ));
    }

    #[test]
    fn test_not_found_lists_available_names() {
        let source = InMemoryEnvironmentSource::new()
            .with("dev", EnvironmentDefinition::default())
            .unwrap();
        let repo = EnvironmentRepository::new(source);
        let err = repo.get_by_name("prod").unwrap_err();
        assert_eq!(
            err,
            EnvironmentError::NotFound {
                name: "prod".into(),
                available: vec!["dev".into()]
            }
        );
    }

    #[test]
    fn test_find_component_falls_back_to_type() {
        let source = InMemoryEnvironmentSource::new()
            .with(
                "dev",
                EnvironmentDefinition {
                    groups: vec![group("g", &["replica:postgres"])],
                    ..Default::default()
                },
            )
            .unwrap();
        let repo = EnvironmentRepository::new(source);

        assert_eq!(
            repo.find_component("replica", "dev").unwrap(),
            Component::new("replica", "postgres")
        );
        assert_eq!(repo.find_component("redis", "dev").unwrap(), Component::by_type("redis"));
        assert_eq!(
            repo.find_component("replica", "missing-env").unwrap(),
            Component::by_type("replica")
        );
    }

    #[test]
    fn test_file_source_with_aliases_and_json() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let envs = dir.path().join("envs");
        fs::create_dir_all(envs.join("nested")).unwrap();
        fs::write(
            envs.join("dev.toml"),
            r#"
aliases = ["dev2"]
port_offset = 100

[properties]
domain = "dev.local"
replicas = 2

[[groups]]
name = "backend"
ip = "10.0.0.2"
components = ["api", "worker"]
"#,
        )
        .unwrap();
        fs::write(
            envs.join("nested").join("qa.json"),
            r#"{ "include": { "env": "dev" }, "groups": [ { "name": "backend", "append": ["qa-tools"] } ] }"#,
        )
        .unwrap();
        let repo = EnvironmentRepository::new(FileEnvironmentSource::new(&envs));

        // --- Execute & Assert ---
        assert_eq!(repo.environment_names().unwrap(), vec!["dev", "dev2", "qa"]);

        let alias = repo.get_by_name("dev2").unwrap();
        assert_eq!(alias.name, "dev2");
        assert_eq!(alias.port_offset, Some(100));
        assert_eq!(alias.properties.get("replicas").map(String::as_str), Some("2"));

        let qa = repo.get_by_name("qa").unwrap();
        let names: Vec<_> = qa.components().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api", "worker", "qa-tools"]);
        assert_eq!(qa.properties.get("domain").map(String::as_str), Some("dev.local"));
    }

    #[test]
    fn test_file_source_duplicate_names() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("dev.toml"), "").unwrap();
        fs::write(dir.path().join("a").join("dev.toml"), "").unwrap();
        let repo = EnvironmentRepository::new(FileEnvironmentSource::new(dir.path()));
        assert!(matches!(
            repo.get_by_name("dev"),
            Err(EnvironmentError::DuplicateDefinition { .. })
        ));
    }

    #[test]
    fn test_file_source_parse_error_is_scoped_to_its_environment() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.toml"), "groups = 3").unwrap();
        fs::write(
            dir.path().join("dev.toml"),
            "[[groups]]\nname = \"g\"\ncomponents = [\"api\"]\n",
        )
        .unwrap();
        let repo = EnvironmentRepository::new(FileEnvironmentSource::new(dir.path()));

        assert_eq!(repo.environment_names().unwrap(), vec!["bad", "dev"]);
        assert!(matches!(
            repo.get_by_name("bad"),
            Err(EnvironmentError::Parse { .. })
        ));
        assert!(repo.get_by_name("dev").is_ok());
        assert_eq!(
            repo.find_component("api", "dev").unwrap(),
            Component::by_type("api")
        );
        assert!(matches!(
            repo.find_component("api", "bad"),
            Err(EnvironmentError::Parse { .. })
        ));
    }
}
