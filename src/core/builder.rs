//! # Config Builder
//!
//! Wires the environment repository, the component tree, the property supplier
//! and one strategy set per config type into a [`PlaceholderResolver`], then
//! builds resolved configurations for single components or whole environments.
//!
//! A builder lives for one invocation; its caches go away with it.

use crate::constants::{
    BUILTIN_NON_OVERRIDABLE_KEYS, COMPONENTS_DIR, DEFAULT_DESTINATION_DIR, ENVS_DIR,
};
use crate::core::environment::{EnvironmentError, EnvironmentRepository, FileEnvironmentSource};
use crate::core::paths::{self, PathError};
use crate::core::properties::{ComponentTree, FilePropertySupplier, PropertySupplier, SupplierError};
use crate::core::resolver::{PlaceholderResolver, ResolveError};
use crate::core::settings::{Settings, SettingsError};
use crate::core::strategies::{
    ComponentIdentityStrategy, ComponentPropertyStrategy, CompositeStrategy,
    EnvironmentDescriptorStrategy, StrategySelector, SystemStrategy,
};
use crate::dev_utils::BlockTimer;
use crate::models::{Component, EnvComponent};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error(transparent)]
    Supplier(#[from] SupplierError),
    #[error("Failed to resolve '{key}' of '{root}': {source}")]
    Resolve {
        root: EnvComponent,
        key: String,
        #[source]
        source: ResolveError,
    },
    #[error(transparent)]
    Value(#[from] ResolveError),
    #[error("Components not found in environment '{environment}': {}", .names.join(", "))]
    UnknownComponents {
        environment: String,
        names: Vec<String>,
    },
}

/// Result alias of this module.
pub type BuildResult<T> = Result<T, BuildError>;

/// Resolved configuration of one component: config type -> key -> value.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ComponentConfig {
    pub component: Component,
    pub environment: String,
    pub config_types: BTreeMap<String, BTreeMap<String, String>>,
}

/// Builds resolved configurations for one config root.
#[derive(Debug)]
pub struct ConfigBuilder {
    root: PathBuf,
    destination: PathBuf,
    settings: Settings,
    environments: Arc<EnvironmentRepository>,
    supplier: Arc<dyn PropertySupplier>,
    resolver: PlaceholderResolver,
}

impl ConfigBuilder {
    /// Opens a config root laid out as `envs/`, `components/` and an optional
    /// `fleetcfg.toml`.
    ///
    /// # Arguments
    ///
    /// * `root` - The config root directory.
    /// * `destination` - Output directory; defaults to `<root>/build`.
    /// * `system_overrides` - Extra `system` properties, applied over the settings file.
    ///
    /// # Errors
    /// Returns an error if the root does not exist or the settings are invalid.
    pub fn open(
        root: &Path,
        destination: Option<&Path>,
        system_overrides: BTreeMap<String, String>,
    ) -> BuildResult<Self> {
        let root = paths::canonical_root(root)?;
        let mut settings = Settings::load(&root)?;
        settings.system_properties.extend(system_overrides);
        let destination = destination.map_or_else(
            || root.join(DEFAULT_DESTINATION_DIR),
            paths::absolute,
        );

        let environments = Arc::new(EnvironmentRepository::new(FileEnvironmentSource::new(
            root.join(ENVS_DIR),
        )));
        let tree = Arc::new(ComponentTree::new(root.join(COMPONENTS_DIR)));
        let supplier: Arc<dyn PropertySupplier> = Arc::new(FilePropertySupplier::new(
            tree.clone(),
            settings.config_types.clone(),
        ));
        log::debug!(
            "Opened config root '{}' (destination '{}')",
            root.display(),
            destination.display()
        );
        Ok(Self::from_parts(root, destination, settings, environments, tree, supplier))
    }

    /// Assembles a builder from already constructed collaborators.
    pub fn from_parts(
        root: PathBuf,
        destination: PathBuf,
        settings: Settings,
        environments: Arc<EnvironmentRepository>,
        tree: Arc<ComponentTree>,
        supplier: Arc<dyn PropertySupplier>,
    ) -> Self {
        let system = SystemStrategy::system_properties(&settings.system_properties, settings.windows_paths);
        let os_env = SystemStrategy::environment_variables(settings.windows_paths);

        let mut selector = StrategySelector::new();
        for config_type in &settings.config_types {
            let strategy = CompositeStrategy::new()
                .with(system.clone())
                .with(os_env.clone())
                .with(ComponentIdentityStrategy::new(&root, destination.clone(), tree.clone()))
                .with(EnvironmentDescriptorStrategy::new(environments.clone()))
                .with(ComponentPropertyStrategy::new(supplier.clone(), &config_type.name));
            selector = selector.register(&config_type.name, strategy);
        }

        let non_overridable = BUILTIN_NON_OVERRIDABLE_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(settings.non_overridable_keys.iter().cloned());
        let resolver = PlaceholderResolver::new(environments.clone(), Arc::new(selector), non_overridable);

        Self {
            root,
            destination,
            settings,
            environments,
            supplier,
            resolver,
        }
    }

    /// The canonical config root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The output directory.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Settings in effect, overrides included.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The shared environment repository.
    pub fn environments(&self) -> &EnvironmentRepository {
        &self.environments
    }

    /// Resolves one raw value in the context of `component` in `environment`.
    /// `config_type` defaults to the first configured type.
    ///
    /// # Errors
    /// Returns the resolution or environment error.
    pub fn resolve_value(
        &self,
        raw: &str,
        component: &str,
        environment: &str,
        config_type: Option<&str>,
    ) -> BuildResult<String> {
        let component = self.environments.find_component(component, environment)?;
        let config_type = config_type.unwrap_or_else(|| self.settings.default_config_type());
        Ok(self
            .resolver
            .resolve_value(raw, &component, environment, config_type)?)
    }

    /// Resolves every non-transient property of `component`, for every config type.
    ///
    /// # Errors
    /// The first property that fails to load or resolve aborts the component.
    pub fn build_component(&self, component: &Component, environment: &str) -> BuildResult<ComponentConfig> {
        let root = EnvComponent::new(component.clone(), environment);
        let mut config_types = BTreeMap::new();

        for config_type in &self.settings.config_types {
            let properties = self
                .supplier
                .properties(component, environment, &config_type.name)?;
            let mut resolved = BTreeMap::new();
            for (key, property) in properties.iter().filter(|(_, p)| !p.temp) {
                let value = self
                    .resolver
                    .resolve(property, &root, &config_type.name)
                    .map_err(|source| BuildError::Resolve {
                        root: root.clone(),
                        key: key.clone(),
                        source,
                    })?;
                resolved.insert(key.clone(), value);
            }
            config_types.insert(config_type.name.clone(), resolved);
        }

        log::debug!("Built '{}'", root);
        Ok(ComponentConfig {
            component: component.clone(),
            environment: environment.to_string(),
            config_types,
        })
    }

    /// Builds every component of `environment` (or only those named in `only`)
    /// in parallel. Per-component failures are returned alongside successes.
    ///
    /// # Errors
    /// Fails up front if the environment cannot be loaded or `only` names a
    /// component it does not contain.
    pub fn build_environment(
        &self,
        environment: &str,
        only: &[String],
    ) -> BuildResult<Vec<(Component, BuildResult<ComponentConfig>)>> {
        let _timer = BlockTimer::new(format!("build environment '{}'", environment));
        let env = self.environments.get_by_name(environment)?;

        let missing: Vec<String> = only
            .iter()
            .filter(|name| env.component_by_name(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::UnknownComponents {
                environment: environment.to_string(),
                names: missing,
            });
        }

        let components: Vec<Component> = env
            .components()
            .filter(|c| only.is_empty() || only.contains(&c.name))
            .cloned()
            .collect();
        log::debug!("Building {} components of '{}'", components.len(), environment);

        Ok(components
            .into_par_iter()
            .map(|component| {
                let result = self.build_component(&component, environment);
                (component, result)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::environment::InMemoryEnvironmentSource;
    use crate::core::properties::InMemoryPropertySupplier;
    use crate::models::{EnvironmentDefinition, GroupDefinition};

    fn builder() -> ConfigBuilder {
        let dev = EnvironmentDefinition {
            groups: vec![GroupDefinition {
                name: "backend".into(),
                ip: Some("10.0.0.5".into()),
                components: vec!["api".into(), "worker".into(), "broken".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let environments = Arc::new(EnvironmentRepository::new(
            InMemoryEnvironmentSource::new().with("dev", dev).unwrap(),
        ));
        let supplier = InMemoryPropertySupplier::new()
            .declare(
                "app",
                "api",
                None,
                &["#var host=${this@ip}", "url=http://${this@host}:80${this@order}", "home=${this@resultDir}"],
            )
            .unwrap()
            .declare("deploy", "api", None, &["replicas=2", "image=${api@name}:${app::api@url}"])
            .unwrap()
            .declare("app", "worker", None, &["api=${api@url}"])
            .unwrap()
            .declare("app", "broken", None, &["x=${nowhere@key}"])
            .unwrap();
        ConfigBuilder::from_parts(
            PathBuf::from("/cfg"),
            PathBuf::from("/out"),
            Settings::default(),
            environments,
            Arc::new(ComponentTree::new("/cfg/components")),
            Arc::new(supplier),
        )
    }

    #[test]
    fn test_build_component_drops_transient_properties() {
        let builder = builder();
        let config = builder.build_component(&Component::by_type("api"), "dev").unwrap();

        let app = config.config_types.get("app").unwrap();
        assert_eq!(app.get("url").unwrap(), "http://10.0.0.5:800");
        assert_eq!(app.get("home").unwrap(), "/out/api");
        assert!(app.get("host").is_none());

        let deploy = config.config_types.get("deploy").unwrap();
        assert_eq!(deploy.get("image").unwrap(), "api:http://10.0.0.5:800");
    }

    #[test]
    fn test_build_environment_reports_failures_per_component() {
        let builder = builder();
        let results = builder.build_environment("dev", &[]).unwrap();
        assert_eq!(results.len(), 3);

        let worker = results.iter().find(|(c, _)| c.name == "worker").unwrap();
        let worker_app = worker.1.as_ref().unwrap().config_types.get("app").unwrap();
        // `this` inside api's url is answered by the root first: the worker's order.
        assert_eq!(worker_app.get("api").unwrap(), "http://10.0.0.5:801");

        let broken = results.iter().find(|(c, _)| c.name == "broken").unwrap();
        assert!(matches!(
            broken.1,
            Err(BuildError::Resolve { ref key, source: ResolveError::Unresolved { .. }, .. }) if key == "x"
        ));
    }

    #[test]
    fn test_build_environment_filters_and_validates_names() {
        let builder = builder();
        let only = vec!["worker".to_string()];
        let results = builder.build_environment("dev", &only).unwrap();
        assert_eq!(results.len(), 1);

        let unknown = vec!["ghost".to_string()];
        assert!(matches!(
            builder.build_environment("dev", &unknown),
            Err(BuildError::UnknownComponents { .. })
        ));
        assert!(matches!(
            builder.build_environment("prod", &[]),
            Err(BuildError::Environment(EnvironmentError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_resolve_value_uses_default_config_type() {
        let builder = builder();
        assert_eq!(
            builder.resolve_value("${this@order}/${deploy::api@replicas}", "worker", "dev", None).unwrap(),
            "1/2"
        );
        assert!(builder.resolve_value("${api@replicas}", "worker", "dev", Some("app")).is_err());
    }
}
