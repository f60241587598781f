//! # Resolution Strategies
//!
//! A strategy answers "what is `key` for `component` in `environment`", or
//! declines with `Ok(None)`. Several strategies are combined into one
//! [`CompositeStrategy`] per config type; the first answer wins.

use crate::constants::{
    CONFIG_DIR_KEY, CONFIG_ROOT_KEY, ENV_COMPONENT, ENV_NAME_KEY, GROUP_KEY, HOME_KEY, IP_KEY,
    NAME_KEY, ORDER_KEY, PORT_OFFSET_KEY, RESULT_DIR_KEY, SYSTEM_COMPONENT,
};
use crate::core::environment::{EnvironmentError, EnvironmentRepository};
use crate::core::paths::unix_like_path;
use crate::core::properties::{ComponentTree, PropertySupplier, SupplierError};
use crate::models::{Component, Property, PropertySource};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error(transparent)]
    Supplier(#[from] SupplierError),
}

/// Result alias of this module.
pub type StrategyResult<T> = Result<T, StrategyError>;

/// The capability every strategy variant implements.
pub trait ResolveStrategy: Send + Sync + Debug {
    /// Attempts to produce the value of `key`.
    ///
    /// # Errors
    /// Returns an error only when an underlying source fails; an unknown key is `Ok(None)`.
    fn resolve(
        &self,
        component: &Component,
        key: &str,
        environment: &str,
    ) -> StrategyResult<Option<Property>>;
}

/// Tries each strategy in order and returns the first answer.
#[derive(Debug, Default)]
pub struct CompositeStrategy {
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl CompositeStrategy {
    /// An empty composite; answers nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `strategy`; earlier strategies take precedence.
    pub fn with(mut self, strategy: impl ResolveStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }
}

impl ResolveStrategy for CompositeStrategy {
    fn resolve(
        &self,
        component: &Component,
        key: &str,
        environment: &str,
    ) -> StrategyResult<Option<Property>> {
        for strategy in &self.strategies {
            if let Some(property) = strategy.resolve(component, key, environment)? {
                log::trace!("Strategy answered '{}@{}' in '{}'", component.name, key, environment);
                return Ok(Some(property));
            }
        }
        Ok(None)
    }
}

/// Chooses the strategy set for a config-type qualifier.
#[derive(Debug, Default)]
pub struct StrategySelector {
    strategies: BTreeMap<String, Arc<dyn ResolveStrategy>>,
}

impl StrategySelector {
    /// A selector with no config types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the strategy used for `config_type`.
    pub fn register(mut self, config_type: &str, strategy: impl ResolveStrategy + 'static) -> Self {
        self.strategies
            .insert(config_type.to_string(), Arc::new(strategy));
        self
    }

    /// The strategy registered for `config_type`.
    pub fn select(&self, config_type: &str) -> Option<&Arc<dyn ResolveStrategy>> {
        self.strategies.get(config_type)
    }

    /// Every registered config type, sorted.
    pub fn configured_types(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }
}

// --- Component identity ---

/// Answers fixed facts about the component itself, independent of environment.
#[derive(Debug)]
pub struct ComponentIdentityStrategy {
    config_root: String,
    destination: PathBuf,
    tree: Arc<ComponentTree>,
}

impl ComponentIdentityStrategy {
    /// Answers identity keys for components under `config_root`, with outputs under `destination`.
    pub fn new(config_root: &std::path::Path, destination: PathBuf, tree: Arc<ComponentTree>) -> Self {
        Self {
            config_root: unix_like_path(config_root),
            destination,
            tree,
        }
    }
}

impl ResolveStrategy for ComponentIdentityStrategy {
    fn resolve(
        &self,
        component: &Component,
        key: &str,
        environment: &str,
    ) -> StrategyResult<Option<Property>> {
        let value = match key {
            NAME_KEY => component.name.clone(),
            CONFIG_DIR_KEY => unix_like_path(&self.tree.config_dir(&component.component_type)),
            RESULT_DIR_KEY => unix_like_path(&self.destination.join(&component.name)),
            CONFIG_ROOT_KEY => self.config_root.clone(),
            _ => return Ok(None),
        };
        let source = PropertySource::special(component.clone(), "identity");
        Ok(Some(Property::new(key, value, environment, source)))
    }
}

// --- Environment descriptor ---

/// Answers keys computed from the environment the component is deployed in.
#[derive(Debug)]
pub struct EnvironmentDescriptorStrategy {
    environments: Arc<EnvironmentRepository>,
}

impl EnvironmentDescriptorStrategy {
    /// Answers from the environments in `environments`.
    pub fn new(environments: Arc<EnvironmentRepository>) -> Self {
        Self { environments }
    }
}

impl ResolveStrategy for EnvironmentDescriptorStrategy {
    fn resolve(
        &self,
        component: &Component,
        key: &str,
        environment: &str,
    ) -> StrategyResult<Option<Property>> {
        let env = match self.environments.get_by_name(environment) {
            Ok(env) => env,
            Err(EnvironmentError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some((group, order, _)) = env.locate(&component.name) else {
            return Ok(None);
        };

        let value = match key {
            ORDER_KEY => Some(order.to_string()),
            ENV_NAME_KEY => Some(env.name.clone()),
            GROUP_KEY => Some(group.name.clone()),
            IP_KEY => group.ip.clone(),
            PORT_OFFSET_KEY => env.port_offset.map(|offset| offset.to_string()),
            _ => group
                .properties
                .get(key)
                .or_else(|| env.properties.get(key))
                .cloned(),
        };
        Ok(value.map(|value| {
            let source = PropertySource::special(component.clone(), format!("environment {}", env.name));
            Property::new(key, value, environment, source)
        }))
    }
}

// --- System properties / OS environment ---

/// Answers only for one reserved pseudo-component (`system` or `env`), from a
/// snapshot taken at construction.
#[derive(Debug, Clone)]
pub struct SystemStrategy {
    reserved: String,
    values: BTreeMap<String, String>,
    windows_paths: bool,
}

impl SystemStrategy {
    /// Answers `values` for the `reserved` component only.
    pub fn new(reserved: &str, values: BTreeMap<String, String>, windows_paths: bool) -> Self {
        Self {
            reserved: reserved.to_string(),
            values,
            windows_paths,
        }
    }

    /// Process facts under `system`, extended (and overridable) by `overrides`.
    pub fn system_properties(overrides: &BTreeMap<String, String>, windows_paths: bool) -> Self {
        let mut values = BTreeMap::new();
        if let Some(home) = dirs::home_dir() {
            values.insert(HOME_KEY.to_string(), home.display().to_string());
        }
        if let Ok(dir) = std::env::current_dir() {
            values.insert("user.dir".to_string(), dir.display().to_string());
        }
        if let Some(user) = std::env::var("USER")
            .ok()
            .or_else(|| std::env::var("USERNAME").ok())
        {
            values.insert("user.name".to_string(), user);
        }
        values.insert("os.name".to_string(), std::env::consts::OS.to_string());
        values.insert("os.arch".to_string(), std::env::consts::ARCH.to_string());
        values.insert(
            "file.separator".to_string(),
            std::path::MAIN_SEPARATOR.to_string(),
        );
        let (path_separator, line_separator) = if cfg!(windows) { (";", "\r\n") } else { (":", "\n") };
        values.insert("path.separator".to_string(), path_separator.to_string());
        values.insert("line.separator".to_string(), line_separator.to_string());
        values.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::new(SYSTEM_COMPONENT, values, windows_paths)
    }

    /// OS environment variables under `env`.
    pub fn environment_variables(windows_paths: bool) -> Self {
        let values = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self::new(ENV_COMPONENT, values, windows_paths)
    }
}

impl ResolveStrategy for SystemStrategy {
    fn resolve(
        &self,
        component: &Component,
        key: &str,
        environment: &str,
    ) -> StrategyResult<Option<Property>> {
        if component.name != self.reserved {
            return Ok(None);
        }
        Ok(self.values.get(key).map(|value| {
            let source = PropertySource::special(component.clone(), self.reserved.clone());
            let property = Property::temp(key, value.clone(), environment, source);
            if self.windows_paths {
                property.escape_on_windows()
            } else {
                property
            }
        }))
    }
}

// --- Component properties ---

/// Looks the key up among the raw properties of the component.
#[derive(Debug)]
pub struct ComponentPropertyStrategy {
    supplier: Arc<dyn PropertySupplier>,
    config_type: String,
}

impl ComponentPropertyStrategy {
    /// Looks keys up in the `config_type` properties from `supplier`.
    pub fn new(supplier: Arc<dyn PropertySupplier>, config_type: &str) -> Self {
        Self {
            supplier,
            config_type: config_type.to_string(),
        }
    }
}

impl ResolveStrategy for ComponentPropertyStrategy {
    fn resolve(
        &self,
        component: &Component,
        key: &str,
        environment: &str,
    ) -> StrategyResult<Option<Property>> {
        let properties = self
            .supplier
            .properties(component, environment, &self.config_type)?;
        Ok(properties.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::environment::InMemoryEnvironmentSource;
    use crate::core::properties::InMemoryPropertySupplier;
    use crate::models::{EnvironmentDefinition, GroupDefinition, ScalarValue};
    use std::path::Path;

    fn repository() -> Arc<EnvironmentRepository> {
        let definition = EnvironmentDefinition {
            port_offset: Some(100),
            properties: [("domain".to_string(), ScalarValue::Text("dev.local".into()))].into(),
            groups: vec![GroupDefinition {
                name: "backend".into(),
                ip: Some("10.0.0.2".into()),
                components: vec!["x".into(), "y".into(), "z:zeta".into()],
                properties: [("domain".to_string(), ScalarValue::Text("backend.local".into()))].into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let source = InMemoryEnvironmentSource::new().with("dev", definition).unwrap();
        Arc::new(EnvironmentRepository::new(source))
    }

    fn value(strategy: &dyn ResolveStrategy, component: &Component, key: &str) -> Option<String> {
        strategy
            .resolve(component, key, "dev")
            .unwrap()
            .map(|p| p.value)
    }

    #[test]
    fn test_environment_descriptor_keys() {
        let strategy = EnvironmentDescriptorStrategy::new(repository());
        let x = Component::by_type("x");
        let z = Component::new("z", "zeta");

        assert_eq!(value(&strategy, &x, ORDER_KEY).as_deref(), Some("0"));
        assert_eq!(value(&strategy, &z, ORDER_KEY).as_deref(), Some("2"));
        assert_eq!(value(&strategy, &x, ENV_NAME_KEY).as_deref(), Some("dev"));
        assert_eq!(value(&strategy, &x, GROUP_KEY).as_deref(), Some("backend"));
        assert_eq!(value(&strategy, &x, IP_KEY).as_deref(), Some("10.0.0.2"));
        assert_eq!(value(&strategy, &x, PORT_OFFSET_KEY).as_deref(), Some("100"));
        assert_eq!(value(&strategy, &x, "domain").as_deref(), Some("backend.local"));
        assert_eq!(value(&strategy, &x, "missing"), None);
        assert_eq!(value(&strategy, &Component::by_type("other"), ORDER_KEY), None);
        assert!(strategy.resolve(&x, ORDER_KEY, "prod").unwrap().is_none());
    }

    #[test]
    fn test_component_identity_keys() {
        let tree = Arc::new(ComponentTree::new("/cfg/components"));
        let strategy =
            ComponentIdentityStrategy::new(Path::new("/cfg"), PathBuf::from("/out"), tree);
        let api = Component::new("api-1", "api");

        assert_eq!(value(&strategy, &api, NAME_KEY).as_deref(), Some("api-1"));
        assert_eq!(value(&strategy, &api, CONFIG_ROOT_KEY).as_deref(), Some("/cfg"));
        assert_eq!(value(&strategy, &api, RESULT_DIR_KEY).as_deref(), Some("/out/api-1"));
        assert_eq!(
            value(&strategy, &api, CONFIG_DIR_KEY).as_deref(),
            Some("/cfg/components/api")
        );
        assert_eq!(value(&strategy, &api, "port"), None);
    }

    #[test]
    fn test_system_strategy_scoped_to_reserved_name() {
        let values: BTreeMap<String, String> = [
            (HOME_KEY.to_string(), r"C:\Users\me".to_string()),
            ("TOOLS".to_string(), r"C:\tools".to_string()),
        ]
        .into();
        let plain = SystemStrategy::new(ENV_COMPONENT, values.clone(), false);
        let windows = SystemStrategy::new(ENV_COMPONENT, values, true);
        let env = Component::by_type(ENV_COMPONENT);

        assert_eq!(value(&plain, &env, "TOOLS").as_deref(), Some(r"C:\tools"));
        assert!(plain.resolve(&env, "TOOLS", "dev").unwrap().unwrap().temp);
        assert_eq!(value(&plain, &Component::by_type("api"), "TOOLS"), None);
        assert_eq!(value(&windows, &env, HOME_KEY).as_deref(), Some("C:/Users/me"));
        assert_eq!(value(&windows, &env, "TOOLS").as_deref(), Some(r"C:\\tools"));
    }

    #[test]
    fn test_system_properties_snapshot() {
        let overrides: BTreeMap<String, String> = [("deploy.user".to_string(), "ci".to_string())].into();
        let strategy = SystemStrategy::system_properties(&overrides, false);
        let system = Component::by_type(SYSTEM_COMPONENT);
        assert_eq!(value(&strategy, &system, "deploy.user").as_deref(), Some("ci"));
        assert_eq!(
            value(&strategy, &system, "os.name").as_deref(),
            Some(std::env::consts::OS)
        );
    }

    #[test]
    fn test_composite_first_hit_wins() {
        let supplier = InMemoryPropertySupplier::new()
            .declare("app", "x", None, &["name=shadowed", "port=80"])
            .unwrap();
        let tree = Arc::new(ComponentTree::new("/cfg/components"));
        let composite = CompositeStrategy::new()
            .with(ComponentIdentityStrategy::new(Path::new("/cfg"), PathBuf::from("/out"), tree))
            .with(ComponentPropertyStrategy::new(Arc::new(supplier), "app"));
        let x = Component::by_type("x");

        assert_eq!(value(&composite, &x, NAME_KEY).as_deref(), Some("x"));
        assert_eq!(value(&composite, &x, "port").as_deref(), Some("80"));
        assert_eq!(value(&composite, &x, "missing"), None);

        let selector = StrategySelector::new().register("app", composite);
        assert!(selector.select("app").is_some());
        assert!(selector.select("deploy").is_none());
        assert_eq!(selector.configured_types(), vec!["app"]);
    }
}
