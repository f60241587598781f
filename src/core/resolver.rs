//! # Placeholder Resolver
//!
//! Turns a raw property value into a fully substituted string.
//!
//! For each placeholder found by the scanner, the resolver:
//!
//! 1. Delegates to another config type if the placeholder is qualified with one.
//! 2. Rewrites `this` to the component that declared the property.
//! 3. For overridable placeholders, asks the root component first and then every
//!    visited placeholder (most recent first) for the key.
//! 4. Otherwise, or if nobody in the chain answers, looks the key up directly on
//!    the referenced component.
//! 5. Resolves the found value recursively, or falls back to the default value.
//!
//! Each recursion carries its own copy of the visited chain, so siblings in the
//! same text never see each other's history. Re-entering a placeholder already
//! on the chain is reported as a cycle. A reference into another config type
//! starts that type with an empty chain.

use crate::constants::MAX_RESOLVE_DEPTH;
use crate::core::environment::EnvironmentRepository;
use crate::core::placeholder::Placeholder;
use crate::core::scanner;
use crate::core::strategies::{ResolveStrategy, StrategyError, StrategySelector};
use crate::models::{Component, EnvComponent, Property, PropertySource};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Could not resolve placeholder '{placeholder}' in property '{}' ({}) while building '{root}'.", .property.key, .property.source)]
    Unresolved {
        placeholder: Placeholder,
        property: Property,
        root: EnvComponent,
    },
    #[error("Found cyclic dependencies in property '{}' while building '{root}': {}", .property.key, render_chain(.chain))]
    CyclicDependency {
        chain: Vec<Placeholder>,
        property: Property,
        root: EnvComponent,
    },
    #[error("Unsupported config type '{config_type}'. Configured types: [{}]", .configured.join(", "))]
    UnsupportedConfigType {
        config_type: String,
        configured: Vec<String>,
    },
    #[error("Maximum resolution depth ({depth}) exceeded in property '{}' while building '{root}'.", .property.key)]
    MaxDepthExceeded {
        depth: usize,
        property: Property,
        root: EnvComponent,
    },
    #[error("Lookup of '{placeholder}' failed: {source}")]
    Lookup {
        placeholder: Placeholder,
        #[source]
        source: StrategyError,
    },
}

/// Result alias of this module.
pub type ResolveResult<T> = Result<T, ResolveError>;

fn render_chain(chain: &[Placeholder]) -> String {
    chain
        .iter()
        .map(|p| p.explicit().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Ordered, duplicate-free chain of placeholders on the current resolution path.
#[derive(Debug, Clone, Default)]
struct Visited {
    chain: Vec<Placeholder>,
}

impl Visited {
    /// Returns a copy extended by `placeholder`, or the offending chain if it is
    /// already present.
    fn with(&self, placeholder: &Placeholder) -> Result<Self, Vec<Placeholder>> {
        let mut chain = self.chain.clone();
        chain.push(placeholder.clone());
        if self.chain.contains(placeholder) {
            return Err(chain);
        }
        Ok(Self { chain })
    }

    fn most_recent_first(&self) -> impl Iterator<Item = &Placeholder> {
        self.chain.iter().rev()
    }
}

/// State shared by every step of one top-level call.
struct Call<'a> {
    root: &'a EnvComponent,
    depth: usize,
}

/// Resolves placeholders against an environment repository and a strategy set
/// per config type. Cheap to share across threads; holds no per-call state.
#[derive(Debug)]
pub struct PlaceholderResolver {
    environments: Arc<EnvironmentRepository>,
    selector: Arc<StrategySelector>,
    non_overridable_keys: HashSet<String>,
}

impl PlaceholderResolver {
    /// Builds a resolver; `non_overridable_keys` are never taken from an override chain.
    pub fn new(
        environments: Arc<EnvironmentRepository>,
        selector: Arc<StrategySelector>,
        non_overridable_keys: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            environments,
            selector,
            non_overridable_keys: non_overridable_keys.into_iter().collect(),
        }
    }

    /// Resolves `property` on behalf of `root`, the component being built.
    ///
    /// # Arguments
    ///
    /// * `property` - The raw property; its source names the declaring component.
    /// * `root` - The component/environment pair the build was started for.
    /// * `config_type` - The config type the property belongs to.
    ///
    /// # Returns
    ///
    /// The fully substituted value.
    ///
    /// # Errors
    /// Any unresolved placeholder without a default, a cycle, an unknown config
    /// type, or a failing lookup aborts the call.
    pub fn resolve(
        &self,
        property: &Property,
        root: &EnvComponent,
        config_type: &str,
    ) -> ResolveResult<String> {
        log::debug!("Resolving '{}' of '{}' for '{}'", property.key, property.component(), root);
        let call = Call { root, depth: 0 };
        self.resolve_text(property, &call, config_type, &Visited::default())
    }

    /// Resolves a raw value as if `component` had declared it in `environment`.
    ///
    /// # Errors
    /// Same as [`PlaceholderResolver::resolve`].
    pub fn resolve_value(
        &self,
        raw: &str,
        component: &Component,
        environment: &str,
        config_type: &str,
    ) -> ResolveResult<String> {
        let source = PropertySource::special(component.clone(), "value");
        let property = Property::temp("<value>", raw, environment, source);
        let root = EnvComponent::new(component.clone(), environment);
        self.resolve(&property, &root, config_type)
    }

    fn strategy(&self, config_type: &str) -> ResolveResult<&Arc<dyn ResolveStrategy>> {
        self.selector
            .select(config_type)
            .ok_or_else(|| ResolveError::UnsupportedConfigType {
                config_type: config_type.to_string(),
                configured: self.selector.configured_types(),
            })
    }

    /// Substitutes every placeholder in the property's value.
    fn resolve_text(
        &self,
        property: &Property,
        call: &Call<'_>,
        config_type: &str,
        visited: &Visited,
    ) -> ResolveResult<String> {
        if call.depth > MAX_RESOLVE_DEPTH {
            return Err(ResolveError::MaxDepthExceeded {
                depth: MAX_RESOLVE_DEPTH,
                property: property.clone(),
                root: call.root.clone(),
            });
        }

        let mut text = property.value.clone();
        while let Some(span) = scanner::find_next(&text, 0) {
            let placeholder = Placeholder::from_span(&span, &property.environment);
            let range = span.start()..span.end();
            let value = self.resolve_placeholder(placeholder, property, call, config_type, visited)?;
            // Rescan from the start: the value may close a placeholder opened before it.
            text.replace_range(range, &value);
        }
        Ok(text)
    }

    fn resolve_placeholder(
        &self,
        placeholder: Placeholder,
        source: &Property,
        call: &Call<'_>,
        config_type: &str,
        visited: &Visited,
    ) -> ResolveResult<String> {
        let deeper = Call {
            root: call.root,
            depth: call.depth + 1,
        };

        // --- 1. Cross config-type dispatch ---
        if let Some(other) = placeholder.config_type()
            && other != config_type
        {
            self.strategy(other)?;
            log::trace!("Delegating '{}' to config type '{}'", placeholder, other);
            let delegated = placeholder.with_config_type(None).explicit();
            let transient = Property {
                temp: true,
                ..source.with_value(delegated.to_string())
            };
            // The other config type keeps its own history; the depth guard still applies.
            return self.resolve_text(&transient, &deeper, other, &Visited::default());
        }
        let strategy = self.strategy(config_type)?;

        // --- 2. Self reference ---
        let self_referenced = placeholder.is_self_referenced();
        let declaring = source.component();
        let placeholder = if self_referenced {
            placeholder.with_component(declaring.name.as_str())
        } else {
            placeholder
        };

        // --- 3. Override chain, then direct lookup ---
        let overridable = self_referenced
            || (placeholder.component() == declaring.component_type
                && placeholder.environment() == source.environment
                && !self.non_overridable_keys.contains(placeholder.key()));
        let mut found = None;
        if overridable {
            found = self.lookup_override_chain(&placeholder, call.root, visited, &**strategy)?;
        }
        if found.is_none() {
            found = self.lookup_direct(&placeholder, &**strategy)?;
        }

        // --- 4. Recurse into the winning value, or fall back to the default ---
        match found {
            Some(property) => {
                let visited = visited.with(&placeholder).map_err(|chain| {
                    ResolveError::CyclicDependency {
                        chain,
                        property: source.clone(),
                        root: call.root.clone(),
                    }
                })?;
                log::trace!("'{}' -> '{}'", placeholder, property.value);
                self.resolve_text(&property, &deeper, config_type, &visited)
            }
            None => match placeholder.default_value() {
                Some(default_value) => {
                    log::trace!("'{}' not found; using its default value", placeholder);
                    let fallback = Property {
                        temp: true,
                        ..source.with_value(default_value)
                    };
                    self.resolve_text(&fallback, &deeper, config_type, visited)
                }
                None => Err(ResolveError::Unresolved {
                    placeholder,
                    property: source.clone(),
                    root: call.root.clone(),
                }),
            },
        }
    }

    /// Root first, then each visited placeholder from the most recent one.
    /// One direct strategy call per candidate.
    fn lookup_override_chain(
        &self,
        placeholder: &Placeholder,
        root: &EnvComponent,
        visited: &Visited,
        strategy: &dyn ResolveStrategy,
    ) -> ResolveResult<Option<Property>> {
        let lookup_error = |source: StrategyError| ResolveError::Lookup {
            placeholder: placeholder.clone(),
            source,
        };

        if let Some(property) = strategy
            .resolve(&root.component, placeholder.key(), &root.environment)
            .map_err(lookup_error)?
        {
            log::trace!("'{}' overridden by root '{}'", placeholder, root);
            return Ok(Some(property));
        }
        for ancestor in visited.most_recent_first() {
            let component = self
                .environments
                .find_component(ancestor.component(), ancestor.environment())
                .map_err(|e| lookup_error(e.into()))?;
            if let Some(property) = strategy
                .resolve(&component, placeholder.key(), ancestor.environment())
                .map_err(lookup_error)?
            {
                log::trace!("'{}' overridden by '{}'", placeholder, ancestor);
                return Ok(Some(property));
            }
        }
        Ok(None)
    }

    fn lookup_direct(
        &self,
        placeholder: &Placeholder,
        strategy: &dyn ResolveStrategy,
    ) -> ResolveResult<Option<Property>> {
        let lookup_error = |source: StrategyError| ResolveError::Lookup {
            placeholder: placeholder.clone(),
            source,
        };
        let component = self
            .environments
            .find_component(placeholder.component(), placeholder.environment())
            .map_err(|e| lookup_error(e.into()))?;
        strategy
            .resolve(&component, placeholder.key(), placeholder.environment())
            .map_err(lookup_error)
    }
}
