//! # Placeholder Model
//!
//! The parsed, immutable form of a scanned `${...}` span.

use crate::constants::SELF_REFERENCE;
use crate::core::scanner::Span;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A reference to `key` of `component` in `environment`, with an optional default.
///
/// Equality and hashing consider only component, environment and key: the same
/// reference reached through different defaults or qualifiers is still the same
/// node for cycle detection.
#[derive(Debug, Clone)]
pub struct Placeholder {
    config_type: Option<String>,
    component: String,
    environment: String,
    explicit_environment: bool,
    key: String,
    default_value: Option<String>,
}

impl Placeholder {
    /// Builds a placeholder from a scanned span. `context_environment` is used
    /// when the span carries no bracketed environment.
    pub fn from_span(span: &Span<'_>, context_environment: &str) -> Self {
        let (environment, explicit_environment) = match span.environment() {
            Some(env) => (env.to_string(), true),
            None => (context_environment.to_string(), false),
        };
        Self {
            config_type: span.config_type().map(str::to_string),
            component: span.component().to_string(),
            environment,
            explicit_environment,
            key: span.key().to_string(),
            default_value: span.default_value().map(str::to_string),
        }
    }

    /// The config-type qualifier, if any.
    pub fn config_type(&self) -> Option<&str> {
        self.config_type.as_deref()
    }

    /// The component reference as written, or the rewritten name.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// The environment, explicit or inherited.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The referenced key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The raw default value, if any.
    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    /// `true` when the component reference is the `this` token.
    pub fn is_self_referenced(&self) -> bool {
        self.component == SELF_REFERENCE
    }

    /// Returns a copy referring to another component, keeping everything else.
    pub fn with_component(&self, component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..self.clone()
        }
    }

    /// Returns a copy that renders its environment even when it was inherited.
    pub fn explicit(&self) -> Self {
        Self {
            explicit_environment: true,
            ..self.clone()
        }
    }

    /// Returns a copy with the config-type qualifier replaced.
    pub fn with_config_type(&self, config_type: Option<&str>) -> Self {
        Self {
            config_type: config_type.map(str::to_string),
            ..self.clone()
        }
    }
}

impl PartialEq for Placeholder {
    fn eq(&self, other: &Self) -> bool {
        self.component == other.component
            && self.environment == other.environment
            && self.key == other.key
    }
}

impl Eq for Placeholder {}

impl Hash for Placeholder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.component.hash(state);
        self.environment.hash(state);
        self.key.hash(state);
    }
}

/// Canonical form: `${type::component[env]@key:default}`.
impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("${")?;
        if let Some(config_type) = &self.config_type {
            write!(f, "{}::", config_type)?;
        }
        f.write_str(&self.component)?;
        if self.explicit_environment {
            write!(f, "[{}]", self.environment)?;
        }
        write!(f, "@{}", self.key)?;
        if let Some(default_value) = &self.default_value {
            write!(f, ":{}", default_value)?;
        }
        f.write_str("}")
    }
}
