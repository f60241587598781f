// src/constants.rs

//! Reserved names, keys and limits shared across the crate.

/// Component reference token meaning "the component that declared this property".
pub const SELF_REFERENCE: &str = "this";

/// Reserved pseudo-component answering process/system properties.
pub const SYSTEM_COMPONENT: &str = "system";

/// Reserved pseudo-component answering OS environment variables.
pub const ENV_COMPONENT: &str = "env";

/// The system property holding the user's home directory.
/// Normalized to forward slashes instead of being escaped on Windows.
pub const HOME_KEY: &str = "user.home";

/// Defensive bound on nested resolutions within one top-level call.
pub const MAX_RESOLVE_DEPTH: usize = 64;

/// Directory (under the config root) holding environment definitions.
pub const ENVS_DIR: &str = "envs";

/// Directory (under the config root) holding one sub-directory per component type.
pub const COMPONENTS_DIR: &str = "components";

/// Optional settings file at the config root.
pub const SETTINGS_FILENAME: &str = "fleetcfg.toml";

/// Default output directory name when no destination is given.
pub const DEFAULT_DESTINATION_DIR: &str = "build";

/// Reserved key listing included component types inside a component file.
pub const INCLUDE_KEY: &str = "_include";

/// Reserved table of transient variables inside a component file.
pub const VARS_TABLE: &str = "_vars";

/// Prefix marking a transient property in a `key=value` declaration.
pub const TEMP_PROPERTY_PREFIX: &str = "#var ";

// --- Component identity keys ---
/// Component name.
pub const NAME_KEY: &str = "name";
/// Directory holding the component type's files.
pub const CONFIG_DIR_KEY: &str = "configDir";
/// Output directory of the component.
pub const RESULT_DIR_KEY: &str = "resultDir";
/// Absolute config root.
pub const CONFIG_ROOT_KEY: &str = "configRoot";

// --- Environment descriptor keys ---
/// Position of the component inside its group.
pub const ORDER_KEY: &str = "order";
/// Name of the environment being built.
pub const ENV_NAME_KEY: &str = "env";
/// Name of the group containing the component.
pub const GROUP_KEY: &str = "group";
/// IP of the group containing the component.
pub const IP_KEY: &str = "ip";
/// Port offset of the environment.
pub const PORT_OFFSET_KEY: &str = "portOffset";

/// Keys answered by built-in strategies; never taken from an override chain.
pub const BUILTIN_NON_OVERRIDABLE_KEYS: &[&str] = &[
    NAME_KEY,
    CONFIG_DIR_KEY,
    RESULT_DIR_KEY,
    CONFIG_ROOT_KEY,
    ORDER_KEY,
    ENV_NAME_KEY,
    GROUP_KEY,
    IP_KEY,
    PORT_OFFSET_KEY,
];
