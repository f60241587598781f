//! Builds per-component configuration for a fleet of services across deployment
//! environments, resolving `${component@key}` placeholders between components.

pub mod cli;
pub mod constants;
pub mod core;
pub mod dev_utils;
pub mod models;
