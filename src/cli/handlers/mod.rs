// src/cli/handlers/mod.rs

//! One handler per subcommand.

pub mod build;
pub mod commons;
pub mod envs;
pub mod resolve;
