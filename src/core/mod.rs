// src/core/mod.rs

//! Scanning, lookup and resolution of placeholders, and the build pipeline.

pub mod builder;
pub mod cache;
pub mod environment;
pub mod paths;
pub mod placeholder;
pub mod properties;
pub mod resolver;
pub mod scanner;
pub mod settings;
pub mod strategies;
