// src/core/paths.rs

//! Path expansion and normalization.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not expand path '{path}': {message}")]
    Expansion { path: String, message: String },
    #[error("Config root '{path}' is not accessible: {source}")]
    Canonicalize {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Renders a path with forward slashes regardless of platform.
pub fn unix_like_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

/// Expands `~` and `$VAR` in a user-supplied path.
///
/// # Errors
/// Returns `PathError::Expansion` if a referenced variable is not set.
pub fn expand(raw: &str) -> Result<PathBuf, PathError> {
    shellexpand::full(raw)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| PathError::Expansion {
            path: raw.to_string(),
            message: e.to_string(),
        })
}

/// Canonicalizes the config root without the `\\?\` prefix on Windows.
///
/// # Errors
/// Returns `PathError::Canonicalize` if the directory does not exist.
pub fn canonical_root(path: &Path) -> Result<PathBuf, PathError> {
    dunce::canonicalize(path).map_err(|source| PathError::Canonicalize {
        path: path.display().to_string(),
        source,
    })
}

/// Makes `path` absolute against the current directory, without touching the disk.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
