//! Path string utilities
//!
//! Paths are `/`-separated. An absolute path starts with the separator;
//! `"/"` on its own names the root. A single trailing separator is tolerated,
//! empty components (`"/a//b"`) are not.

use thiserror::Error;

/// Separator between path components
pub const PATH_SEPARATOR: char = '/';
/// Separator as a string slice
pub const PATH_SEPARATOR_STR: &str = "/";
/// Suffix that marks a wildcard alias source
pub const WILDCARD_SUFFIX: &str = "/*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Empty path")]
    EmptyPath,
    #[error("Path is not absolute: {0}")]
    PathNotAbsolute(String),
    #[error("Path contains an empty component: {0}")]
    EmptyPathComponent(String),
    #[error("Invalid device name: {0:?}")]
    InvalidDeviceName(String),
}

/// True if the path starts with the separator
pub fn is_path_absolute(path: &str) -> bool {
    path.starts_with(PATH_SEPARATOR)
}

/// Split an absolute path into its components.
///
/// `"/"` yields no components. Every component is validated before the
/// result is returned, so callers can create nodes without risking a
/// half-applied path.
pub fn split_absolute(path: &str) -> Result<Vec<&str>, PathError> {
    if path.is_empty() {
        return Err(PathError::EmptyPath);
    }
    if !is_path_absolute(path) {
        return Err(PathError::PathNotAbsolute(path.to_string()));
    }
    split_components(&path[1..], path)
}

/// Split a relative path into its components. Same validation rules as
/// [`split_absolute`], minus the leading separator.
pub fn split_relative(path: &str) -> Result<Vec<&str>, PathError> {
    if path.is_empty() {
        return Err(PathError::EmptyPath);
    }
    if is_path_absolute(path) {
        return split_absolute(path);
    }
    split_components(path, path)
}

fn split_components<'a>(body: &'a str, full: &str) -> Result<Vec<&'a str>, PathError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let body = body.strip_suffix(PATH_SEPARATOR).unwrap_or(body);
    if body.is_empty() {
        return Err(PathError::EmptyPathComponent(full.to_string()));
    }
    let components: Vec<&str> = body.split(PATH_SEPARATOR).collect();
    if components.iter().any(|c| c.is_empty()) {
        return Err(PathError::EmptyPathComponent(full.to_string()));
    }
    Ok(components)
}

/// Join a base path and a relative path. Absolute `rel` wins outright.
pub fn join_path(base: &str, rel: &str) -> String {
    if is_path_absolute(rel) {
        return rel.to_string();
    }
    let base = base.trim_end_matches(PATH_SEPARATOR);
    if rel.is_empty() {
        if base.is_empty() {
            return PATH_SEPARATOR_STR.to_string();
        }
        return base.to_string();
    }
    format!("{}{}{}", base, PATH_SEPARATOR, rel)
}

/// Strip a wildcard suffix, returning the stem if present
pub fn strip_wildcard(path: &str) -> Option<&str> {
    path.strip_suffix(WILDCARD_SUFFIX)
}
