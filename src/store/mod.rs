//! Node store module
//!
//! Owns the hierarchical namespace:
//! - Path normalization and syntactic parent/name splitting
//! - Node data and stat bookkeeping
//! - Parent/child consistency on create

mod node;
mod tree;

pub use node::Node;
pub use tree::NodeStore;

use thiserror::Error;

use crate::protocol::ErrorKind;

/// Path of the root node, which always exists
pub const ROOT_PATH: &str = "/";

/// Store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("No node at {0}")]
    NoNode(String),

    #[error("Node already exists at {0}")]
    NodeExists(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Error kind reported to clients
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NoNode(_) => ErrorKind::NoNode,
            StoreError::NodeExists(_) => ErrorKind::NodeExists,
            StoreError::InvalidPath(_) => ErrorKind::BadRequest,
        }
    }
}

/// Strip trailing `/` characters. The root stays `/`.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        ROOT_PATH
    } else {
        trimmed
    }
}

/// Split a normalized path into `(parent, name)` at the last `/`.
///
/// Purely syntactic: nothing is looked up. A single-segment path has `/` as
/// its parent.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => (ROOT_PATH, &path[1..]),
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => (ROOT_PATH, path),
    }
}

/// Check that a normalized path is absolute and has no empty segments
pub fn validate_path(path: &str) -> StoreResult<()> {
    if path == ROOT_PATH {
        return Ok(());
    }

    let valid = path
        .strip_prefix('/')
        .map(|rest| rest.split('/').all(|segment| !segment.is_empty()))
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("/a/b///"), "/a/b");
        assert_eq!(normalize_path("/a/b"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("///"), "/");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/a"), ("/", "a"));
        assert_eq!(split_path("/a/b"), ("/a", "b"));
        assert_eq!(split_path("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split_path("a"), ("/", "a"));
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a").is_ok());
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(StoreError::NoNode("/a".into()).kind(), ErrorKind::NoNode);
        assert_eq!(StoreError::NodeExists("/a".into()).kind(), ErrorKind::NodeExists);
        assert_eq!(StoreError::InvalidPath("a".into()).kind(), ErrorKind::BadRequest);
    }
}
