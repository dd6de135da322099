//! Mapping between the exposed namespace and real paths.
//!
//! Every entry in the mounted tree is identified by a [`RelPath`], a
//! `/`-joined sequence of segment names relative to the configured root.
//! A `RelPath` can only grow one validated segment at a time, which keeps
//! `..` and absolute components out of the namespace without any runtime
//! normalization in [`PathResolver::resolve`].

use crate::error::{FsError, FsResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator used between segments of a relative path.
pub const SEPARATOR: char = '/';

/// A root-relative path. Empty for the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RelPath(String);

impl RelPath {
    /// The root of the exposed tree.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Returns true if this path denotes the root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extends this path with a single name segment.
    ///
    /// The name must be non-empty, must not be `.` or `..`, and must not
    /// contain a separator or NUL byte.
    pub fn join(&self, name: &str) -> FsResult<Self> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}{SEPARATOR}{name}", self.0)))
        }
    }

    /// Returns the last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit(SEPARATOR).next()
        }
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind(SEPARATOR) {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        })
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Checks that `name` is a single usable path segment.
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidArgument(format!("invalid entry name '{name}'")));
    }
    if name.contains(SEPARATOR) || name.contains('\0') {
        return Err(FsError::InvalidArgument(format!(
            "entry name '{name}' must be a single path segment"
        )));
    }
    Ok(())
}

/// Joins the configured root with relative paths.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Creates a resolver for an already-absolute root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the real path for `rel`: the root itself when `rel` is
    /// empty, else the root and `rel` joined by a single separator.
    pub fn resolve(&self, rel: &RelPath) -> PathBuf {
        if rel.is_root() {
            self.root.clone()
        } else {
            self.root.join(rel.as_str())
        }
    }
}
