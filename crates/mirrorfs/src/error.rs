//! Error taxonomy for pass-through operations.
//!
//! Every failure is one of a handful of kinds, and each kind maps to a
//! POSIX error code that the protocol layer can hand back to the kernel.
//! Native failures keep their raw errno.

use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors produced by node, handle and filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// A named entry is not present in a directory.
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// A directory-only operation was invoked on a non-directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// The operation is refused for this kind of node.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// A malformed name or an unsupported node type was requested.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A native file-system call failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Converts this error to a libc error code.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::Unsupported(_) => libc::ENOTSUP,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::Io(e) => io_error_to_errno(e),
        }
    }

    /// Returns true if this error means the entry does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<nix::errno::Errno> for FsError {
    fn from(e: nix::errno::Errno) -> Self {
        FsError::Io(io::Error::from(e))
    }
}

/// Converts an IO error to a libc error code.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

/// Result type for pass-through operations.
pub type FsResult<T> = Result<T, FsError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for FsError {
    fn to_errno(&self) -> i32 {
        FsError::to_errno(self)
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}

/// Logs a failed operation with its call-site context before propagating it.
pub(crate) trait LogFailure<T> {
    fn log_failure(self, op: &'static str, path: &Path) -> FsResult<T>;
}

impl<T, E: Into<FsError>> LogFailure<T> for Result<T, E> {
    fn log_failure(self, op: &'static str, path: &Path) -> FsResult<T> {
        self.map_err(|e| {
            let e = e.into();
            debug!(op, path = %path.display(), errno = e.to_errno(), error = %e, "operation failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(FsError::NotFound("a".into()).to_errno(), libc::ENOENT);
        assert_eq!(FsError::NotADirectory("a".into()).to_errno(), libc::ENOTDIR);
        assert_eq!(FsError::Unsupported("link").to_errno(), libc::ENOTSUP);
        assert_eq!(FsError::InvalidArgument("x".into()).to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_io_error_passthrough() {
        for code in [libc::EPERM, libc::EACCES, libc::EEXIST, libc::ENOSPC, libc::ENOTEMPTY] {
            let e = FsError::Io(io::Error::from_raw_os_error(code));
            assert_eq!(e.to_errno(), code, "errno {code} should pass through unchanged");
        }
    }

    #[test]
    fn test_io_error_without_os_code_is_eio() {
        let e = io::Error::other("custom error");
        assert_eq!(io_error_to_errno(&e), libc::EIO);
        assert_eq!(e.to_errno(), libc::EIO);
    }

    #[test]
    fn test_from_errno() {
        let e: FsError = nix::errno::Errno::EROFS.into();
        assert_eq!(e.to_errno(), libc::EROFS);
    }

    #[test]
    fn test_is_not_found() {
        assert!(FsError::NotFound("gone".into()).is_not_found());
        assert!(FsError::Io(io::Error::from_raw_os_error(libc::ENOENT)).is_not_found());
        assert!(!FsError::Unsupported("remove").is_not_found());
    }

    #[test]
    fn test_display_includes_context() {
        let e = FsError::NotFound("docs/readme.md".to_string());
        assert!(e.to_string().contains("docs/readme.md"));

        let e = FsError::Unsupported("hard link");
        assert!(e.to_string().contains("hard link"));
    }

    #[test]
    fn test_log_failure_preserves_error() {
        let r: Result<(), io::Error> = Err(io::Error::from_raw_os_error(libc::EACCES));
        let e = r.log_failure("chmod", Path::new("/tmp/x")).unwrap_err();
        assert_eq!(e.to_errno(), libc::EACCES);
    }
}
