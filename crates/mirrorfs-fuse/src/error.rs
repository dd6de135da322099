//! Errors raised by the FUSE adapter on top of the core [`FsError`].

use mirrorfs::{FsError, ToErrno};
use std::ffi::OsString;
use thiserror::Error;

/// Adapter-level errors: unknown inode or handle numbers and names the
/// core cannot represent, plus everything the core itself reports.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Error from the pass-through core.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The kernel referenced an inode the table does not know.
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// The kernel referenced a file handle that is not open.
    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    /// A name that is not valid UTF-8.
    #[error("Invalid name: {0:?}")]
    InvalidName(OsString),

    /// A request flag the pass-through cannot honour.
    #[error("Unsupported flags: {0:#x}")]
    UnsupportedFlags(u32),
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Fs(e) => e.to_errno(),
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::InvalidHandle(_) => libc::EBADF,
            FuseError::InvalidName(_) | FuseError::UnsupportedFlags(_) => libc::EINVAL,
        }
    }
}

impl ToErrno for FuseError {
    fn to_errno(&self) -> i32 {
        FuseError::to_errno(self)
    }
}

/// Result type for adapter operations.
pub type FuseResult<T> = Result<T, FuseError>;
