//! Open data streams.
//!
//! A [`Handle`] owns exactly one native descriptor from `open`/`create`
//! until [`Handle::release`] consumes it. All I/O is positioned, so
//! concurrent readers and writers on the same handle never share a cursor.

use crate::attr::{self, FileKind};
use crate::error::{FsError, FsResult, LogFailure};
use crate::node::Node;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use tracing::{debug, trace};

/// Inode reported for a directory entry with an empty name.
pub const DOT_ENTRY_INO: u64 = 2;

/// One entry returned by [`Handle::read_directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: OsString,
    pub kind: FileKind,
}

/// An open file or directory stream bound to the node it was opened from.
#[derive(Debug)]
pub struct Handle {
    node: Node,
    file: File,
}

impl Handle {
    pub(crate) fn new(node: Node, file: File) -> Self {
        Self { node, file }
    }

    /// The node this handle was opened from.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Reads up to `size` bytes starting at `offset`.
    ///
    /// Fewer bytes than requested are returned only when the end of the
    /// stream is reached; reading at or past the end yields an empty buffer.
    pub fn read(&self, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let _enter = self.node.span().enter();
        trace!(path = %self.node.path(), offset, size, "read");

        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match self.file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e).log_failure("read", &self.node.real_path()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Writes `data` at `offset`, returning the number of bytes written.
    pub fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        let _enter = self.node.span().enter();
        trace!(path = %self.node.path(), offset, size = data.len(), "write");

        self.file
            .write_at(data, offset)
            .log_failure("write", &self.node.real_path())
    }

    /// Flushes all pending data and metadata to storage.
    pub fn sync(&self) -> FsResult<()> {
        let _enter = self.node.span().enter();
        trace!(path = %self.node.path(), "fsync");

        self.file.sync_all().log_failure("fsync", &self.node.real_path())
    }

    /// Same as [`Handle::sync`]; there is no partial dirty-range tracking.
    pub fn flush(&self) -> FsResult<()> {
        self.sync()
    }

    /// Closes the descriptor, surfacing any error reported by `close`.
    pub fn release(self) -> FsResult<()> {
        let _enter = self.node.span().enter();
        trace!(path = %self.node.path(), "release");

        nix::unistd::close(self.file).log_failure("close", &self.node.real_path())
    }

    /// Lists every entry of the directory this handle was opened on.
    ///
    /// Entries that disappear between listing and stat are skipped.
    pub fn read_directory(&self) -> FsResult<Vec<DirEntry>> {
        let _enter = self.node.span().enter();
        trace!(path = %self.node.path(), "readdir");

        if !self.node.is_dir() {
            return Err(FsError::NotADirectory(self.node.path().to_string()));
        }

        let dir_path = self.node.real_path();
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir_path).log_failure("readdir", &dir_path)? {
            let entry = entry.log_failure("readdir", &dir_path)?;
            let mut name = entry.file_name();
            let attr = match attr::stat_path(&entry.path()) {
                Ok(attr) => attr,
                Err(e) => {
                    debug!(name = ?name, error = %e, "entry vanished during listing");
                    continue;
                }
            };

            let mut ino = attr.ino;
            if name.is_empty() {
                ino = DOT_ENTRY_INO;
                name = OsString::from(".");
            }
            entries.push(DirEntry {
                ino,
                name,
                kind: attr.kind,
            });
        }
        Ok(entries)
    }
}

/// Builds `OpenOptions` from raw `open(2)` flags.
///
/// The access mode selects read/write; every other flag (including
/// `O_CREAT`, `O_EXCL`, `O_TRUNC` and `O_APPEND`) is passed through as-is.
pub(crate) fn open_options(flags: i32, mode: Option<u32>) -> OpenOptions {
    let mut opts = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => opts.write(true),
        libc::O_RDWR => opts.read(true).write(true),
        _ => opts.read(true),
    };
    opts.custom_flags(flags & !libc::O_ACCMODE);
    if let Some(mode) = mode {
        opts.mode(mode & 0o7777);
    }
    opts
}

pub(crate) fn open_file(path: &Path, flags: i32, mode: Option<u32>) -> FsResult<File> {
    open_options(flags, mode).open(path).log_failure("open", path)
}
