//! Namespace entries and their metadata operations.
//!
//! A [`Node`] is nothing more than a root-relative path plus a directory
//! flag. It holds no descriptor and caches nothing: every operation
//! resolves the path again and issues the native call directly. Nodes are
//! built fresh by whichever operation discovers or creates an entry, so two
//! nodes for the same path are equal values but never shared state.

use crate::attr::{self, AttrRecord, FileKind, ROOT_INO, ROOT_PERM, SetAttrRequest};
use crate::error::{FsError, FsResult, LogFailure};
use crate::filesystem::Shared;
use crate::handle::{self, Handle};
use crate::path::RelPath;
use nix::sys::stat::{Mode, SFlag};
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Span, trace};

/// Number of directory entries compared per batch during [`Node::lookup`].
pub const LOOKUP_BATCH: usize = 128;

/// Result of [`Node::create`].
#[derive(Debug)]
pub struct Created {
    pub node: Node,
    pub handle: Handle,
    pub attr: AttrRecord,
    /// Always zero; generations are not tracked.
    pub generation: u64,
}

/// One entry of the exposed tree.
#[derive(Clone)]
pub struct Node {
    shared: Arc<Shared>,
    path: RelPath,
    is_dir: bool,
}

impl Node {
    pub(crate) fn new(shared: Arc<Shared>, path: RelPath, is_dir: bool) -> Self {
        Self {
            shared,
            path,
            is_dir,
        }
    }

    /// The root-relative path of this node.
    pub fn path(&self) -> &RelPath {
        &self.path
    }

    /// Whether this node was discovered or created as a directory.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Whether this node is the root of the exposed tree.
    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    /// The real path this node maps to.
    pub fn real_path(&self) -> PathBuf {
        self.shared.resolver.resolve(&self.path)
    }

    pub(crate) fn span(&self) -> &Span {
        &self.shared.span
    }

    fn sibling(&self, path: RelPath, is_dir: bool) -> Node {
        Node::new(Arc::clone(&self.shared), path, is_dir)
    }

    fn child(&self, name: &str) -> FsResult<(RelPath, PathBuf)> {
        let rel = self.path.join(name)?;
        let real = self.shared.resolver.resolve(&rel);
        Ok((rel, real))
    }

    fn require_dir(&self) -> FsResult<()> {
        if self.is_dir {
            Ok(())
        } else {
            Err(FsError::NotADirectory(self.path.to_string()))
        }
    }

    // ==================== Metadata ====================

    /// Returns the attributes of this entry.
    ///
    /// The root always reports inode 1 as a 0755 directory, and any node
    /// flagged as a directory reports the directory kind.
    pub fn get_attributes(&self) -> FsResult<AttrRecord> {
        let _enter = self.span().enter();
        trace!(path = %self.path, "getattr");

        let mut attr = attr::stat_path(&self.real_path())?;
        if self.is_root() {
            attr.ino = ROOT_INO;
            attr.kind = FileKind::Directory;
            attr.perm = ROOT_PERM;
        }
        if self.is_dir {
            attr.kind = FileKind::Directory;
        }
        Ok(attr)
    }

    /// Applies a partial attribute update and returns the resulting
    /// attributes. The first failing step aborts the update.
    pub fn set_attributes(&self, req: &SetAttrRequest) -> FsResult<AttrRecord> {
        {
            let _enter = self.span().enter();
            trace!(path = %self.path, request = ?req, "setattr");
            attr::apply_partial_update(req, &self.real_path())?;
        }
        self.get_attributes()
    }

    /// Always succeeds; permission checks happen when real I/O is issued.
    pub fn access(&self, _mask: i32) -> FsResult<()> {
        Ok(())
    }

    /// Accepted and ignored: there is no cache to evict from.
    pub fn forget(&self) {}

    // ==================== Namespace ====================

    /// Finds the entry called `name` in this directory.
    ///
    /// Entries are scanned in batches of [`LOOKUP_BATCH`] and compared by
    /// name; the match is then stat'ed to decide whether it is a directory.
    pub fn lookup(&self, name: &str) -> FsResult<Node> {
        let _enter = self.span().enter();
        trace!(path = %self.path, name, "lookup");

        self.require_dir()?;
        let (rel, real) = self.child(name)?;
        let dir_path = self.real_path();

        let wanted = OsStr::new(name);
        let mut entries = fs::read_dir(&dir_path).log_failure("opendir", &dir_path)?;
        let mut found = false;
        loop {
            let batch = entries
                .by_ref()
                .take(LOOKUP_BATCH)
                .collect::<Result<Vec<_>, _>>()
                .log_failure("readdir", &dir_path)?;
            if batch.is_empty() {
                break;
            }
            if batch.iter().any(|entry| entry.file_name() == wanted) {
                found = true;
                break;
            }
        }

        if !found {
            trace!(path = %self.path, name, "no such entry");
            return Err(FsError::NotFound(rel.to_string()));
        }

        let attr = attr::stat_path(&real)?;
        Ok(self.sibling(rel, attr.is_dir()))
    }

    /// Creates directory `name` (and any missing ancestors).
    pub fn make_directory(&self, name: &str, mode: u32) -> FsResult<Node> {
        let _enter = self.span().enter();
        trace!(path = %self.path, name, mode = format_args!("{mode:o}"), "mkdir");

        self.require_dir()?;
        let (rel, real) = self.child(name)?;
        DirBuilder::new()
            .recursive(true)
            .mode(mode & 0o7777)
            .create(&real)
            .log_failure("mkdir", &real)?;
        Ok(self.sibling(rel, true))
    }

    /// Creates and opens file `name`, returning its node, handle and
    /// attributes.
    pub fn create(&self, name: &str, flags: i32, mode: u32) -> FsResult<Created> {
        let _enter = self.span().enter();
        trace!(path = %self.path, name, flags, mode = format_args!("{mode:o}"), "create");

        let (rel, real) = self.child(name)?;
        let file = handle::open_file(&real, flags | libc::O_CREAT, Some(mode))?;
        let attr = attr::stat_path(&real)?;

        let node = self.sibling(rel, attr.is_dir());
        let handle = Handle::new(node.clone(), file);
        Ok(Created {
            node,
            handle,
            attr,
            generation: 0,
        })
    }

    /// Opens this entry with the given `open(2)` flags.
    pub fn open(&self, flags: i32) -> FsResult<Handle> {
        let _enter = self.span().enter();
        trace!(path = %self.path, flags, "open");

        let file = handle::open_file(&self.real_path(), flags, None)?;
        Ok(Handle::new(self.clone(), file))
    }

    /// Removes entry `name` from this directory. Directories are removed
    /// recursively.
    pub fn remove(&self, name: &str, is_dir: bool) -> FsResult<()> {
        let _enter = self.span().enter();
        trace!(path = %self.path, name, is_dir, "remove");

        if !self.is_dir {
            return Err(FsError::Unsupported("remove from a non-directory"));
        }
        let (_, real) = self.child(name)?;
        if is_dir {
            fs::remove_dir_all(&real).log_failure("rmdir", &real)
        } else {
            fs::remove_file(&real).log_failure("unlink", &real)
        }
    }

    /// Renames `old_name` in this directory to `new_name` in `new_dir`.
    pub fn rename(&self, old_name: &str, new_dir: &Node, new_name: &str) -> FsResult<()> {
        let _enter = self.span().enter();
        trace!(path = %self.path, old_name, new_dir = %new_dir.path, new_name, "rename");

        let (_, from) = self.child(old_name)?;
        let (_, to) = new_dir.child(new_name)?;
        fs::rename(&from, &to).log_failure("rename", &from)
    }

    /// Creates hard link `new_name` in this directory pointing at
    /// `existing`. Refused unless this node is a directory.
    pub fn link(&self, new_name: &str, existing: &Node) -> FsResult<Node> {
        let _enter = self.span().enter();
        trace!(path = %self.path, new_name, existing = %existing.path, "link");

        if !self.is_dir {
            return Err(FsError::Unsupported("hard link into a non-directory"));
        }
        let (rel, real) = self.child(new_name)?;
        fs::hard_link(existing.real_path(), &real).log_failure("link", &real)?;
        Ok(self.sibling(rel, existing.is_dir))
    }

    /// Creates symlink `new_name` in this directory whose content is
    /// `target`, stored verbatim.
    pub fn symlink(&self, new_name: &str, target: &Path) -> FsResult<Node> {
        let _enter = self.span().enter();
        trace!(path = %self.path, new_name, target = %target.display(), "symlink");

        let (rel, real) = self.child(new_name)?;
        std::os::unix::fs::symlink(target, &real).log_failure("symlink", &real)?;
        Ok(self.sibling(rel, false))
    }

    /// Returns the target of this symlink.
    pub fn readlink(&self) -> FsResult<PathBuf> {
        let _enter = self.span().enter();
        trace!(path = %self.path, "readlink");

        let real = self.real_path();
        fs::read_link(&real).log_failure("readlink", &real)
    }

    /// Creates a regular file, fifo, or character/block device called
    /// `name`. The type is taken from the `S_IFMT` bits of `mode`.
    pub fn make_node(&self, name: &str, mode: u32, rdev: u32) -> FsResult<Node> {
        let _enter = self.span().enter();
        trace!(path = %self.path, name, mode = format_args!("{mode:o}"), rdev, "mknod");

        let (rel, real) = self.child(name)?;
        let perm = mode & 0o7777;
        let kind = mode & u32::from(libc::S_IFMT);
        let nix_perm = Mode::from_bits_truncate(perm as libc::mode_t);

        if kind == u32::from(libc::S_IFREG) {
            let file = handle::open_file(
                &real,
                libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY,
                Some(perm),
            )?;
            Handle::new(self.sibling(rel.clone(), false), file).release()?;
        } else if kind == u32::from(libc::S_IFIFO) {
            nix::unistd::mkfifo(&real, nix_perm).log_failure("mkfifo", &real)?;
        } else if kind == u32::from(libc::S_IFCHR) || kind == u32::from(libc::S_IFBLK) {
            let sflag = SFlag::from_bits_truncate(kind as libc::mode_t);
            nix::sys::stat::mknod(&real, sflag, nix_perm, rdev as libc::dev_t)
                .log_failure("mknod", &real)?;
        } else {
            return Err(FsError::InvalidArgument(format!(
                "unsupported node type {kind:o} for '{rel}'"
            )));
        }

        Ok(self.sibling(rel, false))
    }

    // ==================== Extended attributes ====================
    //
    // The underlying store is treated as xattr-unaware: every call succeeds
    // and reports nothing.

    /// Always returns an empty value.
    pub fn get_xattr(&self, name: &OsStr) -> FsResult<Vec<u8>> {
        trace!(path = %self.path, name = ?name, "getxattr");
        Ok(Vec::new())
    }

    /// Always returns an empty name list.
    pub fn list_xattr(&self) -> FsResult<Vec<u8>> {
        trace!(path = %self.path, "listxattr");
        Ok(Vec::new())
    }

    /// Accepts and discards the value.
    pub fn set_xattr(&self, name: &OsStr, _value: &[u8]) -> FsResult<()> {
        trace!(path = %self.path, name = ?name, "setxattr");
        Ok(())
    }

    /// Always succeeds.
    pub fn remove_xattr(&self, name: &OsStr) -> FsResult<()> {
        trace!(path = %self.path, name = ?name, "removexattr");
        Ok(())
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.is_dir == other.is_dir
            && self.shared.resolver.root() == other.shared.resolver.root()
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path.as_str())
            .field("is_dir", &self.is_dir)
            .finish()
    }
}
