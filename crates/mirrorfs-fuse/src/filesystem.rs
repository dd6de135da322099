//! FUSE filesystem implementation backed by [`MirrorFs`].
//!
//! Every callback resolves the kernel's inode or handle number to a core
//! [`Node`] or [`Handle`], runs the pass-through operation and translates the
//! result into a reply. No state beyond the two lookup tables is kept here;
//! the backing tree is always the source of truth.

use crate::attr::{file_attr, file_type};
use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::handles::{DirListingEntry, HandleTable};
use crate::inode::{InodeTable, ROOT_INODE, kernel_inode};
use crossbeam_channel::Receiver;
use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use mirrorfs::{AttrRecord, Handle, MirrorFs, Node, SetAttrRequest, SetTime};
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// The FUSE-facing half of the mirror.
pub struct MirrorFuse {
    fs: MirrorFs,
    inodes: InodeTable,
    handles: HandleTable,
    config: MountConfig,
}

impl MirrorFuse {
    /// Wraps a mirror for mounting with the default configuration.
    pub fn new(fs: MirrorFs) -> Self {
        Self::with_config(fs, MountConfig::default())
    }

    pub fn with_config(fs: MirrorFs, config: MountConfig) -> Self {
        let inodes = InodeTable::new(fs.root_node());
        Self {
            fs,
            inodes,
            handles: HandleTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Signal raised once the kernel tears the session down.
    pub fn unmount_signal(&self) -> Receiver<()> {
        self.fs.unmount_signal()
    }

    fn node(&self, ino: u64) -> FuseResult<Node> {
        self.inodes.get(ino).ok_or(FuseError::InvalidInode(ino))
    }

    fn with_handle<T>(&self, fh: u64, f: impl FnOnce(&Handle) -> FuseResult<T>) -> FuseResult<T> {
        let handle = self.handles.get(fh).ok_or(FuseError::InvalidHandle(fh))?;
        f(&handle)
    }

    /// Stats `node`, reporting its inode as the kernel will see it.
    fn attributes(&self, node: &Node) -> FuseResult<AttrRecord> {
        let record = node.get_attributes()?;
        Ok(kernel_record(node, record))
    }

    /// Stats `node` and records it as looked up by the kernel.
    fn remember(&self, node: Node) -> FuseResult<AttrRecord> {
        let record = self.attributes(&node)?;
        self.inodes.remember(record.ino, node);
        Ok(record)
    }

    fn lookup_entry(&self, parent: u64, name: &OsStr) -> FuseResult<AttrRecord> {
        let child = self.node(parent)?.lookup(utf8(name)?)?;
        self.remember(child)
    }

    fn set_attr(&self, ino: u64, req: &SetAttrRequest) -> FuseResult<AttrRecord> {
        let node = self.node(ino)?;
        let record = node.set_attributes(req)?;
        Ok(kernel_record(&node, record))
    }

    fn rename_entry(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) -> FuseResult<()> {
        if flags != 0 {
            return Err(FuseError::UnsupportedFlags(flags));
        }
        let src = self.node(parent)?;
        let dst = self.node(newparent)?;
        let newname = utf8(newname)?;
        src.rename(utf8(name)?, &dst, newname)?;

        // The kernel keeps the moved inode; point it at its new path.
        if let Ok(moved) = dst.lookup(newname)
            && let Ok(record) = self.attributes(&moved)
        {
            self.inodes.refresh(record.ino, moved);
        }
        Ok(())
    }

    fn open_handle(&self, ino: u64, flags: i32) -> FuseResult<u64> {
        let handle = self.node(ino)?.open(flags)?;
        Ok(self.handles.insert(handle))
    }

    fn release_handle(&self, fh: u64) -> FuseResult<()> {
        match self.handles.remove(fh) {
            Some(handle) => Ok(handle.release()?),
            None => {
                debug!(fh, "release of unknown handle");
                Ok(())
            }
        }
    }

    /// Inode reported for `..` of `node`.
    fn parent_inode(node: &Node) -> u64 {
        match node.path().parent() {
            Some(parent) if !parent.is_root() => node
                .real_path()
                .parent()
                .and_then(|p| fs::symlink_metadata(p).ok())
                .map_or(ROOT_INODE, |m| kernel_inode(m.ino(), false)),
            _ => ROOT_INODE,
        }
    }

    /// Returns the listing that readdir at `offset` indexes into.
    ///
    /// The directory is read once when the stream starts (offset 0) and
    /// every later offset is served from that snapshot, so entries removed
    /// or added mid-iteration cannot shift the remaining pages.
    fn directory_listing(
        &self,
        ino: u64,
        fh: u64,
        offset: i64,
    ) -> FuseResult<Arc<[DirListingEntry]>> {
        if offset != 0
            && let Some(listing) = self.handles.listing(fh)
        {
            return Ok(listing);
        }

        let node = self.node(ino)?;
        let entries = self.with_handle(fh, |h| Ok(h.read_directory()?))?;

        let mut listing = Vec::with_capacity(entries.len() + 2);
        listing.push(DirListingEntry {
            inode: ino,
            file_type: FileType::Directory,
            name: ".".into(),
        });
        listing.push(DirListingEntry {
            inode: Self::parent_inode(&node),
            file_type: FileType::Directory,
            name: "..".into(),
        });
        listing.extend(
            entries
                .into_iter()
                .filter(|e| e.name != "." && e.name != "..")
                .map(|e| DirListingEntry {
                    inode: kernel_inode(e.ino, false),
                    file_type: file_type(e.kind),
                    name: e.name,
                }),
        );
        Ok(self.handles.set_listing(fh, listing))
    }
}

impl Drop for MirrorFuse {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            debug!(open = self.handles.len(), "dropping filesystem with open handles");
        }
    }
}

/// Rewrites the inode of `record` so that only the mirror root claims
/// [`ROOT_INODE`].
fn kernel_record(node: &Node, mut record: AttrRecord) -> AttrRecord {
    record.ino = kernel_inode(record.ino, node.is_root());
    record
}

fn utf8(name: &OsStr) -> FuseResult<&str> {
    name.to_str()
        .ok_or_else(|| FuseError::InvalidName(name.to_os_string()))
}

fn set_time(time: Option<TimeOrNow>) -> Option<SetTime> {
    time.map(|t| match t {
        TimeOrNow::SpecificTime(at) => SetTime::Specific(at),
        TimeOrNow::Now => SetTime::Now,
    })
}

fn offset(offset: i64) -> FuseResult<u64> {
    u64::try_from(offset).map_err(|_| {
        FuseError::Fs(mirrorfs::FsError::InvalidArgument(format!(
            "negative offset {offset}"
        )))
    })
}

impl Filesystem for MirrorFuse {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!(root = %self.fs.root().display(), "FUSE filesystem initialized");
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        info!("FUSE filesystem destroyed");
        self.fs.teardown();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.lookup_entry(parent, name) {
            Ok(record) => reply.entry(&record.valid, &file_attr(&record), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        if let Some(node) = self.inodes.get(ino) {
            node.forget();
        }
        self.inodes.forget(ino, nlookup);
    }

    // Attributes are always taken from the path, never from `fh`, so an
    // open but unlinked file answers ENOENT here.
    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.node(ino).and_then(|n| self.attributes(&n)) {
            Ok(record) => reply.attr(&record.valid, &file_attr(&record)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        // Path-based like getattr: updates go through the path, not `fh`.
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, ?mode, ?uid, ?gid, ?size, "setattr");
        let req = SetAttrRequest {
            mode,
            uid,
            gid,
            size,
            atime: set_time(atime),
            mtime: set_time(mtime),
        };
        match self.set_attr(ino, &req) {
            Ok(record) => reply.attr(&record.valid, &file_attr(&record)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(inode = ino, "readlink");
        match self.node(ino).and_then(|n| Ok(n.readlink()?)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, mode = format_args!("{mode:o}"), rdev, "mknod");
        let result = self
            .node(parent)
            .and_then(|p| Ok(p.make_node(utf8(name)?, mode, rdev)?))
            .and_then(|node| self.remember(node));
        match result {
            Ok(record) => reply.entry(&record.valid, &file_attr(&record), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, mode = format_args!("{mode:o}"), "mkdir");
        let result = self
            .node(parent)
            .and_then(|p| Ok(p.make_directory(utf8(name)?, mode)?))
            .and_then(|node| self.remember(node));
        match result {
            Ok(record) => reply.entry(&record.valid, &file_attr(&record), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "unlink");
        match self.node(parent).and_then(|p| Ok(p.remove(utf8(name)?, false)?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "rmdir");
        match self.node(parent).and_then(|p| Ok(p.remove(utf8(name)?, true)?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?link_name, target = %target.display(), "symlink");
        let result = self
            .node(parent)
            .and_then(|p| Ok(p.symlink(utf8(link_name)?, target)?))
            .and_then(|node| self.remember(node));
        match result {
            Ok(record) => reply.entry(&record.valid, &file_attr(&record), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, name = ?name, newparent, newname = ?newname, flags, "rename");
        match self.rename_entry(parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        trace!(inode = ino, newparent, newname = ?newname, "link");
        let result = self
            .node(ino)
            .and_then(|existing| {
                let dir = self.node(newparent)?;
                Ok(dir.link(utf8(newname)?, &existing)?)
            })
            .and_then(|node| self.remember(node));
        match result {
            Ok(record) => reply.entry(&record.valid, &file_attr(&record), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags = format_args!("{flags:#x}"), "open");
        match self.open_handle(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        let result =
            self::offset(offset).and_then(|at| self.with_handle(fh, |h| Ok(h.read(at, size as usize)?)));
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        let result =
            self::offset(offset).and_then(|at| self.with_handle(fh, |h| Ok(h.write(at, data)?)));
        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        match self.with_handle(fh, |h| Ok(h.flush()?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(inode = ino, fh, error = %e, "close failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "fsync");
        match self.with_handle(fh, |h| Ok(h.sync()?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        let flags = (flags & !libc::O_ACCMODE) | libc::O_RDONLY;
        match self.open_handle(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, fh, offset, "readdir");
        let listing = match self.directory_listing(ino, fh, offset) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in listing.iter().enumerate().skip(skip) {
            // add() returns true once the kernel buffer is full
            if reply.add(entry.inode, (i + 1) as i64, entry.file_type, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "releasedir");
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "fsyncdir");
        match self.with_handle(fh, |h| Ok(h.sync()?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.fs.statistics() {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.blocks_free,
                stats.blocks_available,
                stats.files,
                stats.files_free,
                stats.block_size,
                stats.name_max,
                stats.fragment_size,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, name = ?name, "setxattr");
        match self.node(ino).and_then(|n| Ok(n.set_xattr(name, value)?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        trace!(inode = ino, name = ?name, size, "getxattr");
        match self.node(ino).and_then(|n| Ok(n.get_xattr(name)?)) {
            Ok(value) => reply_xattr(reply, &value, size),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        trace!(inode = ino, size, "listxattr");
        match self.node(ino).and_then(|n| Ok(n.list_xattr()?)) {
            Ok(names) => reply_xattr(reply, &names, size),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(inode = ino, name = ?name, "removexattr");
        match self.node(ino).and_then(|n| Ok(n.remove_xattr(name)?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(inode = ino, mask, "access");
        match self.node(ino).and_then(|n| Ok(n.access(mask)?)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent, name = ?name, mode = format_args!("{mode:o}"), flags = format_args!("{flags:#x}"), "create");
        let result = self
            .node(parent)
            .and_then(|p| Ok(p.create(utf8(name)?, flags, mode)?));
        match result {
            Ok(created) => {
                let record = kernel_record(&created.node, created.attr);
                self.inodes.remember(record.ino, created.node);
                let fh = self.handles.insert(created.handle);
                reply.created(&record.valid, &file_attr(&record), created.generation, fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

/// Answers an xattr query: the required length when `size` is 0, the bytes when
/// they fit, `ERANGE` otherwise.
fn reply_xattr(reply: ReplyXattr, value: &[u8], size: u32) {
    if size == 0 {
        reply.size(value.len() as u32);
    } else if value.len() <= size as usize {
        reply.data(value);
    } else {
        reply.error(libc::ERANGE);
    }
}
