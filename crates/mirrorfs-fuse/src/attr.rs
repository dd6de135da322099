//! Conversion from mirror attribute records to fuser's wire types.

use fuser::{FileAttr, FileType};
use mirrorfs::{AttrRecord, FileKind};

/// Maps a mirror file kind onto the FUSE file type.
pub fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::NamedPipe => FileType::NamedPipe,
        FileKind::Symlink => FileType::Symlink,
        FileKind::Socket => FileType::Socket,
    }
}

/// Builds the [`FileAttr`] reported to the kernel.
pub fn file_attr(record: &AttrRecord) -> FileAttr {
    FileAttr {
        ino: record.ino,
        size: record.size,
        blocks: record.blocks,
        atime: record.atime,
        mtime: record.mtime,
        ctime: record.ctime,
        crtime: record.crtime,
        kind: file_type(record.kind),
        perm: record.perm,
        nlink: record.nlink,
        uid: record.uid,
        gid: record.gid,
        rdev: record.rdev,
        blksize: record.blksize,
        flags: 0,
    }
}
