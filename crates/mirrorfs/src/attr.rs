//! Attribute marshaling between native stat records and the portable
//! [`AttrRecord`] handed to the protocol layer.
//!
//! The mapping is stateless. Nothing here is cached; the validity carried
//! by each record is only a hint for callers further up the stack.

use crate::error::{FsResult, LogFailure};
use filetime::FileTime;
use nix::unistd::{Gid, Uid};
use std::fs::{self, Metadata, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// How long callers may treat an attribute record as current.
pub const ATTR_VALID: Duration = Duration::from_secs(10);

/// Inode number reported for the root of the exposed tree.
pub const ROOT_INO: u64 = 1;

/// Permission bits reported for the root of the exposed tree.
pub const ROOT_PERM: u16 = 0o755;

const PERM_MASK: u32 = 0o777;
const SETUID: u32 = 0o4000;
const SETGID: u32 = 0o2000;

/// Portable file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    RegularFile,
    Directory,
    CharDevice,
    BlockDevice,
    NamedPipe,
    Symlink,
    Socket,
}

impl FileKind {
    /// Decodes the type bits of a native mode.
    ///
    /// Unrecognized types are reported as block devices.
    pub fn from_mode(mode: u32) -> Self {
        let fmt = mode & u32::from(libc::S_IFMT);
        if fmt == u32::from(libc::S_IFREG) {
            FileKind::RegularFile
        } else if fmt == u32::from(libc::S_IFDIR) {
            FileKind::Directory
        } else if fmt == u32::from(libc::S_IFCHR) {
            FileKind::CharDevice
        } else if fmt == u32::from(libc::S_IFBLK) {
            FileKind::BlockDevice
        } else if fmt == u32::from(libc::S_IFIFO) {
            FileKind::NamedPipe
        } else if fmt == u32::from(libc::S_IFLNK) {
            FileKind::Symlink
        } else if fmt == u32::from(libc::S_IFSOCK) {
            FileKind::Socket
        } else {
            FileKind::BlockDevice
        }
    }

    /// The native type bits for this kind.
    pub fn to_mode_bits(self) -> u32 {
        u32::from(match self {
            FileKind::RegularFile => libc::S_IFREG,
            FileKind::Directory => libc::S_IFDIR,
            FileKind::CharDevice => libc::S_IFCHR,
            FileKind::BlockDevice => libc::S_IFBLK,
            FileKind::NamedPipe => libc::S_IFIFO,
            FileKind::Symlink => libc::S_IFLNK,
            FileKind::Socket => libc::S_IFSOCK,
        })
    }
}

/// Attribute snapshot of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrRecord {
    pub ino: u64,
    pub size: u64,
    /// Number of 512-byte blocks allocated.
    pub blocks: u64,
    pub blksize: u32,
    pub kind: FileKind,
    /// Permission bits plus setuid/setgid.
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    /// Validity hint for upstream caches.
    pub valid: Duration,
}

impl AttrRecord {
    /// Returns true if this record describes a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Full native mode: type bits and permission bits.
    pub fn mode(&self) -> u32 {
        self.kind.to_mode_bits() | u32::from(self.perm)
    }
}

/// Builds an [`AttrRecord`] from native metadata (as returned by lstat).
pub fn to_attr(meta: &Metadata) -> AttrRecord {
    let mode = meta.mode();
    let perm = (mode & PERM_MASK) | (mode & (SETUID | SETGID));
    let mtime = unix_time(meta.mtime(), meta.mtime_nsec());

    AttrRecord {
        ino: meta.ino(),
        size: meta.size(),
        blocks: meta.blocks(),
        blksize: meta.blksize() as u32,
        kind: FileKind::from_mode(mode),
        perm: perm as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        atime: unix_time(meta.atime(), meta.atime_nsec()),
        mtime,
        ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
        crtime: meta.created().unwrap_or(mtime),
        valid: ATTR_VALID,
    }
}

/// Stats `path` without following a trailing symlink.
pub fn stat_path(path: &Path) -> FsResult<AttrRecord> {
    let meta = fs::symlink_metadata(path).log_failure("lstat", path)?;
    Ok(to_attr(&meta))
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(nsecs as u64)
    }
}

/// A timestamp requested by a setattr call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    /// An explicit point in time.
    Specific(SystemTime),
    /// The current time at the moment the update is applied.
    Now,
}

impl SetTime {
    fn to_file_time(self) -> FileTime {
        match self {
            SetTime::Specific(t) => FileTime::from_system_time(t),
            SetTime::Now => FileTime::now(),
        }
    }
}

/// A partial attribute update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetAttrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SetTime>,
    pub mtime: Option<SetTime>,
}

impl SetAttrRequest {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Applies the fields of `req` to `path` in a fixed order: mode, owner,
/// size, access time, modification time.
///
/// Stops at the first failing step. Steps that already succeeded are not
/// rolled back.
pub fn apply_partial_update(req: &SetAttrRequest, path: &Path) -> FsResult<()> {
    if let Some(mode) = req.mode {
        trace!(path = %path.display(), mode = format_args!("{mode:o}"), "chmod");
        fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))
            .log_failure("chmod", path)?;
    }

    if req.uid.is_some() || req.gid.is_some() {
        trace!(path = %path.display(), uid = ?req.uid, gid = ?req.gid, "chown");
        nix::unistd::chown(path, req.uid.map(Uid::from_raw), req.gid.map(Gid::from_raw))
            .log_failure("chown", path)?;
    }

    if let Some(size) = req.size {
        trace!(path = %path.display(), size, "truncate");
        nix::unistd::truncate(path, size as libc::off_t).log_failure("truncate", path)?;
    }

    if let Some(atime) = req.atime {
        filetime::set_file_atime(path, atime.to_file_time()).log_failure("utime", path)?;
    }

    if let Some(mtime) = req.mtime {
        filetime::set_file_mtime(path, mtime.to_file_time()).log_failure("utime", path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_kind_decoding() {
        assert_eq!(FileKind::from_mode(0o100644), FileKind::RegularFile);
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(0o020620), FileKind::CharDevice);
        assert_eq!(FileKind::from_mode(0o060660), FileKind::BlockDevice);
        assert_eq!(FileKind::from_mode(0o010644), FileKind::NamedPipe);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::Symlink);
        assert_eq!(FileKind::from_mode(0o140755), FileKind::Socket);
    }

    #[test]
    fn test_unknown_kind_defaults_to_device() {
        assert_eq!(FileKind::from_mode(0o000644), FileKind::BlockDevice);
    }

    #[test]
    fn test_to_attr_maps_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        File::create(&path).unwrap().write_all(b"hello").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o640)).unwrap();

        let meta = fs::symlink_metadata(&path).unwrap();
        let attr = to_attr(&meta);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, FileKind::RegularFile);
        assert_eq!(attr.perm, 0o640);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.ino, meta.ino());
        assert_eq!(attr.uid, meta.uid());
        assert_eq!(attr.valid, ATTR_VALID);
        assert_eq!(attr.mode(), 0o100640);
    }

    #[test]
    fn test_to_attr_preserves_setuid_setgid_but_not_sticky() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool");
        File::create(&path).unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o7755)).unwrap();

        let attr = stat_path(&path).unwrap();
        assert_eq!(attr.perm & 0o777, 0o755);
        assert_eq!(attr.perm & 0o1000, 0, "sticky bit is not carried");
    }

    #[test]
    fn test_timestamps_are_populated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        File::create(&path).unwrap();
        let when = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        filetime::set_file_mtime(&path, FileTime::from_system_time(when)).unwrap();

        let attr = stat_path(&path).unwrap();
        assert_eq!(attr.mtime, when);
        assert!(attr.ctime > UNIX_EPOCH);
    }

    #[test]
    fn test_stat_missing_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = stat_path(&dir.path().join("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_apply_mode_and_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        File::create(&path).unwrap().write_all(b"0123456789").unwrap();

        let req = SetAttrRequest {
            mode: Some(0o600),
            size: Some(4),
            ..Default::default()
        };
        apply_partial_update(&req, &path).unwrap();

        let attr = stat_path(&path).unwrap();
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.size, 4);
    }

    #[test]
    fn test_apply_times() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        File::create(&path).unwrap();
        let atime = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mtime = UNIX_EPOCH + Duration::from_secs(2_000_000);

        let req = SetAttrRequest {
            atime: Some(SetTime::Specific(atime)),
            mtime: Some(SetTime::Specific(mtime)),
            ..Default::default()
        };
        apply_partial_update(&req, &path).unwrap();

        let attr = stat_path(&path).unwrap();
        assert_eq!(attr.atime, atime);
        assert_eq!(attr.mtime, mtime);
    }

    #[test]
    fn test_apply_mtime_only_leaves_atime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        File::create(&path).unwrap();
        let atime = UNIX_EPOCH + Duration::from_secs(1_000_000);
        filetime::set_file_atime(&path, FileTime::from_system_time(atime)).unwrap();

        let req = SetAttrRequest {
            mtime: Some(SetTime::Now),
            ..Default::default()
        };
        apply_partial_update(&req, &path).unwrap();

        assert_eq!(stat_path(&path).unwrap().atime, atime);
    }

    #[test]
    fn test_apply_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subdir");
        fs::create_dir(&path).unwrap();

        // chmod succeeds, truncate on a directory fails, mtime is never applied.
        let before = stat_path(&path).unwrap().mtime;
        let req = SetAttrRequest {
            mode: Some(0o700),
            size: Some(0),
            mtime: Some(SetTime::Specific(UNIX_EPOCH + Duration::from_secs(42))),
            ..Default::default()
        };
        let err = apply_partial_update(&req, &path).unwrap_err();
        assert_eq!(err.to_errno(), libc::EISDIR);

        let after = stat_path(&path).unwrap();
        assert_eq!(after.perm, 0o700, "earlier step stays applied");
        assert_eq!(after.mtime, before, "later step is skipped");
    }

    #[test]
    fn test_empty_request() {
        assert!(SetAttrRequest::default().is_empty());
        assert!(!SetAttrRequest { size: Some(1), ..Default::default() }.is_empty());
    }
}
